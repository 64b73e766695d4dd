//! Writes a finished image to disk.
//!
//! Unlike `vexfile::write_file`, which creates the destination path
//! directly, a story file must never be left half-written if the
//! process dies partway through (spec.md §7: "a run either produces a
//! complete, valid image or no output file at all"). We write to a
//! sibling temp file and `rename` it into place, which is atomic on
//! the same filesystem; that rename is the only thing this module
//! adds over the teacher's direct `File::create`.

use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::Path;

pub fn write_file<P: AsRef<Path>>(path: P, image: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(image)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_the_image_bytes_verbatim() {
        let dir = std::env::temp_dir().join(format!("zimage-writer-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("story.z5");
        write_file(&out, &[1, 2, 3, 4]).unwrap();
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        std::fs::remove_file(&out).unwrap();
        std::fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn leaves_no_temp_file_behind_on_success() {
        let dir = std::env::temp_dir().join(format!("zimage-writer-test-tmp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("story.z5");
        write_file(&out, &[0]).unwrap();
        assert!(!dir.join("z5.tmp").exists());
        std::fs::remove_file(&out).unwrap();
        std::fs::remove_dir(&dir).unwrap();
    }
}
