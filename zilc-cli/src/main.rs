#[macro_use]
extern crate clap;

use byteorder::WriteBytesExt;
use clap::Arg;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use util::Endian;

use zilc::source_map::SourceMapItem;
use zimage::{build_image, BuildOptions};

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Zilc(zilc::Error),
    Image(zimage::ImageError),
    Io(std::io::Error, IOErrorContext, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => writeln!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "Reading input",
                    IOErrorContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Zilc(err) => {
                writeln!(f, "Compiling source failed:")?;
                write!(f, "{}", err)
            }
            Error::Image(err) => {
                writeln!(f, "Laying out image failed:")?;
                write!(f, "{}", err)
            }
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the story file to write to"),
        )
        .arg(
            Arg::with_name("entry")
                .short("e")
                .long("entry")
                .takes_value(true)
                .value_name("ROUTINE")
                .default_value("GO")
                .help("Sets the routine used as the story's entry point"),
        )
        .arg(
            Arg::with_name("release")
                .short("r")
                .long("release")
                .takes_value(true)
                .value_name("NUMBER")
                .default_value("1")
                .help("Sets the release number stamped into the header"),
        )
        .arg(
            Arg::with_name("source_map")
                .short("m")
                .long("source_map")
                .takes_value(true)
                .value_name("SOURCE_MAP")
                .help("Sets the file to write the source map to"),
        )
        .arg(
            Arg::with_name("version_flag")
                .long("version-flag")
                .takes_value(true)
                .value_name("PROFILE")
                .default_value(zilc::TARGET_PROFILE)
                .help("Selects the target VM profile (only V5 is fully specified)"),
        )
        .arg(
            Arg::with_name("abbreviations")
                .short("a")
                .long("abbreviations")
                .help("Selects abbreviations from the string corpus before encoding"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Prints diagnostic detail about the compiled program"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output");
    let source_map_path = matches.value_of("source_map");
    let entry_routine = matches.value_of("entry").unwrap().to_string();
    let release_number = value_t!(matches.value_of("release"), u16).unwrap_or(1);
    let version_flag = matches.value_of("version_flag").unwrap().to_string();
    let select_abbreviations = matches.is_present("abbreviations");
    let verbose = matches.is_present("verbose");

    if version_flag != zilc::TARGET_PROFILE {
        eprintln!(
            "unsupported target profile \"{}\": only {} is fully specified",
            version_flag,
            zilc::TARGET_PROFILE
        );
        std::process::exit(1);
    }

    if let Err(err) = zilc(
        input,
        output,
        source_map_path,
        entry_routine,
        release_number,
        select_abbreviations,
        verbose,
    ) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn zilc(
    input: &str,
    output: Option<&str>,
    source_map_path: Option<&str>,
    entry_routine: String,
    release_number: u16,
    select_abbreviations: bool,
    verbose: bool,
) -> Result<(), Error> {
    let input_path = Path::new(input);
    let base_dir = input_path.parent().unwrap_or_else(|| Path::new(".")).to_owned();

    let input_file =
        File::open(input_path).map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;
    let mut buf_reader = BufReader::new(input_file);
    let mut source = String::new();
    buf_reader
        .read_to_string(&mut source)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;

    let name = input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string());

    let compiled = zilc::compile(&source, &name, &base_dir, select_abbreviations).map_err(Error::Zilc)?;

    if verbose {
        eprintln!(
            "compiled {} routine(s), {} object(s), {} global(s), {} abbreviation(s)",
            compiled.program.routines.len(),
            compiled.tables.finalized_objects.len(),
            compiled.tables.globals.initial_values().len(),
            compiled.abbreviations.len(),
        );
    }

    let options = BuildOptions {
        entry_routine,
        release_number,
        ..BuildOptions::default()
    };
    let image = build_image(&compiled, &options).map_err(Error::Image)?;

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("z5"));

    zimage::write_file(&output_path, &image)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path))?;

    if let Some(map_path_str) = source_map_path {
        let map_path = PathBuf::from(map_path_str);
        write_source_map(&compiled.source_map, &map_path)
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, map_path))?;
    }

    if verbose {
        eprintln!("wrote {} bytes", image.len());
    }

    Ok(())
}

fn write_source_map(source_map: &[SourceMapItem], path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for item in source_map.iter() {
        writer.write_u32::<Endian>(item.start_line)?;
        writer.write_u32::<Endian>(item.line_count)?;
    }
    Ok(())
}
