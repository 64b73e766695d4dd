//! Writes the 64-byte header (spec.md §6 "Image header"), the one
//! section every other region's address feeds into but which is
//! itself written last, mirroring the teacher's `vex::Executable`
//! header being assembled only once every segment's final size is
//! known.

use byteorder::{BigEndian, WriteBytesExt};
use zmachine_isa::constants::PRIMARY_VERSION;
use zmachine_isa::format;

/// Every value the header records, resolved once layout has placed
/// every section.
pub struct HeaderValues {
    pub release_number: u16,
    pub high_memory_base: u16,
    pub initial_pc: u16,
    pub dictionary_address: u16,
    pub object_table_address: u16,
    pub globals_address: u16,
    pub static_memory_base: u16,
    pub serial_number: [u8; 6],
    pub abbreviations_address: u16,
    pub file_length_words: u16,
}

fn write_field(image: &mut [u8], field: format::HeaderField, value: &[u8]) {
    image[field.offset..field.offset + field.size].copy_from_slice(value);
}

fn write_u16_field(image: &mut [u8], field: format::HeaderField, value: u16) {
    let mut buf = Vec::with_capacity(2);
    buf.write_u16::<BigEndian>(value).expect("writing to a Vec never fails");
    write_field(image, field, &buf);
}

/// Fills in every header field except `CHECKSUM`, which depends on
/// every byte these fields themselves occupy and so must come last.
pub fn write_header(image: &mut [u8], values: &HeaderValues) {
    image[format::VERSION.offset] = PRIMARY_VERSION;
    image[format::FLAGS1.offset] = 0;
    write_u16_field(image, format::RELEASE_NUMBER, values.release_number);
    write_u16_field(image, format::HIGH_MEMORY_BASE, values.high_memory_base);
    write_u16_field(image, format::INITIAL_PC, values.initial_pc);
    write_u16_field(image, format::DICTIONARY_ADDRESS, values.dictionary_address);
    write_u16_field(image, format::OBJECT_TABLE_ADDRESS, values.object_table_address);
    write_u16_field(image, format::GLOBALS_ADDRESS, values.globals_address);
    write_u16_field(image, format::STATIC_MEMORY_BASE, values.static_memory_base);
    image[format::FLAGS2.offset..format::FLAGS2.offset + format::FLAGS2.size].copy_from_slice(&[0, 0]);
    write_field(image, format::SERIAL_NUMBER, &values.serial_number);
    write_u16_field(image, format::ABBREVIATIONS_ADDRESS, values.abbreviations_address);
    write_u16_field(image, format::FILE_LENGTH, values.file_length_words);
}

/// Computes and writes the checksum over the finished image. Must run
/// after [`write_header`] and after every other section's bytes are
/// in their final place.
pub fn finalize_checksum(image: &mut [u8]) {
    let sum = format::checksum(image);
    write_u16_field(image, format::CHECKSUM, sum);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_version_and_release() {
        let mut image = vec![0u8; zmachine_isa::constants::HEADER_SIZE];
        write_header(
            &mut image,
            &HeaderValues {
                release_number: 7,
                high_memory_base: 0x100,
                initial_pc: 0x102,
                dictionary_address: 0x40,
                object_table_address: 0x50,
                globals_address: 0x60,
                static_memory_base: 0x90,
                serial_number: *b"260726",
                abbreviations_address: 0x40,
                file_length_words: 0x80,
            },
        );
        assert_eq!(image[format::VERSION.offset], PRIMARY_VERSION);
        assert_eq!(&image[format::RELEASE_NUMBER.offset..format::RELEASE_NUMBER.offset + 2], &[0, 7]);
        assert_eq!(&image[format::SERIAL_NUMBER.offset..format::SERIAL_NUMBER.offset + 6], b"260726");
    }

    #[test]
    fn checksum_covers_everything_after_the_reserved_prefix() {
        let mut image = vec![0u8; zmachine_isa::constants::HEADER_SIZE + 4];
        image[zmachine_isa::constants::HEADER_SIZE] = 1;
        image[zmachine_isa::constants::HEADER_SIZE + 1] = 2;
        finalize_checksum(&mut image);
        let mut check = vec![0u8; zmachine_isa::constants::HEADER_SIZE + 4];
        check[zmachine_isa::constants::HEADER_SIZE] = 1;
        check[zmachine_isa::constants::HEADER_SIZE + 1] = 2;
        let expected = format::checksum(&check);
        assert_eq!(
            u16::from_be_bytes([image[format::CHECKSUM.offset], image[format::CHECKSUM.offset + 1]]),
            expected
        );
    }
}
