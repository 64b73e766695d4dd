//! Image header layout (spec.md §6 "Image header (64 bytes, big-endian)").

/// A field's byte offset and size within the 64-byte header.
#[derive(Clone, Copy, Debug)]
pub struct HeaderField {
    pub offset: usize,
    pub size: usize,
}

macro_rules! header_fields {
    ($($name:ident => ($offset:expr, $size:expr)),* $(,)?) => {
        $(pub const $name: HeaderField = HeaderField { offset: $offset, size: $size };)*
    };
}

header_fields! {
    VERSION            => (0, 1),
    FLAGS1             => (1, 1),
    RELEASE_NUMBER     => (2, 2),
    HIGH_MEMORY_BASE   => (4, 2),
    INITIAL_PC         => (6, 2),
    DICTIONARY_ADDRESS => (8, 2),
    OBJECT_TABLE_ADDRESS => (10, 2),
    GLOBALS_ADDRESS    => (12, 2),
    STATIC_MEMORY_BASE => (14, 2),
    FLAGS2             => (16, 2),
    SERIAL_NUMBER      => (18, 6),
    ABBREVIATIONS_ADDRESS => (24, 2),
    FILE_LENGTH        => (26, 2),
    CHECKSUM           => (28, 2),
    RESERVED           => (30, 34),
}

/// Byte layout of a single object-table entry (primary profile, 9 bytes).
pub mod object_entry {
    pub const ATTRIBUTES_OFFSET: usize = 0;
    pub const ATTRIBUTES_BYTES: usize = 4;
    pub const PARENT_OFFSET: usize = 4;
    pub const SIBLING_OFFSET: usize = 5;
    pub const CHILD_OFFSET: usize = 6;
    pub const PROPERTY_TABLE_ADDRESS_OFFSET: usize = 7;
    pub const ENTRY_BYTES: usize = 9;
}

/// Computes the checksum defined in spec.md §6/§8: unsigned 16-bit sum
/// of every byte from offset `CHECKSUM_START_OFFSET` to the end of the
/// image, wrapping modulo 2^16.
pub fn checksum(image: &[u8]) -> u16 {
    let start = crate::constants::CHECKSUM_START_OFFSET.min(image.len());
    image[start..]
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_wraps() {
        let image = vec![0xFFu8; crate::constants::CHECKSUM_START_OFFSET + 3];
        let sum = checksum(&image);
        assert_eq!(sum, (0xFFu16.wrapping_mul(3)));
    }

    #[test]
    fn header_fields_do_not_overlap() {
        let mut fields = vec![
            VERSION, FLAGS1, RELEASE_NUMBER, HIGH_MEMORY_BASE, INITIAL_PC, DICTIONARY_ADDRESS,
            OBJECT_TABLE_ADDRESS, GLOBALS_ADDRESS, STATIC_MEMORY_BASE, FLAGS2, SERIAL_NUMBER,
            ABBREVIATIONS_ADDRESS, FILE_LENGTH, CHECKSUM, RESERVED,
        ];
        fields.sort_by_key(|f| f.offset);
        for pair in fields.windows(2) {
            assert!(pair[0].offset + pair[0].size <= pair[1].offset);
        }
        let last = fields.last().unwrap();
        assert_eq!(last.offset + last.size, crate::constants::HEADER_SIZE);
    }
}
