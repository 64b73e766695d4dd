//! Numeric constants from spec.md §3 (Data Model invariants) and §6
//! (image header layout). Grounded in the teacher's `constants.rs`,
//! which plays the identical role of centralizing bit widths, masks
//! and offsets rather than scattering magic numbers through codegen.

use std::mem;

use crate::Word;

pub const BYTE_BYTES: u32 = mem::size_of::<u8>() as u32;
pub const BYTE_WIDTH: u32 = 8;

pub const WORD_BYTES: u32 = mem::size_of::<Word>() as u32;
pub const WORD_WIDTH: u32 = WORD_BYTES * BYTE_WIDTH;

/// Locals are numbered 1..15; slot 0 denotes the evaluation stack.
pub const MAX_LOCALS: u8 = 15;

/// Globals occupy variable numbers 16..255.
pub const GLOBAL_VARIABLE_BASE: u16 = 16;
pub const GLOBAL_VARIABLE_COUNT: usize = 240;
pub const GLOBALS_REGION_BYTES: usize = GLOBAL_VARIABLE_COUNT * WORD_BYTES as usize;

/// Objects are numbered 1..255 (primary profile object-id width is one byte).
pub const MAX_OBJECT_NUMBER: u16 = 255;

/// Properties occupy numbers 1..31 (5-bit field in the property header byte).
pub const MAX_PROPERTY_NUMBER: u8 = 31;
pub const PROPERTY_DEFAULTS_COUNT: usize = 31;
pub const PROPERTY_DEFAULTS_BYTES: usize = PROPERTY_DEFAULTS_COUNT * WORD_BYTES as usize;

/// A property value may not exceed this many bytes in the primary profile
/// (spec.md §9 Open Questions: reject rather than silently truncate).
pub const MAX_PROPERTY_VALUE_BYTES: usize = 8;

/// Attributes occupy bit numbers 0..31 of the 32-bit per-object bitfield.
pub const MAX_ATTRIBUTE_NUMBER: u8 = 31;
pub const ATTRIBUTE_BYTES: usize = 4;

/// Size of a single object-table entry (primary profile): 4 bytes
/// attributes + parent + sibling + child + 2-byte property table address.
pub const OBJECT_ENTRY_BYTES: usize = 9;

/// Size of the fixed file header.
pub const HEADER_SIZE: usize = 64;

/// Abbreviations are split into three banks of 32, 96 total, each a packed address.
pub const ABBREVIATION_BANKS: usize = 3;
pub const ABBREVIATIONS_PER_BANK: usize = 32;
pub const MAX_ABBREVIATIONS: usize = ABBREVIATION_BANKS * ABBREVIATIONS_PER_BANK;
pub const ABBREVIATIONS_TABLE_BYTES: usize = MAX_ABBREVIATIONS * WORD_BYTES as usize;

/// Checksum covers every byte from this offset to the end of the file.
pub const CHECKSUM_START_OFFSET: usize = 0x40;

/// The primary profile's version byte (offset 0 of the header).
pub const PRIMARY_VERSION: u8 = 0x03;

/// Dictionary entries are truncated/padded to this many source characters,
/// which encode to exactly two 16-bit words (`DICTIONARY_ENTRY_KEY_WORDS`).
pub const DICTIONARY_WORD_CHARS: usize = 6;
pub const DICTIONARY_ENTRY_KEY_WORDS: usize = 2;
pub const DICTIONARY_ENTRY_KEY_BYTES: usize = DICTIONARY_ENTRY_KEY_WORDS * WORD_BYTES as usize;

/// Maximum byte address expressible by a packed address in the primary
/// profile: `0xFFFF * 2`.
pub const MAX_PACKED_ADDRESS_BYTE: u32 = 0xFFFF * 2;

/// Dictionary entry flags byte: part-of-speech bits (spec.md §3
/// "Dictionary entry"). Bit layout is an implementation choice (the
/// spec only requires that verb entries be distinguishable); kept
/// stable across a compilation so re-encoding round-trips.
pub const DICT_FLAG_VERB: u8 = 0x01;
pub const DICT_FLAG_PREPOSITION: u8 = 0x02;
pub const DICT_FLAG_ADJECTIVE: u8 = 0x04;
pub const DICT_FLAG_DIRECTION: u8 = 0x08;
pub const DICT_FLAG_NOUN: u8 = 0x10;

/// Dictionary entry shape: 4-byte encoded key + 3 data bytes (flags,
/// verb number, pre-action routine index), matching `entry_length − 4`
/// in spec.md §6 "Dictionary header".
pub const DICTIONARY_DATA_BYTES: usize = 3;
pub const DICTIONARY_ENTRY_BYTES: usize = DICTIONARY_ENTRY_KEY_BYTES + DICTIONARY_DATA_BYTES;
