use std::{error::Error, fmt};

/// Target VM image fields are stored big-endian (spec.md §6).
pub type Endian = byteorder::BigEndian;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Failed to parse \"{}\" as {}.",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {
    fn description(&self) -> &str {
        "Failed to parse enum."
    }
}

/// Derived by `util_derive::EnumFromStr` for case-sensitive,
/// uppercase-canonical keyword enums (directions, built-in property
/// specs, and the like) parsed out of source-language atoms.
pub trait EnumFromStr: Sized {
    fn from_str(s: &str) -> Result<Self, ParseEnumError>;
}
