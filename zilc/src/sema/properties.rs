//! Property number assignment and defaults (spec.md §3 "Property",
//! [1, 31]). Table layout (descending order per object, size/number
//! header byte) is a `zimage` concern; this module only owns number
//! assignment and the 31-word defaults table.

use std::collections::HashMap;

use zmachine_isa::constants::{MAX_PROPERTY_VALUE_BYTES, PROPERTY_DEFAULTS_COUNT};

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Word(u16),
    WordList(Vec<u16>),
    Bytes(Vec<u8>),
    /// A string whose packed address isn't known until the text
    /// encoder and layout pass have run; resolved to a `Word` by
    /// `zimage` the same way routine/string call operands are.
    StringRef(String),
}

impl PropertyValue {
    pub fn byte_len(&self) -> usize {
        match self {
            PropertyValue::Word(_) | PropertyValue::StringRef(_) => 2,
            PropertyValue::WordList(words) => words.len() * 2,
            PropertyValue::Bytes(bytes) => bytes.len(),
        }
    }
}

pub struct PropertyTable {
    by_name: HashMap<String, u8>,
    names_by_number: Vec<String>,
    defaults: [u16; PROPERTY_DEFAULTS_COUNT],
}

impl Default for PropertyTable {
    fn default() -> PropertyTable {
        PropertyTable {
            by_name: HashMap::new(),
            names_by_number: Vec::new(),
            defaults: [0; PROPERTY_DEFAULTS_COUNT],
        }
    }
}

impl PropertyTable {
    pub fn new() -> PropertyTable {
        PropertyTable::default()
    }

    pub fn assign(&mut self, name: &str, span: &Span) -> Result<u8, Diagnostic> {
        if let Some(&n) = self.by_name.get(name) {
            return Ok(n);
        }
        let next = self.names_by_number.len();
        if next >= PROPERTY_DEFAULTS_COUNT {
            return Err(Diagnostic::new(
                DiagnosticKind::TableTooLarge,
                span.clone(),
                format!(
                    "property table full: cannot assign a number to `{}` (limit is {} properties)",
                    name, PROPERTY_DEFAULTS_COUNT
                ),
            ));
        }
        let number = (next + 1) as u8;
        self.by_name.insert(name.to_string(), number);
        self.names_by_number.push(name.to_string());
        Ok(number)
    }

    pub fn number_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    /// Records the default word value for `name`, assigning it a
    /// number first if it doesn't already have one.
    pub fn set_default(&mut self, name: &str, value: u16, span: &Span) -> Result<(), Diagnostic> {
        let number = self.assign(name, span)?;
        self.defaults[(number - 1) as usize] = value;
        Ok(())
    }

    pub fn defaults(&self) -> &[u16; PROPERTY_DEFAULTS_COUNT] {
        &self.defaults
    }

    /// Checked constructor for a property's stored value: the primary
    /// profile caps any single property at `MAX_PROPERTY_VALUE_BYTES`
    /// (spec.md §9 Open Question: reject rather than truncate).
    pub fn check_value_size(value: &PropertyValue, span: &Span) -> Result<(), Diagnostic> {
        if value.byte_len() > MAX_PROPERTY_VALUE_BYTES {
            return Err(Diagnostic::new(
                DiagnosticKind::TableTooLarge,
                span.clone(),
                format!(
                    "property value is {} bytes, exceeding the {}-byte limit per property",
                    value.byte_len(),
                    MAX_PROPERTY_VALUE_BYTES
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;
    use crate::span::SourceUnit;

    fn span() -> Span {
        Span::new(Rc::new(SourceUnit { name: "t".into(), text: Rc::from("") }), 0, 0)
    }

    #[test]
    fn assigns_sequential_numbers_starting_at_one() {
        let mut t = PropertyTable::new();
        assert_eq!(t.assign("DESC", &span()).unwrap(), 1);
        assert_eq!(t.assign("CAPACITY", &span()).unwrap(), 2);
    }

    #[test]
    fn set_default_records_into_the_defaults_table() {
        let mut t = PropertyTable::new();
        t.set_default("CAPACITY", 100, &span()).unwrap();
        let n = t.number_of("CAPACITY").unwrap();
        assert_eq!(t.defaults()[(n - 1) as usize], 100);
    }

    #[test]
    fn oversized_value_is_rejected() {
        let value = PropertyValue::Bytes(vec![0; MAX_PROPERTY_VALUE_BYTES + 1]);
        assert!(PropertyTable::check_value_size(&value, &span()).is_err());
    }
}
