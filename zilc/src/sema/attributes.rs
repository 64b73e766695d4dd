//! Attribute number assignment (spec.md §3 "Attribute", [0, 31]).
//!
//! Attributes have no separate declaration form in the source
//! language: the first object whose `(FLAGS ...)` property mentions a
//! name claims the next free bit, mirroring how the teacher's
//! `labels::LabelTable` hands out addresses to labels on first sight
//! rather than requiring a predeclaration.

use std::collections::HashMap;

use zmachine_isa::constants::MAX_ATTRIBUTE_NUMBER;

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::span::Span;

#[derive(Default)]
pub struct AttributeTable {
    by_name: HashMap<String, u8>,
    names_by_number: Vec<String>,
}

impl AttributeTable {
    pub fn new() -> AttributeTable {
        AttributeTable::default()
    }

    /// Returns the number assigned to `name`, assigning one on first
    /// use. Errs if every slot in `[0, MAX_ATTRIBUTE_NUMBER]` is taken.
    pub fn assign(&mut self, name: &str, span: &Span) -> Result<u8, Diagnostic> {
        if let Some(&n) = self.by_name.get(name) {
            return Ok(n);
        }
        let next = self.names_by_number.len();
        if next > MAX_ATTRIBUTE_NUMBER as usize {
            return Err(Diagnostic::new(
                DiagnosticKind::TableTooLarge,
                span.clone(),
                format!(
                    "attribute table full: cannot assign a number to `{}` (limit is {} attributes)",
                    name,
                    MAX_ATTRIBUTE_NUMBER + 1
                ),
            ));
        }
        let number = next as u8;
        self.by_name.insert(name.to_string(), number);
        self.names_by_number.push(name.to_string());
        Ok(number)
    }

    pub fn number_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names_by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names_by_number.is_empty()
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
    fn repeated_names_reuse_the_same_number() {
        let mut t = AttributeTable::new();
        let a = t.assign("OPENBIT", &span()).unwrap();
        let b = t.assign("OPENBIT", &span()).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn distinct_names_get_sequential_numbers() {
        let mut t = AttributeTable::new();
        assert_eq!(t.assign("A", &span()).unwrap(), 0);
        assert_eq!(t.assign("B", &span()).unwrap(), 1);
    }

    #[test]
    fn overflow_is_a_diagnostic_not_a_panic() {
        let mut t = AttributeTable::new();
        for i in 0..=MAX_ATTRIBUTE_NUMBER {
            t.assign(&format!("A{}", i), &span()).unwrap();
        }
        assert!(t.assign("ONE_TOO_MANY", &span()).is_err());
    }
}
