//! Global variable assignment (spec.md §3, variable numbers
//! `GLOBAL_VARIABLE_BASE..=255`).

use std::collections::HashMap;

use zmachine_isa::constants::{GLOBAL_VARIABLE_BASE, GLOBAL_VARIABLE_COUNT};

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::span::Span;

/// A global's initial value, either a plain word or a reference that
/// only resolves to a byte/packed address once `zimage` has placed
/// the referenced table or routine.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalInit {
    Word(u16),
    TableRef(String),
    RoutineRef(String),
}

pub struct GlobalTable {
    by_name: HashMap<String, u16>,
    initial_values: Vec<GlobalInit>,
}

impl Default for GlobalTable {
    fn default() -> GlobalTable {
        GlobalTable {
            by_name: HashMap::new(),
            initial_values: Vec::new(),
        }
    }
}

impl GlobalTable {
    pub fn new() -> GlobalTable {
        GlobalTable::default()
    }

    /// Declares a global with an explicit initial value. Redeclaring
    /// an existing name is a `DuplicateDefinition`.
    pub fn declare(&mut self, name: &str, initial_value: u16, span: &Span) -> Result<u8, Diagnostic> {
        self.declare_with_init(name, GlobalInit::Word(initial_value), span)
    }

    pub fn declare_with_init(&mut self, name: &str, init: GlobalInit, span: &Span) -> Result<u8, Diagnostic> {
        if self.by_name.contains_key(name) {
            return Err(Diagnostic::new(
                DiagnosticKind::DuplicateDefinition,
                span.clone(),
                format!("global `{}` is already defined", name),
            ));
        }
        let index = self.initial_values.len();
        if index >= GLOBAL_VARIABLE_COUNT as usize {
            return Err(Diagnostic::new(
                DiagnosticKind::TableTooLarge,
                span.clone(),
                format!("global table full: cannot declare `{}` (limit is {} globals)", name, GLOBAL_VARIABLE_COUNT),
            ));
        }
        let number = GLOBAL_VARIABLE_BASE + index as u16;
        self.by_name.insert(name.to_string(), number);
        self.initial_values.push(init);
        Ok(number as u8)
    }

    pub fn number_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).map(|&n| n as u8)
    }

    /// The initial contents of the globals region, in variable-number
    /// order, ready for `zimage` to resolve and lay out.
    pub fn initial_values(&self) -> &[GlobalInit] {
        &self.initial_values
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
    fn declares_globals_starting_at_the_base_number() {
        let mut g = GlobalTable::new();
        let n = g.declare("SCORE", 0, &span()).unwrap();
        assert_eq!(n as u16, GLOBAL_VARIABLE_BASE);
    }

    #[test]
    fn redeclaring_a_global_is_an_error() {
        let mut g = GlobalTable::new();
        g.declare("SCORE", 0, &span()).unwrap();
        assert!(g.declare("SCORE", 1, &span()).is_err());
    }

    #[test]
    fn table_ref_initializer_is_preserved_for_layout() {
        let mut g = GlobalTable::new();
        g.declare_with_init("TBL", GlobalInit::TableRef("MYTABLE".into()), &span()).unwrap();
        assert_eq!(g.initial_values()[0], GlobalInit::TableRef("MYTABLE".into()));
    }
}
