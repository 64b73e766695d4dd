//! Grammar table (spec.md §3 "Grammar rule"): a verb plus a sequence
//! of syntax slots and an action routine reference.

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub enum SyntaxSlot {
    /// A direct or indirect object slot, optionally restricted to
    /// objects carrying one of the given attribute numbers.
    Object { attribute_filter: Vec<u8> },
    Preposition(String),
}

pub struct GrammarRule {
    pub verb: String,
    pub slots: Vec<SyntaxSlot>,
    pub action: String,
    pub span: Span,
}

#[derive(Default)]
pub struct GrammarTable {
    rules: Vec<GrammarRule>,
}

impl GrammarTable {
    pub fn new() -> GrammarTable {
        GrammarTable::default()
    }

    pub fn add(&mut self, verb: String, slots: Vec<SyntaxSlot>, action: String, span: Span) -> Result<(), Diagnostic> {
        let object_slots = slots.iter().filter(|s| matches!(s, SyntaxSlot::Object { .. })).count();
        if object_slots > 2 {
            return Err(Diagnostic::new(
                DiagnosticKind::UnsupportedForm,
                span,
                format!("syntax for `{}` has {} object slots; at most two (direct, indirect) are supported", verb, object_slots),
            ));
        }
        self.rules.push(GrammarRule { verb, slots, action, span });
        Ok(())
    }

    pub fn rules_for(&self, verb: &str) -> impl Iterator<Item = &GrammarRule> {
        self.rules.iter().filter(move |r| r.verb.eq_ignore_ascii_case(verb))
    }

    pub fn iter(&self) -> std::slice::Iter<GrammarRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
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
    fn adds_and_looks_up_rules_by_verb() {
        let mut t = GrammarTable::new();
        t.add(
            "TAKE".into(),
            vec![SyntaxSlot::Object { attribute_filter: vec![] }],
            "V-TAKE".into(),
            span(),
        )
        .unwrap();
        assert_eq!(t.rules_for("TAKE").count(), 1);
        assert_eq!(t.rules_for("DROP").count(), 0);
    }

    #[test]
    fn rejects_more_than_two_object_slots() {
        let mut t = GrammarTable::new();
        let slots = vec![
            SyntaxSlot::Object { attribute_filter: vec![] },
            SyntaxSlot::Object { attribute_filter: vec![] },
            SyntaxSlot::Object { attribute_filter: vec![] },
        ];
        assert!(t.add("PUT".into(), slots, "V-PUT".into(), span()).is_err());
    }
}
