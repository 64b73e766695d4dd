//! Object table (spec.md §3 "Object", [1, 255]; §9 "Cyclic
//! references"). Objects live in a flat `Vec<ObjectDef>` indexed by
//! `number - 1`; parent/sibling/child are resolved by name in a second
//! pass so the tree's natural cycles never need owning pointers.

use std::collections::HashMap;

use zmachine_isa::constants::MAX_OBJECT_NUMBER;

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::sema::properties::PropertyValue;
use crate::span::Span;

pub struct ObjectDef {
    pub name: String,
    pub is_room: bool,
    pub attributes: Vec<u8>,
    pub properties: Vec<(u8, PropertyValue)>,
    /// Name of the declared parent, resolved to a number in pass two.
    pub parent_name: Option<String>,
    pub parent: Option<u16>,
    pub sibling: Option<u16>,
    pub child: Option<u16>,
    pub span: Span,
}

#[derive(Default)]
pub struct ObjectTable {
    rooms: Vec<ObjectDef>,
    objects: Vec<ObjectDef>,
    by_name: HashMap<String, u16>,
}

impl ObjectTable {
    pub fn new() -> ObjectTable {
        ObjectTable::default()
    }

    fn check_duplicate(&self, name: &str, span: &Span) -> Result<(), Diagnostic> {
        if self.by_name.contains_key(name) {
            return Err(Diagnostic::new(
                DiagnosticKind::DuplicateDefinition,
                span.clone(),
                format!("object `{}` is already defined", name),
            ));
        }
        Ok(())
    }

    /// Registers a room or object definition. Numbers are not final
    /// until [`finalize`] runs, since rooms are numbered before
    /// ordinary objects regardless of declaration interleaving.
    pub fn define(
        &mut self,
        name: String,
        is_room: bool,
        attributes: Vec<u8>,
        properties: Vec<(u8, PropertyValue)>,
        parent_name: Option<String>,
        span: Span,
    ) -> Result<(), Diagnostic> {
        self.check_duplicate(&name, &span)?;
        // Reserve the name now so later duplicates are caught even
        // before numbers are assigned.
        self.by_name.insert(name.clone(), 0);
        let def = ObjectDef {
            name,
            is_room,
            attributes,
            properties,
            parent_name,
            parent: None,
            sibling: None,
            child: None,
            span,
        };
        if is_room {
            self.rooms.push(def);
        } else {
            self.objects.push(def);
        }
        Ok(())
    }

    /// Assigns final numbers (rooms first, per spec.md §3 convention)
    /// and resolves parent links by name. Sibling/child chains are
    /// derived from declaration order among objects sharing a parent,
    /// matching how the source language builds the object tree
    /// implicitly from nesting.
    pub fn finalize(mut self) -> Result<Vec<ObjectDef>, Diagnostic> {
        let mut all: Vec<ObjectDef> = Vec::with_capacity(self.rooms.len() + self.objects.len());
        all.append(&mut self.rooms);
        all.append(&mut self.objects);

        if all.len() > MAX_OBJECT_NUMBER as usize {
            return Err(Diagnostic::new(
                DiagnosticKind::TableTooLarge,
                all[MAX_OBJECT_NUMBER as usize].span.clone(),
                format!("object table full: {} objects exceeds the {}-object limit", all.len(), MAX_OBJECT_NUMBER),
            ));
        }

        let mut number_of: HashMap<String, u16> = HashMap::new();
        for (i, def) in all.iter().enumerate() {
            number_of.insert(def.name.clone(), (i + 1) as u16);
        }

        for def in &mut all {
            if let Some(parent_name) = &def.parent_name {
                match number_of.get(parent_name) {
                    Some(&n) => def.parent = Some(n),
                    None => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::UndefinedSymbol,
                            def.span.clone(),
                            format!("object `{}` declares parent `{}`, which is not defined", def.name, parent_name),
                        ))
                    }
                }
            }
        }

        // Build sibling/child chains: for each parent, children are
        // threaded in declaration order, first child becomes the
        // parent's child, rest are chained as siblings.
        let mut first_child: HashMap<u16, u16> = HashMap::new();
        let mut last_child: HashMap<u16, u16> = HashMap::new();
        for i in 0..all.len() {
            let number = (i + 1) as u16;
            let parent = match all[i].parent {
                Some(p) => p,
                None => continue,
            };
            match last_child.get(&parent).copied() {
                Some(prev) => {
                    all[(prev - 1) as usize].sibling = Some(number);
                }
                None => {
                    first_child.insert(parent, number);
                }
            }
            last_child.insert(parent, number);
        }
        for (parent, child) in first_child {
            all[(parent - 1) as usize].child = Some(child);
        }

        Ok(all)
    }
}

/// Builds a name→number lookup from a finalized object list, for
/// resolving object references encountered later during code
/// generation (e.g. `<GOTO room-name>`).
pub fn number_index(objects: &[ObjectDef]) -> HashMap<String, u16> {
    objects
        .iter()
        .enumerate()
        .map(|(i, def)| (def.name.clone(), (i + 1) as u16))
        .collect()
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
    fn rooms_are_numbered_before_objects() {
        let mut t = ObjectTable::new();
        t.define("LAMP".into(), false, vec![], vec![], None, span()).unwrap();
        t.define("FOREST".into(), true, vec![], vec![], None, span()).unwrap();
        let all = t.finalize().unwrap();
        assert_eq!(all[0].name, "FOREST");
        assert_eq!(all[1].name, "LAMP");
    }

    #[test]
    fn parent_sibling_child_are_resolved() {
        let mut t = ObjectTable::new();
        t.define("FOREST".into(), true, vec![], vec![], None, span()).unwrap();
        t.define("LAMP".into(), false, vec![], vec![], Some("FOREST".into()), span()).unwrap();
        t.define("ROCK".into(), false, vec![], vec![], Some("FOREST".into()), span()).unwrap();
        let all = t.finalize().unwrap();
        let forest = all.iter().find(|o| o.name == "FOREST").unwrap();
        assert_eq!(forest.child, Some(2));
        let lamp = all.iter().find(|o| o.name == "LAMP").unwrap();
        assert_eq!(lamp.sibling, Some(3));
    }

    #[test]
    fn undefined_parent_is_a_diagnostic() {
        let mut t = ObjectTable::new();
        t.define("LAMP".into(), false, vec![], vec![], Some("NOWHERE".into()), span()).unwrap();
        assert!(t.finalize().is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut t = ObjectTable::new();
        t.define("LAMP".into(), false, vec![], vec![], None, span()).unwrap();
        assert!(t.define("LAMP".into(), false, vec![], vec![], None, span()).is_err());
    }
}
