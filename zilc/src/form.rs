//! The form tree (spec.md §3 "Form", §4.C Parser).
//!
//! Grounded in the same shape as the teacher's `ParsedInstruction`
//! tree in `vasm::instructions` (a small tagged enum carrying spans
//! for later diagnostics) but generalized from "one instruction
//! variant per assembler mnemonic" to the fully general S-expression
//! shapes the source language allows.

use std::rc::Rc;

use crate::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub enum FormKind {
    /// A bare symbol/atom, e.g. `FOO`. Stored uppercased (names are
    /// case-insensitive ASCII, canonical uppercase per spec.md §3).
    Atom(Rc<str>),
    Integer(i32),
    Str(Rc<str>),
    /// `.NAME` — local variable reference.
    LocalRef(Rc<str>),
    /// `,NAME` — global variable reference.
    GlobalRef(Rc<str>),
    /// `(a b c)` — a plain list, not callable.
    List(Vec<Form>),
    /// `[a b c]` — a vector literal.
    Vector(Vec<Form>),
    /// `{...}` — a template segment, used during macro substitution.
    Segment(Vec<Form>),
    /// `<head arg*>` — a callable form. `head` is almost always an
    /// `Atom`, but quasiquote/splice markers can leave other kinds in
    /// macro templates prior to substitution.
    Form {
        head: Box<Form>,
        args: Vec<Form>,
    },
    /// `` `form `` — quasiquote marker (macro templates only).
    Quasiquote(Box<Form>),
    /// `~form` — unquote marker (macro templates only).
    Unquote(Box<Form>),
    /// `~!form` — unquote-splice marker (macro templates only).
    UnquoteSplice(Box<Form>),
}

#[derive(Clone, Debug)]
pub struct Form {
    pub kind: FormKind,
    pub span: Span,
}

impl Form {
    pub fn new(kind: FormKind, span: Span) -> Form {
        Form { kind, span }
    }

    pub fn atom(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// If this is a `Form` (angle-bracket callable), returns its head
    /// atom uppercased, e.g. `"ROUTINE"`, `"COND"`, `"+"`.
    pub fn head_atom(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Form { head, .. } => head.atom(),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Form] {
        match &self.kind {
            FormKind::Form { args, .. } => args,
            FormKind::List(args) | FormKind::Vector(args) | FormKind::Segment(args) => args,
            _ => &[],
        }
    }

    pub fn is_form_named(&self, name: &str) -> bool {
        self.head_atom().map(|h| h.eq_ignore_ascii_case(name)).unwrap_or(false)
    }
}

impl PartialEq for Form {
    fn eq(&self, other: &Form) -> bool {
        self.kind == other.kind
    }
}
