//! Source position tracking, threaded through every stage (lexer
//! through diagnostics) the way the teacher threads `pest::Span`
//! through `vasm`. We roll our own since the lexer here is
//! hand-written rather than `pest`-generated (see `DESIGN.md`).

use std::rc::Rc;

/// Identifies a source unit (a file, after `INSERT-FILE` splicing has
/// already happened the splice site's unit takes over authorship of
/// the spliced range — see `preprocessor::splice_insert_files`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: Rc<str>,
}

/// A half-open byte range `[start, end)` into a `SourceUnit`, plus the
/// 1-based line/column of `start` for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub unit: Rc<SourceUnit>,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(unit: Rc<SourceUnit>, start: usize, end: usize) -> Span {
        Span { unit, start, end }
    }

    pub fn text(&self) -> &str {
        &self.unit.text[self.start..self.end]
    }

    /// 1-based `(line, column)` of `self.start`.
    pub fn line_col(&self) -> (u32, u32) {
        let mut line = 1u32;
        let mut col = 1u32;
        for ch in self.unit.text[..self.start.min(self.unit.text.len())].chars() {
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Joins two spans from the same unit into the smallest span
    /// covering both (used when a parsed form spans several tokens).
    pub fn join(&self, other: &Span) -> Span {
        debug_assert!(Rc::ptr_eq(&self.unit, &other.unit));
        Span {
            unit: self.unit.clone(),
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}
