//! Associates each assembled instruction with the source line(s) it
//! came from, mirroring `vasm::source_map`'s shape exactly; only the
//! unit that pairs with it (a `Span`'s owning file) is new, since this
//! compiler juggles more than one source file via `INSERT-FILE`.

use crate::span::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct SourceMapItem {
    pub file: String,
    pub start_line: u32,
    pub line_count: u32,
}

impl SourceMapItem {
    pub fn from_span(span: &Span) -> SourceMapItem {
        let (start_line, _) = span.line_col();
        let end_line = Span::new(span.unit.clone(), span.end, span.end).line_col().0;
        SourceMapItem {
            file: span.unit.name.clone(),
            start_line,
            line_count: end_line.saturating_sub(start_line) + 1,
        }
    }
}

pub type SourceMap = Vec<SourceMapItem>;
