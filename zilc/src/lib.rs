//! Compiler front end, semantic analysis, text encoder and code
//! generator for the symbolic adventure-game language this workspace
//! targets.
//!
//! The pipeline runs in the strict phase order lexer → preprocessor →
//! parser → expander → semantic tables → text encoder → code
//! generator, handing a [`zimage`](../zimage/index.html) builder the
//! finished routines, objects, and strings to lay out into an image.
//! Assembling the target VM's own instruction set lives in
//! [`zmachine_isa`](../zmachine_isa/index.html); running the resulting
//! image is out of scope for this workspace (see `DESIGN.md`).

pub mod codegen;
pub mod diag;
pub mod dictionary;
pub mod expand;
pub mod form;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod sema;
pub mod source_map;
pub mod span;
pub mod text;

use std::path::Path;
use std::rc::Rc;

use sema::SymbolTables;
use source_map::{SourceMap, SourceMapItem};
use span::SourceUnit;

pub use diag::{Diagnostic, DiagnosticKind, Diagnostics, Error, Result};

/// The target profile this compiler generates code for. Only one
/// profile is implemented (see `DESIGN.md`'s Open Question decision),
/// but `VERSION?` in `%<COND>` blocks is checked against this name.
pub const TARGET_PROFILE: &str = "V5";

/// Everything `zimage` needs to lay out and write a finished story
/// file: the semantic tables, the compiled routines, the abbreviations
/// chosen for them, and the source map (one entry per expanded file,
/// mirroring `vasm::assemble`'s `(Executable, SourceMap)` pair).
pub struct CompileOutput {
    pub tables: SymbolTables,
    pub program: codegen::CompiledProgram,
    pub abbreviations: Vec<String>,
    /// One entry per compiled routine, coarse at routine granularity
    /// (`vasm::source_map` maps per instruction; this compiler's
    /// `zimage` only needs enough to point a debugger at a routine).
    pub source_map: SourceMap,
}

/// Runs the full pipeline — lexer → preprocessor → parser → expander →
/// text corpus/abbreviations → code generator — the same phase order
/// `vasm::assemble`/`assemble_parsed` threads `.data` and
/// `.instructions` processing through a single entry point.
///
/// `name` labels the root source unit for diagnostics; `base_dir` is
/// where `INSERT-FILE` targets resolve relative paths against.
/// `select_abbreviations` mirrors spec.md §9's "abbreviation selection
/// is optional": pass `false` to skip the corpus scan entirely (every
/// string is encoded in full, matching a minimal-profile build).
pub fn compile(source: &str, name: &str, base_dir: &Path, select_abbreviations: bool) -> Result<CompileOutput> {
    let unit = Rc::new(SourceUnit {
        name: name.to_string(),
        text: Rc::from(source),
    });
    let forms = parser::parse(unit)?;

    let mut pre = preprocessor::Preprocessor::new(&preprocessor::OsFileLoader, TARGET_PROFILE);
    let forms = pre.expand_forms(forms, base_dir)?;

    let expand::ExpandOutput { mut tables, .. } = expand::expand_program(forms);
    std::mem::take(&mut tables.diagnostics).check()?;

    let abbreviations = if select_abbreviations {
        text::select_abbreviations(&routine_string_corpus(&tables), zmachine_isa::constants::MAX_ABBREVIATIONS)
    } else {
        Vec::new()
    };

    let (program, diagnostics) = codegen::compile(&tables, &abbreviations);
    diagnostics.check()?;

    let source_map: SourceMap = tables
        .routines
        .iter()
        .map(|r| SourceMapItem::from_span(&r.span))
        .collect();

    Ok(CompileOutput {
        tables,
        program,
        abbreviations,
        source_map,
    })
}

/// Every literal string a `TELL` form prints, scanned across every
/// registered routine, feeding `text::select_abbreviations`'s corpus.
fn routine_string_corpus(tables: &SymbolTables) -> Vec<String> {
    let mut corpus = Vec::new();
    for routine in tables.routines.iter() {
        for stmt in &routine.body {
            collect_strings(stmt, &mut corpus);
        }
    }
    corpus
}

fn collect_strings(node: &form::Form, out: &mut Vec<String>) {
    use form::FormKind;
    match &node.kind {
        FormKind::Str(s) => out.push(s.to_string()),
        FormKind::Form { head, args } => {
            collect_strings(head, out);
            for a in args {
                collect_strings(a, out);
            }
        }
        FormKind::List(items) | FormKind::Vector(items) | FormKind::Segment(items) => {
            for a in items {
                collect_strings(a, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn base_dir() -> PathBuf {
        PathBuf::from(".")
    }

    #[test]
    fn compiles_a_hello_world_routine() {
        let out = compile(r#"<ROUTINE GO () <TELL "Hello, world!" CR>>"#, "hello.zil", &base_dir(), false).unwrap();
        assert_eq!(out.program.routines.len(), 1);
        assert_eq!(out.program.routines[0].name, "GO");
        assert_eq!(out.source_map.len(), 1);
    }

    #[test]
    fn collects_abbreviations_when_requested() {
        let src = r#"
            <ROUTINE GO ()
                <TELL "the forest is dark" CR>
                <TELL "the forest is quiet" CR>>
        "#;
        let out = compile(src, "forest.zil", &base_dir(), true).unwrap();
        assert!(!out.abbreviations.is_empty());
    }

    #[test]
    fn undefined_symbol_is_reported_before_codegen() {
        let err = compile("<ROUTINE GO () <CALL NOWHERE>>", "bad.zil", &base_dir(), false);
        assert!(err.is_err());
    }
}
