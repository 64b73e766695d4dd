//! Structured diagnostics (spec.md §4.I). The teacher leans on
//! `pest::error::Error<Rule>` as its one error type and a thin
//! `ParseError`/`AssembleError`/`Error` composition on top
//! (`vasm::error`); since our lexer/parser are hand-written there is
//! no `pest::error::Error` to reuse, so `Diagnostic` plays that role
//! directly, carrying the source span itself instead of delegating
//! span-rendering to `pest`.

use std::fmt;

use crate::span::Span;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    LexError,
    ParseError,
    UndefinedSymbol,
    TypeMismatch,
    TooManyLocals,
    BranchOutOfRange,
    PackedAddressUnaligned,
    TableTooLarge,
    DuplicateDefinition,
    MacroRecursion,
    UnsupportedForm,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            kind,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Diagnostic {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (line, col) = self.span.line_col();
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.span.unit.name, line, col, self.kind, self.message
        )?;
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        Ok(())
    }
}

/// An accumulating batch collector (spec.md §7: "batch collect; fail
/// before codegen if any exist"). Parse-time errors are reported
/// individually so the same file can surface more than one mistake in
/// a single run; semantic errors are accumulated here and checked once
/// table-building has finished.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    /// Returns `Err` with all collected diagnostics if any were
    /// recorded, otherwise `Ok(())`.
    pub fn check(self) -> Result<(), Diagnostics> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, diag) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diag)?;
        }
        Ok(())
    }
}

/// The top-level error type returned by `zilc::compile`.
#[derive(Debug)]
pub enum Error {
    /// One fatal diagnostic (lex/parse, or a codegen/layout error that
    /// aborts compilation immediately rather than batching).
    Fatal(Diagnostic),
    /// A batch of semantic diagnostics collected before codegen.
    Batch(Diagnostics),
    /// An I/O failure while resolving `INSERT-FILE`.
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl From<Diagnostic> for Error {
    fn from(diag: Diagnostic) -> Error {
        Error::Fatal(diag)
    }
}

impl From<Diagnostics> for Error {
    fn from(diags: Diagnostics) -> Error {
        Error::Batch(diags)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Fatal(d) => write!(f, "{}", d),
            Error::Batch(ds) => write!(f, "{}", ds),
            Error::Io { path, source } => {
                write!(f, "I/O error resolving \"{}\": {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
