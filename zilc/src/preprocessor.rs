//! Preprocessor (spec.md §4.B): `INSERT-FILE` splicing, `SETG`
//! tracking, and compile-time `%`/`%%` evaluation.
//!
//! Operates on the parsed form tree rather than raw tokens — the
//! directives it recognizes (`INSERT-FILE`, `SETG`, `%`, `%%`) are
//! themselves well-formed `<head arg*>` forms, so running after
//! `parser::parse` avoids duplicating bracket-matching logic here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::diag::{Diagnostic, DiagnosticKind, Error, Result};
use crate::form::{Form, FormKind};
use crate::parser;
use crate::span::{SourceUnit, Span};

/// Abstraction over reading `INSERT-FILE` targets so tests can supply
/// an in-memory filesystem instead of touching disk.
pub trait FileLoader {
    fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
}

pub struct OsFileLoader;

impl FileLoader for OsFileLoader {
    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// A closed, tagged compile-time value (spec.md §9 "Dynamic/polymorphic
/// values": integer, atom, string are the subset the preprocessor's
/// evaluator needs; lists/forms pass through `%%<COND>` unevaluated).
#[derive(Clone, Debug, PartialEq)]
pub enum CompileValue {
    Bool(bool),
    Int(i32),
    Str(Rc<str>),
    Atom(Rc<str>),
}

impl CompileValue {
    fn truthy(&self) -> bool {
        match self {
            CompileValue::Bool(b) => *b,
            CompileValue::Int(n) => *n != 0,
            CompileValue::Str(s) => !s.is_empty(),
            CompileValue::Atom(_) => true,
        }
    }

    fn as_int(&self) -> Option<i32> {
        match self {
            CompileValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    fn into_form(self, span: Span) -> Form {
        let kind = match self {
            CompileValue::Bool(true) => FormKind::Atom(Rc::from("T")),
            CompileValue::Bool(false) => FormKind::Atom(Rc::from("FALSE")),
            CompileValue::Int(n) => FormKind::Integer(n),
            CompileValue::Str(s) => FormKind::Str(s),
            CompileValue::Atom(a) => FormKind::Atom(a),
        };
        Form::new(kind, span)
    }
}

pub struct Preprocessor<'a> {
    loader: &'a dyn FileLoader,
    target_version: &'static str,
    globals: HashMap<String, CompileValue>,
    active_files: Vec<PathBuf>,
    depth: u32,
}

const MAX_INSERT_DEPTH: u32 = 64;

impl<'a> Preprocessor<'a> {
    pub fn new(loader: &'a dyn FileLoader, target_version: &'static str) -> Preprocessor<'a> {
        Preprocessor {
            loader,
            target_version,
            globals: HashMap::new(),
            active_files: Vec::new(),
            depth: 0,
        }
    }

    /// Preprocesses an already-parsed top-level form list: splices
    /// `INSERT-FILE`, records `SETG`, and resolves `%`/`%%` forms.
    pub fn expand_forms(&mut self, forms: Vec<Form>, base_dir: &Path) -> Result<Vec<Form>> {
        let mut out = Vec::with_capacity(forms.len());
        for form in forms {
            self.expand_one(form, base_dir, &mut out)?;
        }
        Ok(out)
    }

    fn expand_one(&mut self, form: Form, base_dir: &Path, out: &mut Vec<Form>) -> Result<()> {
        match form.head_atom() {
            Some("INSERT-FILE") => {
                let path = self.insert_file_path(&form, base_dir)?;
                let spliced = self.load_and_expand(&path, &form.span)?;
                out.extend(spliced);
                Ok(())
            }
            Some("SETG") => {
                self.eval_setg(&form)?;
                Ok(())
            }
            Some("%") => {
                let arg = single_arg(&form)?;
                out.push(self.eval_percent(arg, &form.span)?);
                Ok(())
            }
            Some("%%") => {
                let arg = single_arg(&form)?;
                let spliced = self.eval_percent_percent(arg)?;
                out.extend(spliced);
                Ok(())
            }
            _ => {
                out.push(self.expand_nested(form, base_dir)?);
                Ok(())
            }
        }
    }

    /// Recurses into list/vector/form children so `INSERT-FILE`/`%`
    /// forms nested below top level are still resolved (the
    /// preprocessor otherwise only sees what the parser already
    /// flattened to a top-level sequence, but macro bodies and nested
    /// `<...>` forms may carry their own directives).
    fn expand_nested(&mut self, form: Form, base_dir: &Path) -> Result<Form> {
        let span = form.span.clone();
        let kind = match form.kind {
            FormKind::Form { head, args } => FormKind::Form {
                head: Box::new(self.expand_nested(*head, base_dir)?),
                args: self.expand_forms(args, base_dir)?,
            },
            FormKind::List(items) => FormKind::List(self.expand_forms(items, base_dir)?),
            FormKind::Vector(items) => FormKind::Vector(self.expand_forms(items, base_dir)?),
            FormKind::Segment(items) => FormKind::Segment(self.expand_forms(items, base_dir)?),
            other => other,
        };
        Ok(Form::new(kind, span))
    }

    fn insert_file_path(&self, form: &Form, base_dir: &Path) -> Result<PathBuf> {
        let arg = single_arg(form)?;
        match &arg.kind {
            FormKind::Str(name) => Ok(base_dir.join(name.as_ref())),
            _ => Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                arg.span.clone(),
                "INSERT-FILE expects a single string argument",
            )
            .into()),
        }
    }

    fn load_and_expand(&mut self, path: &Path, span: &Span) -> Result<Vec<Form>> {
        self.depth += 1;
        if self.depth > MAX_INSERT_DEPTH || self.active_files.iter().any(|p| p == path) {
            self.depth -= 1;
            return Err(Diagnostic::new(
                DiagnosticKind::MacroRecursion,
                span.clone(),
                format!("INSERT-FILE cycle detected loading \"{}\"", path.display()),
            )
            .into());
        }
        let text = self.loader.read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let unit = Rc::new(SourceUnit {
            name: path.display().to_string(),
            text: Rc::from(text.as_str()),
        });
        self.active_files.push(path.to_path_buf());
        let parsed = parser::parse(unit)?;
        let base_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        let result = self.expand_forms(parsed, &base_dir);
        self.active_files.pop();
        self.depth -= 1;
        result
    }

    fn eval_setg(&mut self, form: &Form) -> Result<()> {
        let args = form.args();
        if args.len() != 2 {
            return Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "SETG expects exactly a name and a value",
            )
            .into());
        }
        let name = args[0]
            .atom()
            .ok_or_else(|| Diagnostic::new(DiagnosticKind::ParseError, args[0].span.clone(), "SETG name must be an atom"))?
            .to_string();
        let value = self.eval(&args[1])?;
        self.globals.insert(name, value);
        Ok(())
    }

    fn eval_percent(&mut self, form: &Form, call_span: &Span) -> Result<Form> {
        if form.is_form_named("COND") {
            return self.eval_cond_splice_single(form);
        }
        let value = self.eval(form)?;
        Ok(value.into_form(call_span.clone()))
    }

    fn eval_percent_percent(&mut self, form: &Form) -> Result<Vec<Form>> {
        if form.is_form_named("COND") {
            return self.eval_cond_splice_many(form);
        }
        self.eval(form)?;
        Ok(Vec::new())
    }

    /// Selects the first clause of `<COND (pred body*) ...>` whose
    /// predicate evaluates truthy and returns its body forms verbatim
    /// (unevaluated) for splicing into the surrounding code.
    fn select_cond_clause(&mut self, cond: &Form) -> Result<Vec<Form>> {
        for clause in cond.args() {
            let parts = clause.args();
            let (pred, body) = parts
                .split_first()
                .ok_or_else(|| Diagnostic::new(DiagnosticKind::ParseError, clause.span.clone(), "empty COND clause"))?;
            if self.eval(pred)?.truthy() {
                return Ok(body.to_vec());
            }
        }
        Ok(Vec::new())
    }

    fn eval_cond_splice_single(&mut self, cond: &Form) -> Result<Form> {
        let body = self.select_cond_clause(cond)?;
        match body.into_iter().last() {
            Some(form) => Ok(form),
            None => Ok(Form::new(FormKind::Atom(Rc::from("FALSE")), cond.span.clone())),
        }
    }

    fn eval_cond_splice_many(&mut self, cond: &Form) -> Result<Vec<Form>> {
        self.select_cond_clause(cond)
    }

    fn eval(&self, form: &Form) -> Result<CompileValue> {
        match &form.kind {
            FormKind::Integer(n) => Ok(CompileValue::Int(*n)),
            FormKind::Str(s) => Ok(CompileValue::Str(s.clone())),
            FormKind::Atom(a) => self.eval_atom(a),
            FormKind::Form { .. } => self.eval_call(form),
            _ => Err(Diagnostic::new(
                DiagnosticKind::UnsupportedForm,
                form.span.clone(),
                "this form cannot be evaluated at compile time",
            )
            .into()),
        }
    }

    fn eval_atom(&self, name: &str) -> Result<CompileValue> {
        match name {
            "T" | "TRUE" => Ok(CompileValue::Bool(true)),
            "FALSE" | "NIL" => Ok(CompileValue::Bool(false)),
            _ => Ok(self
                .globals
                .get(name)
                .cloned()
                .unwrap_or_else(|| CompileValue::Atom(Rc::from(name)))),
        }
    }

    fn eval_call(&self, form: &Form) -> Result<CompileValue> {
        let head = form.head_atom().ok_or_else(|| {
            Diagnostic::new(DiagnosticKind::UnsupportedForm, form.span.clone(), "expected a named form")
        })?;
        let args = form.args();
        match head {
            "GASSIGNED?" => {
                let name = args
                    .get(0)
                    .and_then(|a| a.atom())
                    .ok_or_else(|| Diagnostic::new(DiagnosticKind::ParseError, form.span.clone(), "GASSIGNED? expects a name"))?;
                // Unresolved GASSIGNED? is defined to be false, never an error.
                Ok(CompileValue::Bool(self.globals.contains_key(name)))
            }
            "AND" => {
                for a in args {
                    if !self.eval(a)?.truthy() {
                        return Ok(CompileValue::Bool(false));
                    }
                }
                Ok(CompileValue::Bool(true))
            }
            "OR" => {
                for a in args {
                    if self.eval(a)?.truthy() {
                        return Ok(CompileValue::Bool(true));
                    }
                }
                Ok(CompileValue::Bool(false))
            }
            "NOT" => {
                let v = args
                    .get(0)
                    .ok_or_else(|| Diagnostic::new(DiagnosticKind::ParseError, form.span.clone(), "NOT expects one argument"))?;
                Ok(CompileValue::Bool(!self.eval(v)?.truthy()))
            }
            "VERSION?" => {
                let name = args
                    .get(0)
                    .and_then(|a| a.atom())
                    .ok_or_else(|| Diagnostic::new(DiagnosticKind::ParseError, form.span.clone(), "VERSION? expects a profile name"))?;
                Ok(CompileValue::Bool(name.eq_ignore_ascii_case(self.target_version)))
            }
            "=?" | "N=?" | "L?" | "G?" | "LE?" | "GE?" => self.eval_comparison(head, args, &form.span),
            other => Err(Diagnostic::new(
                DiagnosticKind::UnsupportedForm,
                form.span.clone(),
                format!("unknown compile-time form %{}", other),
            )
            .into()),
        }
    }

    fn eval_comparison(&self, op: &str, args: &[Form], span: &Span) -> Result<CompileValue> {
        if args.len() != 2 {
            return Err(Diagnostic::new(DiagnosticKind::ParseError, span.clone(), format!("{} expects two operands", op)).into());
        }
        let lhs = self.eval(&args[0])?;
        let rhs = self.eval(&args[1])?;
        let ordering = match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    span.clone(),
                    format!("{} requires integer operands", op),
                )
                .into())
            }
        };
        use std::cmp::Ordering::*;
        let result = match op {
            "=?" => ordering == Equal,
            "N=?" => ordering != Equal,
            "L?" => ordering == Less,
            "G?" => ordering == Greater,
            "LE?" => ordering != Greater,
            "GE?" => ordering != Less,
            _ => unreachable!(),
        };
        Ok(CompileValue::Bool(result))
    }
}

fn single_arg(form: &Form) -> Result<&Form> {
    let args = form.args();
    if args.len() != 1 {
        return Err(Diagnostic::new(
            DiagnosticKind::ParseError,
            form.span.clone(),
            format!("{} expects exactly one argument", form.head_atom().unwrap_or("form")),
        )
        .into());
    }
    Ok(&args[0])
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap as Map;

    #[derive(Default)]
    struct MemoryLoader {
        files: Map<PathBuf, String>,
    }

    impl FileLoader for MemoryLoader {
        fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
        }
    }

    fn parse_src(src: &str) -> Vec<Form> {
        let unit = Rc::new(SourceUnit {
            name: "main.zil".into(),
            text: Rc::from(src),
        });
        parser::parse(unit).unwrap()
    }

    #[test]
    fn setg_and_gassigned() {
        let loader = MemoryLoader::default();
        let mut pp = Preprocessor::new(&loader, "V5");
        let forms = parse_src("<SETG FOO 1> %<COND (<GASSIGNED? FOO> 99) (T 0)>");
        let out = pp.expand_forms(forms, Path::new(".")).unwrap();
        assert_eq!(out.last().unwrap().kind, FormKind::Integer(99));
    }

    #[test]
    fn gassigned_unresolved_is_false() {
        let loader = MemoryLoader::default();
        let mut pp = Preprocessor::new(&loader, "V5");
        let forms = parse_src("%<COND (<GASSIGNED? NOPE> 1) (T 2)>");
        let out = pp.expand_forms(forms, Path::new(".")).unwrap();
        assert_eq!(out[0].kind, FormKind::Integer(2));
    }

    #[test]
    fn insert_file_splices_and_detects_cycles() {
        let mut files = Map::new();
        files.insert(PathBuf::from("./a.zil"), "<INSERT-FILE \"b.zil\">".to_string());
        files.insert(PathBuf::from("./b.zil"), "<INSERT-FILE \"a.zil\">".to_string());
        let loader = MemoryLoader { files };
        let mut pp = Preprocessor::new(&loader, "V5");
        let forms = parse_src("<INSERT-FILE \"a.zil\">");
        let result = pp.expand_forms(forms, Path::new("."));
        assert!(result.is_err());
    }

    #[test]
    fn version_predicate() {
        let loader = MemoryLoader::default();
        let mut pp = Preprocessor::new(&loader, "V5");
        let forms = parse_src("%<COND (<VERSION? V5> 1) (T 0)>");
        let out = pp.expand_forms(forms, Path::new(".")).unwrap();
        assert_eq!(out[0].kind, FormKind::Integer(1));
    }

    #[test]
    fn percent_percent_discards_value() {
        let loader = MemoryLoader::default();
        let mut pp = Preprocessor::new(&loader, "V5");
        let forms = parse_src("%%<SETG X 5> A");
        let out = pp.expand_forms(forms, Path::new(".")).unwrap();
        assert_eq!(out, vec![Form::new(FormKind::Atom(Rc::from("A")), out[0].span.clone())]);
        assert_eq!(pp.globals.get("X"), Some(&CompileValue::Int(5)));
    }
}
