//! Symbol/macro expander (spec.md §4.D): resolves `CONSTANT`,
//! registers `GLOBAL`/`ROUTINE`/`OBJECT`/`ROOM`/`SYNTAX`/`PROPDEF`
//! declarations into the [`SymbolTables`](crate::sema::SymbolTables),
//! and expands `DEFMAC`/`DEFINE` macros to a fixed point.
//!
//! Macro templates use the parser's quasiquote/unquote/splice markers
//! (`` ` ``, `~`, `~!`) the same way the teacher's `labels::LabelTable`
//! separates "first sight claims a slot" from "later uses just look
//! it up" — a macro's parameter names are bound positionally from the
//! call site and substituted into the template tree.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::form::{Form, FormKind};
use crate::sema::properties::PropertyValue;
use crate::sema::routines::{LocalDef, LocalKind};
use crate::sema::tables::{ElementWidth, LengthPrefix};
use crate::sema::SymbolTables;
use crate::span::Span;
use util::EnumFromStr;
use util_derive::EnumFromStr as DeriveEnumFromStr;

/// The object-spec keywords `OBJECT`/`ROOM` recognize before falling
/// back to treating a spec head as a property name, parsed the same
/// way the teacher's assembler parses mnemonics out of source text
/// (`pair.as_str().to_uppercase().parse()` in
/// `vasm::instructions::process_enum`).
#[derive(DeriveEnumFromStr)]
enum ObjectSpecKeyword {
    IN,
    LOC,
    FLAGS,
    SYNONYM,
    ADJECTIVE,
}

const MAX_MACRO_DEPTH: u32 = 64;

#[derive(Clone, Debug)]
struct MacroDef {
    params: Vec<String>,
    body: Vec<Form>,
}

#[derive(Clone, Debug, Default)]
struct ObjectTemplate {
    /// Property-spec forms (as written in the template) merged ahead
    /// of whatever the invocation supplies.
    default_props: Vec<Form>,
}

/// Output of [`expand_program`]: the populated symbol tables plus the
/// set of words marked ignorable via `BUZZ` (spec.md §4.D "`<BUZZ
/// w…>` — mark words as ignorable").
pub struct ExpandOutput {
    pub tables: SymbolTables,
    pub buzzwords: HashSet<String>,
}

pub fn expand_program(forms: Vec<Form>) -> ExpandOutput {
    let mut ex = Expander::default();
    ex.run(forms);
    ExpandOutput {
        tables: ex.tables,
        buzzwords: ex.buzzwords,
    }
}

#[derive(Default)]
struct Expander {
    tables: SymbolTables,
    macros: HashMap<String, MacroDef>,
    templates: HashMap<String, ObjectTemplate>,
    propdefs: HashSet<String>,
    buzzwords: HashSet<String>,
    package_depth: u32,
    /// Raw object definitions collected in pass one; finalized (and
    /// constants resolved against their numbers) in pass two.
    pending_objects: Vec<PendingObject>,
    pending_globals: Vec<PendingGlobal>,
    /// Verb synonym → canonical verb, from top-level `<SYNONYM verb
    /// synonym…>` forms (spec.md §4.E #6); resolved to a shared verb
    /// number once every `SYNTAX` rule has been seen.
    verb_synonyms: HashMap<String, String>,
}

struct PendingObject {
    name: String,
    is_room: bool,
    attr_names: Vec<String>,
    prop_forms: Vec<(String, Form)>,
    parent_name: Option<String>,
    span: Span,
}

struct PendingGlobal {
    name: String,
    init: Form,
    span: Span,
}

impl Expander {
    fn run(&mut self, forms: Vec<Form>) {
        for form in forms {
            self.expand_top(form);
        }
        self.finish();
    }

    /// Pass two: now that every object/global/table has been seen,
    /// resolve object numbers and fold `CONSTANT` arithmetic for the
    /// globals whose initializer needed an object reference.
    fn finish(&mut self) {
        let pending_objects = std::mem::take(&mut self.pending_objects);
        for obj in pending_objects {
            self.finalize_object(obj);
        }
        let objects = std::mem::take(&mut self.tables.objects);
        match objects.finalize() {
            Ok(list) => {
                self.tables.object_numbers = crate::sema::objects::number_index(&list);
                self.tables.finalized_objects = list;
            }
            Err(d) => self.tables.diagnostics.push(d),
        }

        let pending_globals = std::mem::take(&mut self.pending_globals);
        for g in pending_globals {
            match self.eval_const(&g.init) {
                Ok(value) => {
                    if let Err(d) = self.tables.globals.declare(&g.name, value as u16, &g.span) {
                        self.tables.diagnostics.push(d);
                    }
                }
                Err(d) => self.tables.diagnostics.push(d),
            }
        }
        self.finalize_dictionary();
    }

    /// Assigns verb numbers (spec.md §3 "Dictionary entry": "data
    /// bytes… verb number") once every `SYNTAX` rule is known: each
    /// distinct verb gets the next number in first-seen order, and
    /// every word synonymous with it (via top-level `SYNONYM`) shares
    /// that same number, matching scenario S5 ("verb data byte indexes
    /// the grammar table entry for TAKE").
    fn finalize_dictionary(&mut self) {
        use zmachine_isa::constants::DICT_FLAG_VERB;

        let mut verb_number_of: HashMap<String, u8> = HashMap::new();
        let mut next_number: u8 = 0;
        for rule in self.tables.grammar.iter() {
            if !verb_number_of.contains_key(&rule.verb) {
                verb_number_of.insert(rule.verb.clone(), next_number);
                next_number = next_number.saturating_add(1);
            }
        }
        for (verb, &number) in &verb_number_of {
            let idx = self.tables.dictionary.intern(verb);
            self.tables.dictionary.set_part_of_speech(idx, DICT_FLAG_VERB);
            self.tables.dictionary.set_verb(idx, number, None);
        }
        for (synonym, canonical) in &self.verb_synonyms {
            if let Some(&number) = verb_number_of.get(canonical) {
                let idx = self.tables.dictionary.intern(synonym);
                self.tables.dictionary.set_part_of_speech(idx, DICT_FLAG_VERB);
                self.tables.dictionary.set_verb(idx, number, None);
            }
        }
    }

    /// Top-level `<SYNONYM canonical-verb synonym…>` (spec.md §4.E
    /// #6): registers each synonym to share the canonical verb's
    /// grammar entry once `finalize_dictionary` assigns verb numbers.
    fn handle_verb_synonym(&mut self, form: &Form) {
        let args = form.args();
        if args.len() < 2 {
            return;
        }
        let canonical = match args[0].atom() {
            Some(a) => a.to_string(),
            None => return,
        };
        self.tables.dictionary.intern(&canonical);
        for a in &args[1..] {
            if let Some(word) = a.atom() {
                self.tables.dictionary.intern(word);
                self.verb_synonyms.insert(word.to_string(), canonical.clone());
            }
        }
    }

    fn finalize_object(&mut self, obj: PendingObject) {
        let mut attributes = Vec::new();
        for name in &obj.attr_names {
            match self.tables.attributes.assign(name, &obj.span) {
                Ok(n) => attributes.push(n),
                Err(d) => self.tables.diagnostics.push(d),
            }
        }
        let mut properties = Vec::new();
        for (name, value_form) in &obj.prop_forms {
            match self.tables.properties.assign(name, &obj.span) {
                Ok(number) => match self.property_value(value_form) {
                    Ok(value) => {
                        if let Err(d) = crate::sema::properties::PropertyTable::check_value_size(&value, &obj.span) {
                            self.tables.diagnostics.push(d);
                        } else {
                            properties.push((number, value));
                        }
                    }
                    Err(d) => self.tables.diagnostics.push(d),
                },
                Err(d) => self.tables.diagnostics.push(d),
            }
        }
        if let Err(d) = self.tables.objects.define(
            obj.name,
            obj.is_room,
            attributes,
            properties,
            obj.parent_name,
            obj.span,
        ) {
            self.tables.diagnostics.push(d);
        }
    }

    /// Converts a property-spec value form into a stored
    /// [`PropertyValue`]: a single literal becomes a word, a
    /// parenthesized list becomes a word list, a string becomes a
    /// (later-resolved) string reference.
    fn property_value(&self, form: &Form) -> Result<PropertyValue, Diagnostic> {
        match &form.kind {
            FormKind::Integer(n) => Ok(PropertyValue::Word(*n as u16)),
            FormKind::Str(s) => Ok(PropertyValue::StringRef(s.to_string())),
            FormKind::Atom(a) => match self.tables.object_numbers.get(a.as_ref()) {
                Some(&n) => Ok(PropertyValue::Word(n)),
                None => match self.tables.constants.get(a.as_ref()) {
                    Some(&n) => Ok(PropertyValue::Word(n as u16)),
                    None => Ok(PropertyValue::Word(0)),
                },
            },
            FormKind::List(items) => {
                let mut words = Vec::with_capacity(items.len());
                for item in items {
                    match self.property_value(item)? {
                        PropertyValue::Word(w) => words.push(w),
                        _ => {
                            return Err(Diagnostic::new(
                                DiagnosticKind::TypeMismatch,
                                item.span.clone(),
                                "property list elements must be simple word values",
                            ))
                        }
                    }
                }
                Ok(PropertyValue::WordList(words))
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::UnsupportedForm,
                form.span.clone(),
                "unsupported property value shape",
            )),
        }
    }

    fn expand_top(&mut self, form: Form) {
        if self.package_depth > 0 {
            // Package scoping has no linkage effect in this profile
            // (spec.md §4.D); forms inside still dispatch normally.
        }
        let head = match form.head_atom() {
            Some(h) => h.to_string(),
            None => return,
        };
        match head.as_str() {
            "CONSTANT" => self.handle_constant(&form),
            "GLOBAL" => self.handle_global(&form),
            "ROUTINE" => self.handle_routine(&form),
            "DEFMAC" | "DEFINE" => self.handle_defmac(&form),
            "OBJECT" => self.handle_object(&form, false),
            "ROOM" => self.handle_object(&form, true),
            "OBJECT-TEMPLATE" => self.handle_object_template(&form),
            "SYNTAX" => self.handle_syntax(&form),
            "SYNONYM" => self.handle_verb_synonym(&form),
            "BUZZ" => self.handle_buzz(&form),
            "PROPDEF" => self.handle_propdef(&form),
            "PACKAGE" => self.package_depth += 1,
            "ENDPACKAGE" => self.package_depth = self.package_depth.saturating_sub(1),
            "TABLE" | "ITABLE" | "LTABLE" | "PLTABLE" => {
                // A bare top-level table form has no name; ignore it
                // rather than fail, matching the historical sources'
                // tolerance of stray top-level literals.
            }
            _ => self.expand_unknown(form, &head),
        }
    }

    fn expand_unknown(&mut self, form: Form, head: &str) {
        if let Some(mac) = self.macros.get(head).cloned() {
            match self.instantiate_macro(&form, &mac, 0) {
                Ok(expanded) => self.expand_top(expanded),
                Err(d) => self.tables.diagnostics.push(d),
            }
            return;
        }
        if let Some(template) = self.templates.get(head).cloned() {
            let merged = self.merge_template(&form, &template);
            self.expand_top(merged);
            return;
        }
        self.tables.diagnostics.push(Diagnostic::new(
            DiagnosticKind::UnsupportedForm,
            form.span.clone(),
            format!("unrecognized top-level form `{}`", head),
        ));
    }

    fn merge_template(&self, invocation: &Form, template: &ObjectTemplate) -> Form {
        let mut args = invocation.args().to_vec();
        args.extend(template.default_props.iter().cloned());
        let head = Form::new(FormKind::Atom(Rc::from("OBJECT")), invocation.span.clone());
        Form::new(
            FormKind::Form {
                head: Box::new(head),
                args,
            },
            invocation.span.clone(),
        )
    }

    // --- CONSTANT / GLOBAL -------------------------------------------------

    fn handle_constant(&mut self, form: &Form) {
        let args = form.args();
        if args.len() != 2 {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "CONSTANT expects exactly a name and a value expression",
            ));
            return;
        }
        let name = match args[0].atom() {
            Some(n) => n.to_string(),
            None => {
                self.tables.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseError,
                    args[0].span.clone(),
                    "CONSTANT name must be an atom",
                ));
                return;
            }
        };
        if self.tables.constants.contains_key(&name) {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::DuplicateDefinition,
                form.span.clone(),
                format!("constant `{}` is already defined", name),
            ));
            return;
        }
        match self.eval_const(&args[1]) {
            Ok(value) => {
                self.tables.constants.insert(name, value);
            }
            Err(d) => self.tables.diagnostics.push(d),
        }
    }

    fn handle_global(&mut self, form: &Form) {
        let args = form.args();
        if args.len() < 2 {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "GLOBAL expects a name and an initializer",
            ));
            return;
        }
        let name = match args[0].atom() {
            Some(n) => n.to_string(),
            None => {
                self.tables.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseError,
                    args[0].span.clone(),
                    "GLOBAL name must be an atom",
                ));
                return;
            }
        };
        if let Some(table_name) = self.table_form(&args[1]) {
            // Register the table itself; the global's word is
            // resolved to its address by `zimage`.
            if let Err(d) = self.tables.globals.declare_with_init(
                &name,
                crate::sema::globals::GlobalInit::TableRef(table_name),
                &form.span,
            ) {
                self.tables.diagnostics.push(d);
            }
            return;
        }
        self.pending_globals.push(PendingGlobal {
            name,
            init: args[1].clone(),
            span: form.span.clone(),
        });
    }

    /// If `form` is a `TABLE`/`ITABLE`/`LTABLE`/`PLTABLE` literal,
    /// registers it under a synthetic name and returns that name.
    fn table_form(&mut self, form: &Form) -> Option<String> {
        let head = form.head_atom()?.to_string();
        let (width, pure) = match head.as_str() {
            "TABLE" => (ElementWidth::Word, false),
            "ITABLE" => (ElementWidth::Word, false),
            "LTABLE" => (ElementWidth::Word, false),
            "PLTABLE" => (ElementWidth::Word, true),
            _ => return None,
        };
        let length_prefix = match head.as_str() {
            "LTABLE" | "PLTABLE" => LengthPrefix::Word,
            _ => LengthPrefix::None,
        };
        let mut values = Vec::new();
        for item in form.args() {
            match &item.kind {
                FormKind::Integer(n) => values.push(*n),
                _ => values.push(0),
            }
        }
        let name = format!("$TABLE{}", self.tables.tables.iter().count());
        if let Err(d) = self
            .tables
            .tables
            .declare(name.clone(), width, length_prefix, pure, values, form.span.clone())
        {
            self.tables.diagnostics.push(d);
        }
        Some(name)
    }

    /// Expands `form` to a fixed point if its head names a registered
    /// macro, otherwise returns it unchanged. Constant/global/property
    /// initializers may themselves be macro calls, so every evaluator
    /// below runs its input through this first.
    fn macro_expand(&self, form: &Form) -> Result<Form, Diagnostic> {
        if let Some(head) = form.head_atom() {
            if let Some(mac) = self.macros.get(head) {
                let expanded = self.instantiate_macro(form, mac, 0)?;
                return self.macro_expand(&expanded);
            }
        }
        Ok(form.clone())
    }

    /// Folds a constant-expression form to an integer: literals,
    /// previously-defined constants, known object numbers, and simple
    /// `+ - * /` arithmetic (spec.md §4.D "legal uses include
    /// integers, packed atom references, simple arithmetic").
    fn eval_const(&self, form: &Form) -> Result<i32, Diagnostic> {
        let form = self.macro_expand(form)?;
        match &form.kind {
            FormKind::Integer(n) => Ok(*n),
            FormKind::Atom(a) => {
                if let Some(&v) = self.tables.constants.get(a.as_ref()) {
                    return Ok(v);
                }
                if let Some(&n) = self.tables.object_numbers.get(a.as_ref()) {
                    return Ok(n as i32);
                }
                if let Some(n) = self.tables.attributes.number_of(a) {
                    return Ok(n as i32);
                }
                if let Some(n) = self.tables.properties.number_of(a) {
                    return Ok(n as i32);
                }
                // Forward reference to a routine/object not yet
                // assigned a number: resolved to 0 here; `zimage`
                // fixes up anything that still needs a real packed
                // address at layout time.
                Ok(0)
            }
            FormKind::Form { .. } => {
                let head = form.head_atom().unwrap_or("");
                let args = form.args();
                let values: Result<Vec<i32>, Diagnostic> = args.iter().map(|a| self.eval_const(a)).collect();
                let values = values?;
                match head {
                    "+" => Ok(values.iter().sum()),
                    "-" => Ok(fold_sub(&values)),
                    "*" => Ok(values.iter().product()),
                    "/" => Ok(fold_div(&values)),
                    _ => Err(Diagnostic::new(
                        DiagnosticKind::UnsupportedForm,
                        form.span.clone(),
                        format!("unsupported constant expression `{}`", head),
                    )),
                }
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                form.span.clone(),
                "expected a constant integer expression",
            )),
        }
    }

    // --- ROUTINE -------------------------------------------------------

    fn handle_routine(&mut self, form: &Form) {
        let args = form.args();
        if args.len() < 2 {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "ROUTINE expects a name, a parameter list, and a body",
            ));
            return;
        }
        let name = match args[0].atom() {
            Some(n) => n.to_string(),
            None => {
                self.tables.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseError,
                    args[0].span.clone(),
                    "ROUTINE name must be an atom",
                ));
                return;
            }
        };
        let locals = self.parse_local_list(&args[1]);
        let body = args[2..].to_vec();
        if let Err(d) = self.tables.routines.register(name, locals, body, form.span.clone()) {
            self.tables.diagnostics.push(d);
        }
    }

    fn parse_local_list(&mut self, list: &Form) -> Vec<LocalDef> {
        #[derive(PartialEq)]
        enum Mode {
            Required,
            Optional,
            Aux,
        }
        let mut mode = Mode::Required;
        let mut out = Vec::new();
        for item in list.args() {
            if let Some(a) = item.atom() {
                match a {
                    "OPT" | "OPTIONAL" => {
                        mode = Mode::Optional;
                        continue;
                    }
                    "AUX" | "EXTRA" => {
                        mode = Mode::Aux;
                        continue;
                    }
                    _ => {}
                }
            }
            match (&mode, &item.kind) {
                (Mode::Required, FormKind::Atom(name)) => {
                    out.push(LocalDef::required(name.to_string()));
                }
                (Mode::Optional, FormKind::Atom(name)) => {
                    out.push(LocalDef {
                        name: name.to_string(),
                        kind: LocalKind::Optional(Form::new(FormKind::Integer(0), item.span.clone())),
                    });
                }
                (Mode::Optional, FormKind::List(parts)) if parts.len() == 2 => {
                    if let Some(name) = parts[0].atom() {
                        out.push(LocalDef {
                            name: name.to_string(),
                            kind: LocalKind::Optional(parts[1].clone()),
                        });
                    }
                }
                (Mode::Aux, FormKind::Atom(name)) => {
                    out.push(LocalDef {
                        name: name.to_string(),
                        kind: LocalKind::Aux(Form::new(FormKind::Integer(0), item.span.clone())),
                    });
                }
                (Mode::Aux, FormKind::List(parts)) if parts.len() == 2 => {
                    if let Some(name) = parts[0].atom() {
                        out.push(LocalDef {
                            name: name.to_string(),
                            kind: LocalKind::Aux(parts[1].clone()),
                        });
                    }
                }
                _ => self.tables.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseError,
                    item.span.clone(),
                    "unrecognized routine parameter shape",
                )),
            }
        }
        out
    }

    // --- Macros ----------------------------------------------------------

    fn handle_defmac(&mut self, form: &Form) {
        let args = form.args();
        if args.len() < 2 {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "DEFMAC/DEFINE expects a name, a parameter list, and a body",
            ));
            return;
        }
        let name = match args[0].atom() {
            Some(n) => n.to_string(),
            None => return,
        };
        let params = args[1]
            .args()
            .iter()
            .filter_map(|p| p.atom().map(|s| s.to_string()))
            .collect();
        let body = args[2..].to_vec();
        self.macros.insert(name, MacroDef { params, body });
    }

    fn instantiate_macro(&self, call: &Form, mac: &MacroDef, depth: u32) -> Result<Form, Diagnostic> {
        if depth > MAX_MACRO_DEPTH {
            return Err(Diagnostic::new(
                DiagnosticKind::MacroRecursion,
                call.span.clone(),
                "macro expansion exceeded the maximum recursion depth",
            ));
        }
        let call_args = call.args();
        if call_args.len() != mac.params.len() {
            return Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                call.span.clone(),
                format!(
                    "macro `{}` expects {} argument(s), got {}",
                    call.head_atom().unwrap_or("?"),
                    mac.params.len(),
                    call_args.len()
                ),
            ));
        }
        let bindings: HashMap<String, Form> = mac
            .params
            .iter()
            .cloned()
            .zip(call_args.iter().cloned())
            .collect();
        let instantiated: Vec<Form> = mac.body.iter().map(|f| instantiate(f, &bindings)).collect();
        let result = match instantiated.len() {
            0 => Form::new(FormKind::Atom(Rc::from("FALSE")), call.span.clone()),
            1 => instantiated.into_iter().next().unwrap(),
            _ => {
                let head = Form::new(FormKind::Atom(Rc::from("PROG")), call.span.clone());
                let empty_locals = Form::new(FormKind::List(Vec::new()), call.span.clone());
                let mut args = vec![empty_locals];
                args.extend(instantiated);
                Form::new(
                    FormKind::Form {
                        head: Box::new(head),
                        args,
                    },
                    call.span.clone(),
                )
            }
        };
        // Re-expand in case the template itself called another macro.
        if let Some(head) = result.head_atom() {
            if let Some(inner) = self.macros.get(head) {
                return self.instantiate_macro(&result, inner, depth + 1);
            }
        }
        Ok(result)
    }

    // --- Objects -----------------------------------------------------------

    fn handle_object(&mut self, form: &Form, is_room: bool) {
        let args = form.args();
        if args.is_empty() {
            self.tables.diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseError,
                form.span.clone(),
                "OBJECT/ROOM requires a name",
            ));
            return;
        }
        let name = match args[0].atom() {
            Some(n) => n.to_string(),
            None => {
                self.tables.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseError,
                    args[0].span.clone(),
                    "OBJECT/ROOM name must be an atom",
                ));
                return;
            }
        };
        let mut attr_names = Vec::new();
        let mut prop_forms = Vec::new();
        let mut parent_name = None;
        for spec in &args[1..] {
            let spec_head = match spec.head_atom() {
                Some(h) => h,
                None => continue,
            };
            match spec_head.parse::<ObjectSpecKeyword>() {
                Ok(ObjectSpecKeyword::IN) | Ok(ObjectSpecKeyword::LOC) => {
                    parent_name = spec.args().get(0).and_then(|a| a.atom()).map(|s| s.to_string());
                }
                Ok(ObjectSpecKeyword::FLAGS) => {
                    for a in spec.args() {
                        if let Some(name) = a.atom() {
                            attr_names.push(name.to_string());
                        }
                    }
                }
                Ok(ObjectSpecKeyword::SYNONYM) => {
                    for a in spec.args() {
                        if let Some(word) = a.atom() {
                            let idx = self.tables.dictionary.intern(word);
                            self.tables.dictionary.set_part_of_speech(idx, zmachine_isa::constants::DICT_FLAG_NOUN);
                        }
                    }
                }
                Ok(ObjectSpecKeyword::ADJECTIVE) => {
                    for a in spec.args() {
                        if let Some(word) = a.atom() {
                            let idx = self.tables.dictionary.intern(word);
                            self.tables.dictionary.set_part_of_speech(idx, zmachine_isa::constants::DICT_FLAG_ADJECTIVE);
                        }
                    }
                }
                Err(_) => {
                    if let Some(value) = spec.args().get(0) {
                        prop_forms.push((spec_head.to_string(), value.clone()));
                    } else {
                        prop_forms.push((spec_head.to_string(), Form::new(FormKind::Integer(1), spec.span.clone())));
                    }
                }
            }
        }
        self.pending_objects.push(PendingObject {
            name,
            is_room,
            attr_names,
            prop_forms,
            parent_name,
            span: form.span.clone(),
        });
    }

    fn handle_object_template(&mut self, form: &Form) {
        let args = form.args();
        let name = match args.get(0).and_then(|a| a.atom()) {
            Some(n) => n.to_string(),
            None => return,
        };
        self.templates.insert(
            name,
            ObjectTemplate {
                default_props: args[1..].to_vec(),
            },
        );
    }

    fn handle_propdef(&mut self, form: &Form) {
        if let Some(name) = form.args().get(0).and_then(|a| a.atom()) {
            self.propdefs.insert(name.to_string());
        }
    }

    // --- Grammar / vocabulary ------------------------------------------

    fn handle_syntax(&mut self, form: &Form) {
        let args = form.args();
        if args.is_empty() {
            return;
        }
        let verb = match args[0].atom() {
            Some(v) => v.to_string(),
            None => return,
        };
        let verb_idx = self.tables.dictionary.intern(&verb);
        self.tables.dictionary.set_part_of_speech(verb_idx, zmachine_isa::constants::DICT_FLAG_VERB);
        let mut slots = Vec::new();
        let mut action = String::new();
        let mut saw_equals = false;
        for item in &args[1..] {
            match item.atom() {
                Some("=") => saw_equals = true,
                Some("OBJECT") => slots.push(crate::sema::grammar::SyntaxSlot::Object { attribute_filter: Vec::new() }),
                Some(word) if saw_equals => action = word.to_string(),
                Some(word) => {
                    let idx = self.tables.dictionary.intern(word);
                    self.tables.dictionary.set_part_of_speech(idx, zmachine_isa::constants::DICT_FLAG_PREPOSITION);
                    slots.push(crate::sema::grammar::SyntaxSlot::Preposition(word.to_string()));
                }
                None => {}
            }
        }
        if let Err(d) = self.tables.grammar.add(verb, slots, action, form.span.clone()) {
            self.tables.diagnostics.push(d);
        }
    }

    fn handle_buzz(&mut self, form: &Form) {
        for a in form.args() {
            if let Some(word) = a.atom() {
                self.buzzwords.insert(word.to_lowercase());
                self.tables.dictionary.intern(word);
            }
        }
    }
}

fn fold_sub(values: &[i32]) -> i32 {
    match values.split_first() {
        Some((first, rest)) if !rest.is_empty() => rest.iter().fold(*first, |acc, v| acc - v),
        Some((first, _)) => -first,
        None => 0,
    }
}

fn fold_div(values: &[i32]) -> i32 {
    match values.split_first() {
        Some((first, rest)) if !rest.is_empty() => rest.iter().fold(*first, |acc, v| if *v == 0 { acc } else { acc / v }),
        Some((first, _)) => *first,
        None => 0,
    }
}

/// Non-quasiquoted substitution: a bare atom matching a macro
/// parameter is replaced outright; everything else is walked
/// recursively so parameter references nested in argument position
/// are substituted too.
fn instantiate(form: &Form, bindings: &HashMap<String, Form>) -> Form {
    match &form.kind {
        FormKind::Atom(name) => bindings.get(name.as_ref()).cloned().unwrap_or_else(|| form.clone()),
        FormKind::Form { head, args } => Form::new(
            FormKind::Form {
                head: Box::new(instantiate(head, bindings)),
                args: instantiate_list(args, bindings),
            },
            form.span.clone(),
        ),
        FormKind::List(items) => Form::new(FormKind::List(instantiate_list(items, bindings)), form.span.clone()),
        FormKind::Vector(items) => Form::new(FormKind::Vector(instantiate_list(items, bindings)), form.span.clone()),
        FormKind::Segment(items) => Form::new(FormKind::Segment(instantiate_list(items, bindings)), form.span.clone()),
        FormKind::Quasiquote(inner) => instantiate_quasi(inner, bindings),
        _ => form.clone(),
    }
}

fn instantiate_list(items: &[Form], bindings: &HashMap<String, Form>) -> Vec<Form> {
    items.iter().map(|f| instantiate(f, bindings)).collect()
}

/// Inside a quasiquoted template, forms are literal unless wrapped in
/// `~`/`~!` (spec.md §4.D "quasiquote (`), unquote (~), splice
/// (~!)").
fn instantiate_quasi(form: &Form, bindings: &HashMap<String, Form>) -> Form {
    match &form.kind {
        FormKind::Unquote(inner) => match inner.atom() {
            Some(name) => bindings.get(name).cloned().unwrap_or_else(|| (**inner).clone()),
            None => instantiate(inner, bindings),
        },
        FormKind::Form { head, args } => Form::new(
            FormKind::Form {
                head: Box::new(instantiate_quasi(head, bindings)),
                args: instantiate_quasi_list(args, bindings),
            },
            form.span.clone(),
        ),
        FormKind::List(items) => Form::new(FormKind::List(instantiate_quasi_list(items, bindings)), form.span.clone()),
        FormKind::Vector(items) => Form::new(FormKind::Vector(instantiate_quasi_list(items, bindings)), form.span.clone()),
        FormKind::Segment(items) => Form::new(FormKind::Segment(instantiate_quasi_list(items, bindings)), form.span.clone()),
        _ => form.clone(),
    }
}

fn instantiate_quasi_list(items: &[Form], bindings: &HashMap<String, Form>) -> Vec<Form> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if let FormKind::UnquoteSplice(inner) = &item.kind {
            if let Some(name) = inner.atom() {
                if let Some(bound) = bindings.get(name) {
                    out.extend(bound.args().iter().cloned());
                    continue;
                }
            }
        }
        out.push(instantiate_quasi(item, bindings));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser;
    use crate::span::SourceUnit;

    fn parse_src(src: &str) -> Vec<Form> {
        let unit = Rc::new(SourceUnit {
            name: "test".into(),
            text: Rc::from(src),
        });
        parser::parse(unit).unwrap()
    }

    #[test]
    fn constant_arithmetic_folds() {
        let forms = parse_src("<CONSTANT X 5> <CONSTANT Y <+ X 2>>");
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        assert_eq!(out.tables.constants.get("Y"), Some(&7));
    }

    #[test]
    fn global_declares_a_slot() {
        let forms = parse_src("<GLOBAL SCORE 0>");
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        assert!(out.tables.globals.number_of("SCORE").is_some());
    }

    #[test]
    fn routine_registers_with_required_and_aux_locals() {
        let forms = parse_src("<ROUTINE ADD (X Y AUX (TOTAL 0)) <SET TOTAL <+ .X .Y>>>");
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        let routine = out.tables.routines.get("ADD").unwrap();
        assert_eq!(routine.locals.len(), 3);
        assert_eq!(routine.required_count(), 2);
    }

    #[test]
    fn object_registers_with_flags_and_parent() {
        let forms = parse_src(
            "<ROOM FOREST (DESC \"Forest\")> <OBJECT COIN (IN FOREST) (FLAGS TAKEBIT)>",
        );
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        assert_eq!(out.tables.finalized_objects.len(), 2);
    }

    #[test]
    fn defmac_expands_at_call_site() {
        let forms = parse_src(
            "<DEFMAC DOUBLE (X) `<+ ~X ~X>> <CONSTANT Z <DOUBLE 3>>",
        );
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        assert_eq!(out.tables.constants.get("Z"), Some(&6));
    }

    #[test]
    fn buzz_marks_words_ignorable() {
        let forms = parse_src("<BUZZ THE A AN>");
        let out = expand_program(forms);
        assert!(out.buzzwords.contains("the"));
        assert!(out.buzzwords.contains("a"));
    }

    #[test]
    fn syntax_registers_a_grammar_rule() {
        let forms = parse_src("<SYNTAX TAKE OBJECT = V-TAKE>");
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        assert_eq!(out.tables.grammar.rules_for("TAKE").count(), 1);
    }

    #[test]
    fn verb_synonyms_share_a_dictionary_verb_number() {
        let forms = parse_src("<SYNTAX TAKE OBJECT = V-TAKE> <SYNONYM TAKE GET PICKUP>");
        let out = expand_program(forms);
        assert!(out.tables.diagnostics.is_empty());
        let take_idx = out.tables.dictionary.entries().iter().position(|e| e.canonical.trim() == "take").unwrap();
        let get_idx = out.tables.dictionary.entries().iter().position(|e| e.canonical.trim() == "get").unwrap();
        let take_number = out.tables.dictionary.entries()[take_idx].verb_number;
        assert!(take_number.is_some());
        assert_eq!(out.tables.dictionary.entries()[get_idx].verb_number, take_number);
    }
}
