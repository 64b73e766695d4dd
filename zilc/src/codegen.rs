//! Code generator (spec.md §4.G): lowers a routine's form tree into
//! the target instruction set ([`zmachine_isa`]).
//!
//! Grounded in the same two-pass shape as the teacher's
//! `vasm::instructions` module: a first pass builds a list of
//! [`Pending`] instructions carrying symbolic branch/jump targets
//! (`vasm`'s `ParsedInstruction::Branch`/`Jump`), a second pass
//! resolves every label to a concrete offset once every instruction's
//! final size is known (`vasm::instructions::{resolve_jump_target,
//! finalize_instruction}`), widening any branch that doesn't fit the
//! compact 6-bit form the same way `vasm` re-casts a jump distance
//! through `NumCast`. Addresses that depend on the finished image
//! (a called routine's packed address) can't be resolved here at all
//! — those are left as [`RoutineFixup`] entries for `zimage` to patch
//! once layout has run.

use std::collections::HashMap;

use zmachine_isa::{Opcode, Operand, OperandCount, Variable};

use crate::diag::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::form::{Form, FormKind};
use crate::sema::routines::RoutineDef;
use crate::sema::SymbolTables;
use crate::span::Span;
use crate::text;

/// A compiled routine's bytecode, ready for `zimage` to place at a
/// packed address and patch with `fixups`.
pub struct CompiledRoutine {
    pub name: String,
    pub locals_count: u8,
    pub code: Vec<u8>,
    pub fixups: Vec<RoutineFixup>,
}

/// A 2-byte placeholder inside `code` that needs the callee's final
/// packed address written over it once every routine has an address.
pub struct RoutineFixup {
    pub offset: usize,
    pub routine: String,
}

pub struct CompiledProgram {
    pub routines: Vec<CompiledRoutine>,
}

/// Compiles every registered routine. `abbreviations` is the corpus-wide
/// selection from `text::select_abbreviations`, applied to inline `TELL`
/// text the same way it will be applied to every other string `zimage`
/// places in high memory.
pub fn compile(tables: &SymbolTables, abbreviations: &[String]) -> (CompiledProgram, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let mut routines = Vec::new();
    for routine in tables.routines.iter() {
        match RoutineCompiler::new(tables, routine, abbreviations).compile() {
            Ok(compiled) => routines.push(compiled),
            Err(d) => diagnostics.push(d),
        }
    }
    (CompiledProgram { routines }, diagnostics)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct LabelId(u32);

enum OperandSlot {
    Value(Operand),
    RoutineAddress(String),
}

/// Where a branch goes once taken: a plain label, or — after
/// `merge_branch_to_rtrue` folds a branch-to-RTRUE pattern — straight
/// to the VM's reserved "return true" branch encoding, skipping the
/// label and the RTRUE instruction entirely.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BranchDest {
    Label(LabelId),
    ReturnTrue,
}

struct PendingBranch {
    dest: BranchDest,
    /// `true`: branch taken when the instruction's test is true.
    sense: bool,
}

enum Pending {
    Instr {
        opcode: Opcode,
        operands: Vec<OperandSlot>,
        store: Option<Variable>,
        branch: Option<PendingBranch>,
    },
    /// Packed z-char words appended verbatim (inline `PRINT` text).
    InlineText(Vec<u16>),
    Label(LabelId),
    Jump(LabelId),
}

/// Lowers one routine's body. A fresh instance is used per routine so
/// label ids and the pending-instruction list never leak across
/// routines.
struct RoutineCompiler<'a> {
    tables: &'a SymbolTables,
    routine: &'a RoutineDef,
    locals: HashMap<String, u8>,
    pending: Vec<Pending>,
    next_label: u32,
    abbreviations: &'a [String],
}

impl<'a> RoutineCompiler<'a> {
    fn new(tables: &'a SymbolTables, routine: &'a RoutineDef, abbreviations: &'a [String]) -> RoutineCompiler<'a> {
        let mut locals = HashMap::new();
        for local in &routine.locals {
            let slot = routine.local_slot(&local.name).unwrap();
            locals.insert(local.name.clone(), slot);
        }
        RoutineCompiler {
            tables,
            routine,
            locals,
            pending: Vec::new(),
            next_label: 0,
            abbreviations,
        }
    }

    fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    fn emit(&mut self, p: Pending) {
        self.pending.push(p);
    }

    fn compile(mut self) -> Result<CompiledRoutine, Diagnostic> {
        let body = self.routine.body.clone();
        let last = body.len().saturating_sub(1);
        for (i, stmt) in body.iter().enumerate() {
            self.lower_statement(stmt, i == last)?;
        }
        // Implicit trailing RTRUE (spec.md §4.G "a routine whose body
        // falls off the end returns true").
        if !matches!(self.pending.last(), Some(Pending::Instr { opcode: Opcode::RTRUE, .. }) | Some(Pending::Instr { opcode: Opcode::RFALSE, .. }) | Some(Pending::Instr { opcode: Opcode::RET, .. })) {
            self.emit(Pending::Instr {
                opcode: Opcode::RTRUE,
                operands: Vec::new(),
                store: None,
                branch: None,
            });
        }
        peephole(&mut self.pending);
        let (code, fixups) = resolve(&self.pending)?;
        Ok(CompiledRoutine {
            name: self.routine.name.clone(),
            locals_count: self.routine.locals.len() as u8,
            code,
            fixups,
        })
    }

    /// Lowers a statement. `tail` marks the routine's last body form,
    /// whose value becomes the routine's implicit return value once
    /// lowered as a final `RETURN` (spec.md §4.G).
    fn lower_statement(&mut self, form: &Form, tail: bool) -> Result<(), Diagnostic> {
        if let Some(head) = form.head_atom() {
            match head {
                "RETURN" => {
                    let value = form.args().get(0);
                    return self.lower_return(value, &form.span);
                }
                "RTRUE" => {
                    self.emit(Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None });
                    return Ok(());
                }
                "RFALSE" => {
                    self.emit(Pending::Instr { opcode: Opcode::RFALSE, operands: vec![], store: None, branch: None });
                    return Ok(());
                }
                "SET" | "SETG" => return self.lower_set(form),
                "COND" => return self.lower_cond(form),
                "REPEAT" => return self.lower_repeat(form),
                "PROG" | "BIND" => return self.lower_prog(form),
                "TELL" => return self.lower_tell(form),
                _ => {
                    if self.lower_plain_statement(form, head)? {
                        return Ok(());
                    }
                }
            }
        }
        // A bare value-producing form in statement position: evaluate
        // for effect and discard (peephole collapses the push/pop when
        // the value was never otherwise observed).
        let value = self.lower_value(form)?;
        if let Operand::Var(Variable::Stack) = value {
            self.emit(Pending::Instr { opcode: Opcode::POP, operands: vec![], store: None, branch: None });
        }
        if tail {
            self.emit(Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None });
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Form>, span: &Span) -> Result<(), Diagnostic> {
        match value {
            None => {
                self.emit(Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None });
                Ok(())
            }
            Some(v) => {
                let operand = self.lower_value(v)?;
                let _ = span;
                self.emit(Pending::Instr {
                    opcode: Opcode::RET,
                    operands: vec![OperandSlot::Value(operand)],
                    store: None,
                    branch: None,
                });
                Ok(())
            }
        }
    }

    fn lower_set(&mut self, form: &Form) -> Result<(), Diagnostic> {
        let args = form.args();
        if args.len() != 2 {
            return Err(Diagnostic::new(DiagnosticKind::ParseError, form.span.clone(), "SET/SETG expects a variable and a value"));
        }
        let name = args[0].atom().ok_or_else(|| {
            Diagnostic::new(DiagnosticKind::ParseError, args[0].span.clone(), "SET target must be a variable name")
        })?;
        let target = self.resolve_variable(name, &args[0].span)?;
        let value = self.lower_value(&args[1])?;
        self.emit(Pending::Instr {
            opcode: Opcode::STORE,
            operands: vec![OperandSlot::Value(Operand::Var(target)), OperandSlot::Value(value)],
            store: None,
            branch: None,
        });
        Ok(())
    }

    fn resolve_variable(&self, name: &str, span: &Span) -> Result<Variable, Diagnostic> {
        if let Some(&slot) = self.locals.get(name) {
            return Ok(Variable::Local(slot));
        }
        if let Some(n) = self.tables.globals.number_of(name) {
            return Ok(Variable::Global(n as u16));
        }
        Err(Diagnostic::new(DiagnosticKind::UndefinedSymbol, span.clone(), format!("`{}` is not a local or global variable", name)))
    }

    fn lower_cond(&mut self, form: &Form) -> Result<(), Diagnostic> {
        let end = self.new_label();
        for clause in form.args() {
            let parts = clause.args();
            if parts.is_empty() {
                continue;
            }
            let is_else = parts[0].atom().map(|a| a == "T" || a == "ELSE").unwrap_or(false);
            if is_else {
                for stmt in &parts[1..] {
                    self.lower_statement(stmt, false)?;
                }
                self.emit(Pending::Jump(end));
                break;
            }
            let body_label = self.new_label();
            let next_label = self.new_label();
            self.compile_test(&parts[0], body_label, true)?;
            self.emit(Pending::Jump(next_label));
            self.emit(Pending::Label(body_label));
            for stmt in &parts[1..] {
                self.lower_statement(stmt, false)?;
            }
            self.emit(Pending::Jump(end));
            self.emit(Pending::Label(next_label));
        }
        self.emit(Pending::Label(end));
        Ok(())
    }

    /// Emits `test`'s evaluation and a branch to `label` taken when
    /// the test's truth value equals `sense`; falls through otherwise.
    fn compile_test(&mut self, test: &Form, label: LabelId, sense: bool) -> Result<(), Diagnostic> {
        if let Some(head) = test.head_atom() {
            match head {
                "NOT" | "N?" => {
                    let inner = test.args().get(0).ok_or_else(|| {
                        Diagnostic::new(DiagnosticKind::ParseError, test.span.clone(), "NOT expects one argument")
                    })?;
                    return self.compile_test(inner, label, !sense);
                }
                // De Morgan's: AND branches on "all true", OR branches
                // on "any true"; negating the sense swaps which of the
                // two needs the short-circuit fallthrough label.
                "AND" => {
                    if sense {
                        return self.compile_all(test.args(), label);
                    } else {
                        return self.compile_any_negated(test.args(), label);
                    }
                }
                "OR" => {
                    if sense {
                        return self.compile_any(test.args(), label);
                    } else {
                        return self.compile_all_negated(test.args(), label);
                    }
                }
                _ => {
                    if let Some(branch_op) = branch_opcode(head) {
                        let operands: Result<Vec<Operand>, Diagnostic> =
                            test.args().iter().map(|a| self.lower_value(a)).collect();
                        let operands = operands?;
                        self.emit(Pending::Instr {
                            opcode: branch_op,
                            operands: operands.into_iter().map(OperandSlot::Value).collect(),
                            store: None,
                            branch: Some(PendingBranch { dest: BranchDest::Label(label), sense }),
                        });
                        return Ok(());
                    }
                }
            }
        }
        // Fall back to treating `test` as a value: branch on whether
        // it's zero/nonzero (spec.md §4.G implicit truthiness).
        let value = self.lower_value(test)?;
        self.emit(Pending::Instr {
            opcode: Opcode::JZ,
            operands: vec![OperandSlot::Value(value)],
            store: None,
            branch: Some(PendingBranch { dest: BranchDest::Label(label), sense: !sense }),
        });
        Ok(())
    }

    /// Branches to `label` when every one of `args` is true.
    fn compile_all(&mut self, args: &[Form], label: LabelId) -> Result<(), Diagnostic> {
        let fallthrough = self.new_label();
        for (i, a) in args.iter().enumerate() {
            if i + 1 == args.len() {
                self.compile_test(a, label, true)?;
            } else {
                self.compile_test(a, fallthrough, false)?;
            }
        }
        self.emit(Pending::Label(fallthrough));
        Ok(())
    }

    /// Branches to `label` when any one of `args` is true.
    fn compile_any(&mut self, args: &[Form], label: LabelId) -> Result<(), Diagnostic> {
        for a in args {
            self.compile_test(a, label, true)?;
        }
        Ok(())
    }

    /// Branches to `label` when every one of `args` is false (negated OR).
    fn compile_all_negated(&mut self, args: &[Form], label: LabelId) -> Result<(), Diagnostic> {
        let skip = self.new_label();
        for (i, a) in args.iter().enumerate() {
            if i + 1 == args.len() {
                self.compile_test(a, label, false)?;
            } else {
                self.compile_test(a, skip, true)?;
            }
        }
        self.emit(Pending::Label(skip));
        Ok(())
    }

    /// Branches to `label` when any one of `args` is false (negated AND).
    fn compile_any_negated(&mut self, args: &[Form], label: LabelId) -> Result<(), Diagnostic> {
        for a in args {
            self.compile_test(a, label, false)?;
        }
        Ok(())
    }

    fn lower_repeat(&mut self, form: &Form) -> Result<(), Diagnostic> {
        let args = form.args();
        let body = if args.is_empty() { &[][..] } else { &args[1..] };
        let top = self.new_label();
        self.emit(Pending::Label(top));
        for stmt in body {
            self.lower_statement(stmt, false)?;
        }
        self.emit(Pending::Jump(top));
        Ok(())
    }

    fn lower_prog(&mut self, form: &Form) -> Result<(), Diagnostic> {
        let args = form.args();
        let body = if args.is_empty() { &[][..] } else { &args[1..] };
        for stmt in body {
            self.lower_statement(stmt, false)?;
        }
        Ok(())
    }

    fn lower_tell(&mut self, form: &Form) -> Result<(), Diagnostic> {
        for part in form.args() {
            match &part.kind {
                FormKind::Str(s) => {
                    let zchars = text::encode_zchars(s, self.abbreviations);
                    let words = text::pack_zchars(&zchars);
                    self.emit(Pending::Instr { opcode: Opcode::PRINT, operands: vec![], store: None, branch: None });
                    self.emit(Pending::InlineText(words));
                }
                FormKind::Atom(a) if a.as_ref() == "CR" || a.as_ref() == "CRLF" => {
                    self.emit(Pending::Instr { opcode: Opcode::NEW_LINE, operands: vec![], store: None, branch: None });
                }
                _ => {
                    let value = self.lower_value(part)?;
                    self.emit(Pending::Instr {
                        opcode: Opcode::PRINT_NUM,
                        operands: vec![OperandSlot::Value(value)],
                        store: None,
                        branch: None,
                    });
                }
            }
        }
        Ok(())
    }

    /// Lowers `form` to a value, emitting whatever instructions are
    /// needed and returning an operand that names where the result
    /// now lives (a literal, a variable, or the stack top after a
    /// store).
    fn lower_value(&mut self, form: &Form) -> Result<Operand, Diagnostic> {
        match &form.kind {
            FormKind::Integer(n) => Ok(Operand::from_literal(*n as u16)),
            FormKind::LocalRef(name) => Ok(Operand::Var(self.resolve_variable(name, &form.span)?)),
            FormKind::GlobalRef(name) => Ok(Operand::Var(self.resolve_variable(name, &form.span)?)),
            FormKind::Atom(a) => self.lower_atom_value(a, &form.span),
            FormKind::Form { .. } => self.lower_call_value(form),
            _ => Err(Diagnostic::new(DiagnosticKind::UnsupportedForm, form.span.clone(), "unsupported value expression")),
        }
    }

    fn lower_atom_value(&self, a: &str, span: &Span) -> Result<Operand, Diagnostic> {
        match a {
            "T" | "TRUE" => return Ok(Operand::from_literal(1)),
            "FALSE" | "NIL" => return Ok(Operand::from_literal(0)),
            _ => {}
        }
        if let Some(&v) = self.tables.constants.get(a) {
            return Ok(Operand::from_literal(v as u16));
        }
        if let Some(&n) = self.tables.object_numbers.get(a) {
            return Ok(Operand::from_literal(n));
        }
        if let Some(n) = self.tables.properties.number_of(a) {
            return Ok(Operand::from_literal(n as u16));
        }
        if let Some(n) = self.tables.attributes.number_of(a) {
            return Ok(Operand::from_literal(n as u16));
        }
        self.resolve_variable(a, span).map(Operand::Var)
    }

    fn lower_call_value(&mut self, form: &Form) -> Result<Operand, Diagnostic> {
        let head = form.head_atom().ok_or_else(|| {
            Diagnostic::new(DiagnosticKind::UnsupportedForm, form.span.clone(), "expected a callable form")
        })?.to_string();
        let args = form.args().to_vec();

        if let Some(opcode) = value_opcode(&head) {
            let operands: Result<Vec<Operand>, Diagnostic> = args.iter().map(|a| self.lower_value(a)).collect();
            let operands = operands?;
            self.emit(Pending::Instr {
                opcode,
                operands: operands.into_iter().map(OperandSlot::Value).collect(),
                store: Some(Variable::Stack),
                branch: None,
            });
            return Ok(Operand::Var(Variable::Stack));
        }
        if branch_opcode(&head).is_some() {
            // A predicate used in value position: materialize its truth
            // value as 1/0 via a small branch-and-store sequence.
            let true_label = self.new_label();
            let end_label = self.new_label();
            self.compile_test(form, true_label, true)?;
            self.emit(Pending::Instr {
                opcode: Opcode::STORE,
                operands: vec![OperandSlot::Value(Operand::Var(Variable::Stack)), OperandSlot::Value(Operand::from_literal(0))],
                store: None,
                branch: None,
            });
            self.emit(Pending::Jump(end_label));
            self.emit(Pending::Label(true_label));
            self.emit(Pending::Instr {
                opcode: Opcode::STORE,
                operands: vec![OperandSlot::Value(Operand::Var(Variable::Stack)), OperandSlot::Value(Operand::from_literal(1))],
                store: None,
                branch: None,
            });
            self.emit(Pending::Label(end_label));
            return Ok(Operand::Var(Variable::Stack));
        }
        if self.tables.routines.contains(&head) {
            let mut operands: Vec<OperandSlot> = vec![OperandSlot::RoutineAddress(head)];
            for a in &args {
                operands.push(OperandSlot::Value(self.lower_value(a)?));
            }
            self.emit(Pending::Instr {
                opcode: Opcode::CALL,
                operands,
                store: Some(Variable::Stack),
                branch: None,
            });
            return Ok(Operand::Var(Variable::Stack));
        }
        Err(Diagnostic::new(
            DiagnosticKind::UndefinedSymbol,
            form.span.clone(),
            format!("`{}` is not a known builtin or routine", head),
        ))
    }
}

/// Builtins that produce a value and store it (2OP/1OP/VAR `stores`
/// opcodes), keyed by their source-language mnemonic.
fn value_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "+" | "ADD" => Opcode::ADD,
        "-" | "SUB" => Opcode::SUB,
        "*" | "MUL" => Opcode::MUL,
        "/" | "DIV" => Opcode::DIV,
        "MOD" => Opcode::MOD,
        "BAND" | "ANDB" => Opcode::AND,
        "BOR" | "ORB" => Opcode::OR,
        "GETP" => Opcode::GET_PROP,
        "GETPT" => Opcode::GET_PROP_ADDR,
        "NEXTP" => Opcode::GET_NEXT_PROP,
        "LOC" => Opcode::GET_PARENT,
        "FIRST?" => Opcode::GET_CHILD,
        "NEXT?" => Opcode::GET_SIBLING,
        "RANDOM" => Opcode::RANDOM,
        "GET" => Opcode::LOADW,
        "GETB" => Opcode::LOADB,
        _ => return None,
    })
}

/// Builtins whose natural encoding is a conditional branch (predicate
/// forms, used either inside `COND` or in value position).
fn branch_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "EQUAL?" | "=?" | "==?" => Opcode::JE,
        "LESS?" | "L?" => Opcode::JL,
        "GRTR?" | "G?" => Opcode::JG,
        "ZERO?" | "0?" => Opcode::JZ,
        "FSET?" => Opcode::TEST_ATTR,
        "IN?" => Opcode::JIN,
        "BTST" => Opcode::TEST,
        _ => None?,
    })
}

/// Statement-position-only builtins with no value (plain 2OP/1OP/VAR
/// opcodes).
fn plain_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "FSET" => Opcode::SET_ATTR,
        "FCLEAR" => Opcode::CLEAR_ATTR,
        "MOVE" => Opcode::INSERT_OBJ,
        "REMOVE" => Opcode::REMOVE_OBJ,
        "PUTP" => Opcode::PUT_PROP,
        "PUT" => Opcode::STOREW,
        "PUTB" => Opcode::STOREB,
        "PRINTD" => Opcode::PRINT_OBJ,
        "PRINTN" => Opcode::PRINT_NUM,
        "INC" => Opcode::INC,
        "DEC" => Opcode::DEC,
        _ => None?,
    })
}

impl<'a> RoutineCompiler<'a> {
    fn lower_plain_statement(&mut self, form: &Form, head: &str) -> Result<bool, Diagnostic> {
        if let Some(opcode) = plain_opcode(head) {
            let operands: Result<Vec<Operand>, Diagnostic> = form.args().iter().map(|a| self.lower_value(a)).collect();
            let operands = operands?;
            self.emit(Pending::Instr {
                opcode,
                operands: operands.into_iter().map(OperandSlot::Value).collect(),
                store: None,
                branch: None,
            });
            return Ok(true);
        }
        Ok(false)
    }
}

/// Three narrow, safe rewrites over the pending instruction list, run
/// once every statement in the routine has been lowered but before
/// branch/jump offsets are resolved against concrete byte positions
/// (so the rewrites can reason about label identity rather than
/// distances):
///
/// - `PUSH x; POP` has no effect beyond evaluating `x`'s operand
///   (never a side-effecting expression, since pushable operands are
///   always literals or plain variable reads), so the pair is dead
///   code.
/// - a `JUMP` whose target label sits immediately after it is a jump
///   to the next byte — a no-op once emitted, so it's dropped before
///   it ever reaches `resolve`.
/// - a branch whose target is a label used nowhere else, itself
///   immediately followed by a bare `RTRUE`, is rewritten to branch
///   straight to the VM's reserved "return true" encoding, and the
///   now-unreachable label/`RTRUE` pair is deleted.
fn peephole(pending: &mut Vec<Pending>) {
    remove_push_pop(pending);
    fold_jump_to_next(pending);
    merge_branch_to_rtrue(pending);
}

fn remove_push_pop(pending: &mut Vec<Pending>) {
    let mut i = 0;
    while i + 1 < pending.len() {
        let remove = matches!(
            (&pending[i], &pending[i + 1]),
            (Pending::Instr { opcode: Opcode::PUSH, .. }, Pending::Instr { opcode: Opcode::POP, .. })
        );
        if remove {
            pending.remove(i + 1);
            pending.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Drops a `Jump(label)` when `label`'s definition is the very next
/// thing in the pending list (other labels may sit at the same
/// position; any of them matching is enough).
fn fold_jump_to_next(pending: &mut Vec<Pending>) {
    let mut i = 0;
    while i < pending.len() {
        let target = match &pending[i] {
            Pending::Jump(label) => Some(*label),
            _ => None,
        };
        let mut removed = false;
        if let Some(label) = target {
            let mut lands_immediately = false;
            let mut j = i + 1;
            while let Some(Pending::Label(id)) = pending.get(j) {
                if *id == label {
                    lands_immediately = true;
                    break;
                }
                j += 1;
            }
            if lands_immediately {
                pending.remove(i);
                removed = true;
            }
        }
        if !removed {
            i += 1;
        }
    }
}

fn label_position(pending: &[Pending], label: LabelId) -> Option<usize> {
    pending.iter().position(|p| matches!(p, Pending::Label(id) if *id == label))
}

/// Counts how many branches/jumps in `pending` target `label`.
fn count_label_refs(pending: &[Pending], label: LabelId) -> usize {
    pending
        .iter()
        .filter(|p| match p {
            Pending::Jump(id) => *id == label,
            Pending::Instr { branch: Some(PendingBranch { dest: BranchDest::Label(id), .. }), .. } => *id == label,
            _ => false,
        })
        .count()
}

/// Folds `branch -> L; ...; L: RTRUE` into a direct branch-to-return-true
/// when `L` has no other references, eliminating the label and the
/// `RTRUE` instruction it guarded.
fn merge_branch_to_rtrue(pending: &mut Vec<Pending>) {
    let mut i = 0;
    while i < pending.len() {
        let label = match &pending[i] {
            Pending::Instr { branch: Some(PendingBranch { dest: BranchDest::Label(id), .. }), .. } => Some(*id),
            _ => None,
        };
        if let Some(label) = label {
            if count_label_refs(pending, label) == 1 {
                if let Some(pos) = label_position(pending, label) {
                    let guards_rtrue = matches!(
                        pending.get(pos + 1),
                        Some(Pending::Instr { opcode: Opcode::RTRUE, operands, store: None, branch: None })
                            if operands.is_empty()
                    );
                    if guards_rtrue {
                        if let Pending::Instr { branch: Some(pb), .. } = &mut pending[i] {
                            pb.dest = BranchDest::ReturnTrue;
                        }
                        pending.remove(pos + 1);
                        pending.remove(pos);
                    }
                }
            }
        }
        i += 1;
    }
}

const SHORT_BRANCH_MAX: i32 = 63;

fn encode_branch(sense: bool, offset: i32, force_wide: bool) -> Vec<u8> {
    if !force_wide && (0..=SHORT_BRANCH_MAX).contains(&offset) {
        vec![(if sense { 0x80 } else { 0 }) | 0x40 | (offset as u8)]
    } else {
        let off = (offset as i32 & 0x3FFF) as u16;
        let b0 = (if sense { 0x80 } else { 0 }) | ((off >> 8) as u8 & 0x3F);
        let b1 = (off & 0xFF) as u8;
        vec![b0, b1]
    }
}

/// A 2OP long form can only signal small-constant vs variable (one
/// bit per operand); a large constant, or more than two operands (a
/// routine-address fixup plus its args), forces the variable-form
/// type byte instead.
fn two_op_needs_var_form(operands: &[OperandSlot]) -> bool {
    operands.len() > 2
        || operands.iter().any(|o| matches!(o, OperandSlot::Value(Operand::Large(_)) | OperandSlot::RoutineAddress(_)))
}

/// The fixed cost, in bytes, of everything in an instruction besides
/// its operands: the opcode-form byte(s), the type byte for VAR-form
/// instructions, and the store-variable byte.
fn fixed_len(opcode: Opcode, operands: &[OperandSlot]) -> usize {
    let opcode_bytes = match opcode.operand_count() {
        OperandCount::Zero | OperandCount::One => 1,
        OperandCount::Two => {
            if two_op_needs_var_form(operands) {
                2
            } else {
                1
            }
        }
        OperandCount::Var => 2,
    };
    let store_bytes = if opcode.shape().stores { 1 } else { 0 };
    opcode_bytes + store_bytes
}

/// Two-pass layout: widen any branch whose offset doesn't fit the
/// compact form, exactly mirroring `vasm`'s jump-distance widening
/// except resolved to a fixed point instead of a single `NumCast`
/// (distances depend on other branches' widths too).
fn resolve(pending: &[Pending]) -> Result<(Vec<u8>, Vec<RoutineFixup>), Diagnostic> {
    let mut wide: Vec<bool> = pending.iter().map(|_| false).collect();
    for _ in 0..pending.len() + 2 {
        let (starts, labels) = layout(pending, &wide);
        let mut changed = false;
        for (i, p) in pending.iter().enumerate() {
            if let Pending::Instr { branch: Some(b), operands, opcode, .. } = p {
                if wide[i] {
                    continue;
                }
                let label = match b.dest {
                    BranchDest::Label(label) => label,
                    // Always encodes to the reserved "return true" offset
                    // (1), which fits the narrow form unconditionally.
                    BranchDest::ReturnTrue => continue,
                };
                let body_len = fixed_len(*opcode, operands)
                    + operands.iter().map(operand_byte_len).sum::<usize>()
                    + 1; // narrow branch byte, widened below if it overflows
                let instr_end = starts[i] + body_len;
                let target = labels[&label] as i32;
                let offset = target - instr_end as i32 + 2;
                if !(0..=SHORT_BRANCH_MAX).contains(&offset) {
                    wide[i] = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let (starts, labels) = layout(pending, &wide);
    let mut code = Vec::new();
    let mut fixups = Vec::new();
    for (i, p) in pending.iter().enumerate() {
        let start = code.len();
        debug_assert_eq!(start, starts[i]);
        match p {
            Pending::Label(_) => {}
            Pending::InlineText(words) => {
                for w in words {
                    code.extend_from_slice(&w.to_be_bytes());
                }
            }
            Pending::Jump(label) => {
                code.push(jump_opcode_byte());
                let target = labels[label] as i32;
                let offset = target - (start as i32 + 3) + 2;
                code.extend_from_slice(&(offset as i16).to_be_bytes());
            }
            Pending::Instr { opcode, operands, store, branch } => {
                write_instruction(&mut code, &mut fixups, *opcode, operands, *store, branch.as_ref(), wide[i], &labels);
            }
        }
    }
    Ok((code, fixups))
}

fn operand_byte_len(op: &OperandSlot) -> usize {
    match op {
        OperandSlot::Value(v) => v.byte_len(),
        OperandSlot::RoutineAddress(_) => 2,
    }
}

fn jump_opcode_byte() -> u8 {
    // 1OP short form, large-constant operand type.
    0b10_00_0000 | Opcode::JUMP.number()
}

fn layout(pending: &[Pending], wide: &[bool]) -> (Vec<usize>, HashMap<LabelId, usize>) {
    let mut lengths = Vec::with_capacity(pending.len());
    let mut offset = 0usize;
    let mut labels = HashMap::new();
    for (i, p) in pending.iter().enumerate() {
        lengths.push(offset);
        let len = match p {
            Pending::Label(id) => {
                labels.insert(*id, offset);
                0
            }
            Pending::InlineText(words) => words.len() * 2,
            Pending::Jump(_) => 3,
            Pending::Instr { opcode, operands, branch, .. } => {
                let mut len = fixed_len(*opcode, operands);
                len += operands.iter().map(operand_byte_len).sum::<usize>();
                if branch.is_some() {
                    len += if wide[i] { 2 } else { 1 };
                }
                len
            }
        };
        offset += len;
    }
    (lengths, labels)
}

fn write_instruction(
    code: &mut Vec<u8>,
    fixups: &mut Vec<RoutineFixup>,
    opcode: Opcode,
    operands: &[OperandSlot],
    store: Option<Variable>,
    branch: Option<&PendingBranch>,
    branch_is_wide: bool,
    labels: &HashMap<LabelId, usize>,
) {
    let resolved: Vec<Operand> = operands
        .iter()
        .map(|o| match o {
            OperandSlot::Value(v) => *v,
            OperandSlot::RoutineAddress(_) => Operand::Large(0),
        })
        .collect();

    match opcode.operand_count() {
        OperandCount::Zero => {
            code.push(0b10_11_0000 | opcode.number());
        }
        OperandCount::One => {
            let op = resolved.get(0).copied().unwrap_or(Operand::from_literal(0));
            let type_bits = op.operand_type().type_bits();
            code.push(0b10_00_0000 | (type_bits << 4) | opcode.number());
        }
        OperandCount::Two => {
            if !two_op_needs_var_form(operands) {
                code.push(0b00_00_0000 | opcode.number());
                code[code.len() - 1] |= short_long_form_bits(&resolved);
            } else {
                code.push(0b11_00_0000 | opcode.number());
                code.push(type_byte(&resolved));
            }
        }
        OperandCount::Var => {
            code.push(0b11_10_0000 | opcode.number());
            code.push(type_byte(&resolved));
        }
    }

    for (i, op) in operands.iter().enumerate() {
        match op {
            OperandSlot::Value(v) => v.write_to(code),
            OperandSlot::RoutineAddress(name) => {
                fixups.push(RoutineFixup { offset: code.len(), routine: name.clone() });
                let _ = i;
                code.extend_from_slice(&0u16.to_be_bytes());
            }
        }
    }

    if let Some(var) = store {
        code.push(var.encode());
    }

    if let Some(b) = branch {
        match b.dest {
            BranchDest::Label(label) => {
                let target = labels[&label] as i32;
                let branch_bytes = if branch_is_wide { 2 } else { 1 };
                let instr_end = code.len() as i32 + branch_bytes;
                let offset = target - instr_end + 2;
                code.extend(encode_branch(b.sense, offset, branch_is_wide));
            }
            // Offset 1 is the VM's reserved "branch taken -> return
            // true" encoding; it needs no label and is always narrow.
            BranchDest::ReturnTrue => code.extend(encode_branch(b.sense, 1, false)),
        }
    }
}

/// Long-form 2OP bit layout: bit6 set if operand 1 is a variable, bit5
/// set if operand 2 is a variable (constants are always assumed small
/// in long form, matching the target's instruction encoding rules).
fn short_long_form_bits(operands: &[Operand]) -> u8 {
    let mut bits = 0u8;
    if let Some(Operand::Var(_)) = operands.get(0) {
        bits |= 0b0100_0000;
    }
    if let Some(Operand::Var(_)) = operands.get(1) {
        bits |= 0b0010_0000;
    }
    bits
}

fn type_byte(operands: &[Operand]) -> u8 {
    let mut byte = 0u8;
    for i in 0..4 {
        let bits = operands.get(i).map(|o| o.operand_type().type_bits()).unwrap_or(0b11);
        byte |= bits << (6 - i * 2);
    }
    byte
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser;
    use crate::sema::routines::LocalDef;
    use crate::span::SourceUnit;
    use std::rc::Rc;

    fn span() -> Span {
        Span::new(Rc::new(SourceUnit { name: "t".into(), text: Rc::from("") }), 0, 0)
    }

    fn parse_one(src: &str) -> Form {
        let unit = Rc::new(SourceUnit { name: "t".into(), text: Rc::from(src) });
        parser::parse(unit).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn rtrue_routine_compiles_to_a_single_instruction() {
        let mut tables = SymbolTables::default();
        tables.routines.register("GO".into(), vec![], vec![parse_one("<RTRUE>")], span()).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        let routine = &program.routines[0];
        assert_eq!(routine.code, vec![0b10_11_0000 | Opcode::RTRUE.number()]);
    }

    #[test]
    fn empty_body_gets_an_implicit_rtrue() {
        let mut tables = SymbolTables::default();
        tables.routines.register("GO".into(), vec![], vec![], span()).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        assert_eq!(program.routines[0].code, vec![0b10_11_0000 | Opcode::RTRUE.number()]);
    }

    #[test]
    fn arithmetic_store_targets_the_stack() {
        let mut tables = SymbolTables::default();
        tables.routines.register(
            "ADD-ONE".into(),
            vec![LocalDef::required("X".into())],
            vec![parse_one("<RETURN <+ .X 1>>")],
            span(),
        ).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        let routine = &program.routines[0];
        assert!(!routine.code.is_empty());
        assert!(routine.fixups.is_empty());
    }

    #[test]
    fn call_to_a_routine_records_a_fixup() {
        let mut tables = SymbolTables::default();
        tables.routines.register("HELPER".into(), vec![], vec![parse_one("<RTRUE>")], span()).unwrap();
        tables.routines.register("GO".into(), vec![], vec![parse_one("<HELPER>")], span()).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        let go = program.routines.iter().find(|r| r.name == "GO").unwrap();
        assert_eq!(go.fixups.len(), 1);
        assert_eq!(go.fixups[0].routine, "HELPER");
    }

    #[test]
    fn repeat_loop_jumps_back_to_its_top() {
        let mut tables = SymbolTables::default();
        tables.routines.register(
            "LOOP".into(),
            vec![],
            vec![parse_one("<REPEAT () <RTRUE>>")],
            span(),
        ).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        assert!(!program.routines[0].code.is_empty());
    }

    #[test]
    fn cond_with_equal_test_branches_to_its_body() {
        let mut tables = SymbolTables::default();
        tables.routines.register(
            "CHECK".into(),
            vec![LocalDef::required("X".into())],
            vec![parse_one("<COND (<EQUAL? .X 1> <RTRUE>) (ELSE <RFALSE>)>")],
            span(),
        ).unwrap();
        let (program, diags) = compile(&tables, &[]);
        assert!(diags.is_empty());
        let code = &program.routines[0].code;
        assert!(!code.is_empty());
        // The `<EQUAL? .X 1> <RTRUE>` clause is a branch-to-RTRUE
        // pattern that `merge_branch_to_rtrue` folds into a direct
        // branch to the VM's reserved "return true" encoding: a short
        // branch byte with offset 1 and the sense bit set, with no
        // separate RTRUE instruction emitted for that clause.
        assert!(code.contains(&0xC1), "expected a short branch-to-return-true byte (0xC1) in {:?}", code);
        let rtrue_byte = 0b10_11_0000 | Opcode::RTRUE.number();
        assert_eq!(code.iter().filter(|&&b| b == rtrue_byte).count(), 1, "only the implicit trailing RTRUE should remain");
    }

    #[test]
    fn fold_jump_to_next_drops_a_jump_landing_on_its_own_label() {
        let label = LabelId(0);
        let mut pending = vec![
            Pending::Jump(label),
            Pending::Label(label),
            Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None },
        ];
        peephole(&mut pending);
        assert!(!pending.iter().any(|p| matches!(p, Pending::Jump(_))));
    }

    #[test]
    fn merge_branch_to_rtrue_rewrites_a_single_use_branch_target() {
        let body = LabelId(0);
        let other = LabelId(1);
        let mut pending = vec![
            Pending::Instr {
                opcode: Opcode::JE,
                operands: vec![],
                store: None,
                branch: Some(PendingBranch { dest: BranchDest::Label(body), sense: true }),
            },
            Pending::Jump(other),
            Pending::Label(body),
            Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None },
        ];
        peephole(&mut pending);
        match &pending[0] {
            Pending::Instr { branch: Some(b), .. } => assert!(matches!(b.dest, BranchDest::ReturnTrue)),
            unexpected => panic!("expected the branch instruction to survive, got {}", match unexpected {
                Pending::Instr { .. } => "Instr",
                Pending::InlineText(_) => "InlineText",
                Pending::Label(_) => "Label",
                Pending::Jump(_) => "Jump",
            }),
        }
        assert!(!pending.iter().any(|p| matches!(p, Pending::Label(id) if *id == body)));
        assert!(!pending.iter().any(|p| matches!(p, Pending::Instr { opcode: Opcode::RTRUE, .. })));
    }

    #[test]
    fn merge_branch_to_rtrue_leaves_a_multiply_referenced_label_alone() {
        let body = LabelId(0);
        let mut pending = vec![
            Pending::Instr {
                opcode: Opcode::JE,
                operands: vec![],
                store: None,
                branch: Some(PendingBranch { dest: BranchDest::Label(body), sense: true }),
            },
            // A second branch sharing the same target keeps the label
            // referenced more than once, so it must survive the fold
            // (a `Jump` here would itself be folded away by
            // `fold_jump_to_next` first, defeating the test).
            Pending::Instr {
                opcode: Opcode::JG,
                operands: vec![],
                store: None,
                branch: Some(PendingBranch { dest: BranchDest::Label(body), sense: true }),
            },
            Pending::Label(body),
            Pending::Instr { opcode: Opcode::RTRUE, operands: vec![], store: None, branch: None },
        ];
        peephole(&mut pending);
        match &pending[0] {
            Pending::Instr { branch: Some(b), .. } => assert!(matches!(b.dest, BranchDest::Label(id) if id == body)),
            _ => panic!("expected the branch instruction to survive"),
        }
        assert!(pending.iter().any(|p| matches!(p, Pending::Label(id) if *id == body)));
        assert!(pending.iter().any(|p| matches!(p, Pending::Instr { opcode: Opcode::RTRUE, .. })));
    }
}
