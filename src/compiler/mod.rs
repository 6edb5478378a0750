// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Compiles reader output — nested `Value::List` expression trees, the
//! same container type used for runtime data — into
//! [`BytecodeFunction`]s, and wraps the top-level result in a
//! zero-capture VM closure.
//!
//! There is no statement, only expressions: every form compiles to code
//! that leaves exactly one value on the operand stack. A sequence of
//! expressions is joined by `NIL; POP; expr` so the first element needs
//! no special case; a later optimization pass deletes every `NIL`
//! immediately followed by `POP 1`.

mod scope;


pub use scope::{FunctionScope, Resolved};

use core::rc::Rc;

#[cfg(any(test, feature = "std"))]
use std::{string::String, vec::Vec};

#[cfg(not(any(test, feature = "std")))]
use alloc::{string::String, vec::Vec};

use crate::bytecode::{self, op, BytecodeFunction, CaptureSource};
use crate::env::ExecCtx;
use crate::error::{ArborError, LimitKind, SyntaxFormErrorKind};
use crate::heap;
use crate::symtab::SymbolId;
use crate::value::{GcPtr, Value};

/// Per-instruction line/column, carried unless compilation strips debug info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub line: u32,
    pub col: u32,
}

/// Compile-time knobs.
///
/// `standalone` suppresses the implicit `import`/`export` arguments a
/// module body otherwise receives as its first two arguments;
/// `strip_debug_info` drops per-instruction `SourceInfo` from the result.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub standalone: bool,
    pub strip_debug_info: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            standalone: true,
            strip_debug_info: false,
        }
    }
}

const MAX_ARGS: usize = u8::MAX as usize;
const MAX_NAMES: usize = u16::MAX as usize;
const MAX_LABELS: usize = u16::MAX as usize;
const MAX_FUNCTIONS: usize = u8::MAX as usize;
const MAX_INSTRUCTIONS: usize = i16::MAX as usize;

/// Compile `exprs` (already read into `Value::List`/`Value::Symbol`/atom
/// trees) into a zero-capture VM closure allocated in the context's
/// current local zone.
///
/// # Errors
/// Any `core/syntax-error/*`, `core/name-error`, `core/unexpected-type`,
/// `core/wrong-arity`, or `core/limit-reached/*` the program shape
/// provokes.
pub fn compile(ctx: &mut ExecCtx, exprs: &[Value], options: CompileOptions) -> Result<Value, ArborError> {
    let mut compiler = Compiler::new(ctx, options);
    compiler.begin_function();
    if !compiler.options.standalone {
        let import = compiler.sym_import;
        let export = compiler.sym_export;
        compiler.add_argument(import)?;
        compiler.add_argument(export)?;
    }
    compiler.compile_sequence(exprs, SourceInfo::default())?;
    compiler.emit(op::RETURN, 0, 0, SourceInfo::default())?;
    let function = compiler.end_function()?;
    let zone = compiler.ctx.get_local_zone();
    Ok(heap::new_closure(compiler.ctx, zone, Rc::new(function), &[]))
}

struct Compiler<'a, 'env> {
    ctx: &'a mut ExecCtx<'env>,
    scopes: Vec<FunctionScope>,
    options: CompileOptions,
    sym_nil: SymbolId,
    sym_true: SymbolId,
    sym_false: SymbolId,
    sym_import: SymbolId,
    sym_export: SymbolId,
    sym_lt: SymbolId,
    sym_lte: SymbolId,
    sym_gt: SymbolId,
    sym_gte: SymbolId,
    sym_plus: SymbolId,
    sym_minus: SymbolId,
    sym_list: SymbolId,
    sym_put: SymbolId,
    sym_get: SymbolId,
    sym_def: SymbolId,
    sym_set: SymbolId,
    sym_if: SymbolId,
    sym_fn: SymbolId,
    sym_do: SymbolId,
}

impl<'a, 'env> Compiler<'a, 'env> {
    fn new(ctx: &'a mut ExecCtx<'env>, options: CompileOptions) -> Self {
        // Sync this list with reader keyword handling.
        let sym_nil = ctx.env.symtab.intern("nil");
        let sym_true = ctx.env.symtab.intern("true");
        let sym_false = ctx.env.symtab.intern("false");
        let sym_import = ctx.env.symtab.intern("import");
        let sym_export = ctx.env.symtab.intern("export");
        let sym_lt = ctx.env.symtab.intern("<");
        let sym_lte = ctx.env.symtab.intern("<=");
        let sym_gt = ctx.env.symtab.intern(">");
        let sym_gte = ctx.env.symtab.intern(">=");
        let sym_plus = ctx.env.symtab.intern("+");
        let sym_minus = ctx.env.symtab.intern("-");
        let sym_list = ctx.env.symtab.intern("list");
        let sym_put = ctx.env.symtab.intern("put");
        let sym_get = ctx.env.symtab.intern("get");
        let sym_def = ctx.env.symtab.intern("def");
        let sym_set = ctx.env.symtab.intern("set");
        let sym_if = ctx.env.symtab.intern("if");
        let sym_fn = ctx.env.symtab.intern("fn");
        let sym_do = ctx.env.symtab.intern("do");
        Compiler {
            ctx,
            scopes: Vec::new(),
            options,
            sym_nil,
            sym_true,
            sym_false,
            sym_import,
            sym_export,
            sym_lt,
            sym_lte,
            sym_gt,
            sym_gte,
            sym_plus,
            sym_minus,
            sym_list,
            sym_put,
            sym_get,
            sym_def,
            sym_set,
            sym_if,
            sym_fn,
            sym_do,
        }
    }

    fn top_idx(&self) -> usize {
        self.scopes.len() - 1
    }

    fn top(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("at least one function scope active")
    }

    fn begin_function(&mut self) {
        self.scopes.push(FunctionScope::new());
        self.top().begin_local_scope();
    }

    /// Strip `NIL;POP 1` pairs, patch labels, and promote the top scope's
    /// chunk into an immutable [`BytecodeFunction`], popping the scope.
    fn end_function(&mut self) -> Result<BytecodeFunction, ArborError> {
        self.top().end_local_scope();
        let scope = self.scopes.pop().expect("begin_function pushed a scope");

        let (code, source_info) = finalize_instructions(scope.chunk.code, scope.chunk.source_info, scope.next_label)?;

        let num_args = u8::try_from(scope.args.len()).expect("bounded by add_argument");
        let num_captures = u16::try_from(scope.captures.len()).expect("bounded by resolve");

        Ok(BytecodeFunction {
            code,
            constants: scope.chunk.constants,
            functions: scope.subfunctions,
            source_info: if self.options.strip_debug_info { None } else { Some(source_info) },
            num_args,
            variadic: false,
            num_locals: scope.locals_hwm,
            num_captures,
            stack_size: scope.locals_hwm + scope.max_temps,
            origin_filename: String::new(),
        })
    }

    fn emit(&mut self, opcode: u8, operand: u32, temp_delta: i32, info: SourceInfo) -> Result<usize, ArborError> {
        let scope = self.top();
        let offset = scope.chunk.emit(opcode, operand, info);
        scope.cur_temps += temp_delta;
        debug_assert!(scope.cur_temps >= 0, "stack underflow during compilation");
        scope.max_temps = scope.max_temps.max(
            u16::try_from(scope.cur_temps).unwrap_or(u16::MAX),
        );
        if scope.chunk.code_len() > MAX_INSTRUCTIONS {
            return Err(ArborError::LimitReached(LimitKind::MaxInstructions));
        }
        Ok(offset)
    }

    fn add_argument(&mut self, name: SymbolId) -> Result<u16, ArborError> {
        let scope = self.top();
        if scope.args.iter().any(|n| *n == name) {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::DuplicatedNames));
        }
        if scope.args.len() >= MAX_ARGS {
            return Err(ArborError::LimitReached(LimitKind::MaxArguments));
        }
        let index = u16::try_from(scope.args.len()).expect("bounded by MAX_ARGS");
        scope.args.push(name);
        Ok(index)
    }

    fn add_local(&mut self, name: SymbolId) -> Result<u16, ArborError> {
        let scope = self.top();
        if scope.locals.len() >= MAX_NAMES {
            return Err(ArborError::LimitReached(LimitKind::MaxLocals));
        }
        let index = u16::try_from(scope.locals.len()).expect("bounded by MAX_NAMES");
        scope.locals.push(name);
        scope.locals_hwm = scope.locals_hwm.max(index + 1);
        Ok(index)
    }

    fn new_label(&mut self) -> Result<u32, ArborError> {
        let scope = self.top();
        if scope.next_label as usize >= MAX_LABELS {
            return Err(ArborError::LimitReached(LimitKind::MaxLabels));
        }
        Ok(scope.new_label())
    }

    /// Whether `name` currently resolves to a binding (local, arg, or
    /// capture) anywhere in the enclosing function chain. Special forms
    /// and intrinsic operators are only recognized when their name is
    /// *not* shadowed by a binding.
    fn is_bound(&self, name: SymbolId) -> bool {
        fn walk(scopes: &[FunctionScope], idx: usize, name: SymbolId) -> bool {
            if scopes[idx].resolve_here(name).is_some() {
                return true;
            }
            if idx == 0 {
                return false;
            }
            walk(scopes, idx - 1, name)
        }
        walk(&self.scopes, self.top_idx(), name)
    }

    fn resolve(&mut self, name: SymbolId) -> Result<Option<Resolved>, ArborError> {
        let idx = self.top_idx();
        let found = scope::resolve(&mut self.scopes, idx, name);
        for scope in &self.scopes {
            if scope.captures.len() > MAX_NAMES {
                return Err(ArborError::LimitReached(LimitKind::MaxCaptures));
            }
        }
        Ok(found)
    }

    fn compile_sequence(&mut self, exprs: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        self.emit(op::NIL, 0, 1, info)?;
        for expr in exprs {
            self.emit(op::POP, 1, -1, info)?;
            self.compile_expr(*expr, info)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: Value, info: SourceInfo) -> Result<(), ArborError> {
        match expr {
            Value::Symbol(sym) if sym == self.sym_nil => {
                self.emit(op::NIL, 0, 1, info)?;
            }
            Value::Symbol(sym) if sym == self.sym_true => {
                self.emit(op::TRUE, 0, 1, info)?;
            }
            Value::Symbol(sym) if sym == self.sym_false => {
                self.emit(op::FALSE, 0, 1, info)?;
            }
            Value::Int(n) => {
                if let Ok(small) = i16::try_from(n) {
                    self.emit(op::SMALL_INT, u32::from(small as u16), 1, info)?;
                } else {
                    self.compile_constant(expr, info)?;
                }
            }
            Value::Real(_) | Value::Str(_) => {
                self.compile_constant(expr, info)?;
            }
            Value::Symbol(sym) => {
                let resolved = self.resolve(sym)?.ok_or(ArborError::NameError { name: sym })?;
                let (opcode, idx) = resolved_load(resolved);
                self.emit(opcode, u32::from(idx), 1, info)?;
            }
            Value::List(obj) => {
                self.compile_list_expr(obj, info)?;
            }
            _ => {
                return Err(ArborError::UnexpectedType {
                    expected: "list, symbol, int, real, or string",
                    got: expr.type_name(),
                });
            }
        }
        Ok(())
    }

    fn compile_constant(&mut self, value: Value, info: SourceInfo) -> Result<(), ArborError> {
        let idx = self.top().chunk.add_constant(value);
        self.emit(op::CONSTANT, idx, 1, info)?;
        Ok(())
    }

    fn compile_list_expr(&mut self, obj: GcPtr, info: SourceInfo) -> Result<(), ArborError> {
        // SAFETY: obj is the payload of a Value::List, always ObjType::List.
        let elems = unsafe { heap::list_body(obj) }.as_value_vec();
        if elems.is_empty() {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::EmptyList));
        }

        let head = elems[0];
        if let Value::Symbol(sym) = head {
            if !self.is_bound(sym) {
                if sym == self.sym_def {
                    return self.compile_def(&elems, info);
                } else if sym == self.sym_set {
                    return self.compile_set(&elems, info);
                } else if sym == self.sym_if {
                    return self.compile_if(&elems, info);
                } else if sym == self.sym_fn {
                    return self.compile_fn(&elems, info);
                } else if sym == self.sym_do {
                    return self.compile_do(&elems, info);
                } else if sym == self.sym_lt {
                    return self.compile_bin_op(&elems, op::LT, info);
                } else if sym == self.sym_lte {
                    return self.compile_bin_op(&elems, op::LTE, info);
                } else if sym == self.sym_gt {
                    return self.compile_bin_op(&elems, op::GT, info);
                } else if sym == self.sym_gte {
                    return self.compile_bin_op(&elems, op::GTE, info);
                } else if sym == self.sym_plus {
                    return self.compile_plus(&elems, info);
                } else if sym == self.sym_minus {
                    return self.compile_minus(&elems, info);
                } else if sym == self.sym_list {
                    return self.compile_variadic(&elems, op::MAKE_LIST, info);
                } else if sym == self.sym_put {
                    return self.compile_variadic(&elems, op::PUT, info);
                } else if sym == self.sym_get {
                    return self.compile_variadic(&elems, op::GET, info);
                }
            }
        }

        self.compile_call(&elems, info)
    }

    fn compile_call(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        let num_args = elems.len() - 1;
        if num_args > MAX_ARGS {
            return Err(ArborError::LimitReached(LimitKind::MaxArguments));
        }
        for arg in &elems[1..] {
            self.compile_expr(*arg, info)?;
        }
        self.compile_expr(elems[0], info)?;
        self.emit(op::CALL, u32::try_from(num_args).expect("bounded above"), -(num_args as i32), info)?;
        Ok(())
    }

    fn compile_bin_op(&mut self, elems: &[Value], opcode: u8, info: SourceInfo) -> Result<(), ArborError> {
        if elems.len() != 3 {
            return Err(ArborError::WrongArity { expected: 2, got: u8::try_from(elems.len() - 1).unwrap_or(u8::MAX), variadic: false });
        }
        self.compile_expr(elems[1], info)?;
        self.compile_expr(elems[2], info)?;
        self.emit(opcode, 0, -1, info)?;
        Ok(())
    }

    fn compile_plus(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        let argc = elems.len() - 1;
        if argc > MAX_ARGS {
            return Err(ArborError::LimitReached(LimitKind::MaxArguments));
        }
        for arg in &elems[1..] {
            self.compile_expr(*arg, info)?;
        }
        let delta = 1 - argc as i32;
        self.emit(op::PLUS, u32::try_from(argc).expect("bounded above"), delta, info)?;
        Ok(())
    }

    fn compile_minus(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        let argc = elems.len() - 1;
        if argc < 1 {
            return Err(ArborError::WrongArity { expected: 1, got: 0, variadic: true });
        }
        if argc > MAX_ARGS {
            return Err(ArborError::LimitReached(LimitKind::MaxArguments));
        }
        for arg in &elems[1..] {
            self.compile_expr(*arg, info)?;
        }
        if argc == 1 {
            self.emit(op::NEG, 0, 0, info)?;
        } else {
            self.emit(op::SUB, u32::try_from(argc).expect("bounded above"), 1 - argc as i32, info)?;
        }
        Ok(())
    }

    /// `list`/`put`/`get`: every operand compiled in order, one opcode
    /// consuming all of them and producing a single result.
    fn compile_variadic(&mut self, elems: &[Value], opcode: u8, info: SourceInfo) -> Result<(), ArborError> {
        let argc = elems.len() - 1;
        if argc > MAX_ARGS {
            return Err(ArborError::LimitReached(LimitKind::MaxArguments));
        }
        for arg in &elems[1..] {
            self.compile_expr(*arg, info)?;
        }
        let delta = 1 - argc as i32;
        self.emit(opcode, u32::try_from(argc).expect("bounded above"), delta, info)?;
        Ok(())
    }

    fn compile_def(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        let ok = (elems.len() == 2 || elems.len() == 3) && matches!(elems[1], Value::Symbol(_));
        if !ok {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::Def));
        }
        let Value::Symbol(name) = elems[1] else { unreachable!() };
        if elems.len() == 3 {
            self.compile_expr(elems[2], info)?;
        } else {
            self.emit(op::NIL, 0, 1, info)?;
        }
        let index = self.add_local(name)?;
        self.emit(op::SET_LOCAL, u32::from(index), 0, info)?;
        Ok(())
    }

    fn compile_set(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        let ok = elems.len() == 3 && matches!(elems[1], Value::Symbol(_));
        if !ok {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::Set));
        }
        let Value::Symbol(name) = elems[1] else { unreachable!() };
        let resolved = self.resolve(name)?.ok_or(ArborError::NameError { name })?;
        self.compile_expr(elems[2], info)?;
        let (opcode, idx) = resolved_store(resolved);
        self.emit(opcode, u32::from(idx), 0, info)?;
        Ok(())
    }

    fn compile_if(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        if elems.len() != 3 && elems.len() != 4 {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::If));
        }
        let false_label = self.new_label()?;
        let end_label = self.new_label()?;

        self.compile_expr(elems[1], info)?;
        self.emit(op::JUMP_IF_FALSE, false_label, -1, info)?;

        self.compile_expr(elems[2], info)?;
        self.emit(op::JUMP, end_label, 0, info)?;

        self.emit(op::LABEL, false_label, 0, info)?;
        if elems.len() == 4 {
            self.compile_expr(elems[3], info)?;
        } else {
            self.emit(op::NIL, 0, 1, info)?;
        }
        self.emit(op::LABEL, end_label, 0, info)?;
        Ok(())
    }

    fn compile_do(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        self.top().begin_local_scope();
        let result = self.compile_sequence(&elems[1..], info);
        self.top().end_local_scope();
        result
    }

    fn compile_fn(&mut self, elems: &[Value], info: SourceInfo) -> Result<(), ArborError> {
        if elems.len() < 2 {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::Fn));
        }
        let Value::List(arg_list_obj) = elems[1] else {
            return Err(ArborError::SyntaxError(SyntaxFormErrorKind::Fn));
        };
        // SAFETY: arg_list_obj is the payload of a Value::List.
        let arg_names = unsafe { heap::list_body(arg_list_obj) }.as_value_vec();
        let mut arg_syms = Vec::with_capacity(arg_names.len());
        for name in &arg_names {
            let Value::Symbol(sym) = *name else {
                return Err(ArborError::SyntaxError(SyntaxFormErrorKind::Fn));
            };
            arg_syms.push(sym);
        }

        if self.top().subfunctions.len() >= MAX_FUNCTIONS {
            return Err(ArborError::LimitReached(LimitKind::MaxFunctions));
        }

        self.begin_function();
        for sym in arg_syms {
            self.add_argument(sym)?;
        }
        self.compile_sequence(&elems[2..], info)?;
        self.emit(op::RETURN, 0, 0, info)?;

        let captures = {
            let scope = self.scopes.last().expect("just pushed by begin_function");
            scope.captures.clone()
        };
        let function = self.end_function()?;

        let parent = self.top();
        let subfn_index = u8::try_from(parent.subfunctions.len()).expect("checked above");
        let num_captures = u16::try_from(captures.len()).expect("bounded by resolve");
        parent.subfunctions.push(Rc::new(function));

        let operand = (u32::from(subfn_index) << 16) | u32::from(num_captures);
        self.emit(op::MAKE_CLOSURE, operand, 1, info)?;
        for (_, source) in captures {
            let (opcode, idx) = match source {
                CaptureSource::Arg(i) => (op::CAPTURE_FROM_ARG, i),
                CaptureSource::Local(i) => (op::CAPTURE_FROM_LOCAL, i),
                CaptureSource::Capture(i) => (op::CAPTURE_FROM_CAPTURE, i),
            };
            // Pseudo-instruction: consulted by MAKE_CLOSURE, never dispatched.
            self.emit(opcode, u32::from(idx), 0, info)?;
        }
        Ok(())
    }
}

const fn resolved_load(resolved: Resolved) -> (u8, u16) {
    match resolved {
        Resolved::Local(i) => (op::GET_LOCAL, i),
        Resolved::Arg(i) => (op::GET_ARG, i),
        Resolved::Capture(i) => (op::GET_CAPTURE, i),
    }
}

const fn resolved_store(resolved: Resolved) -> (u8, u16) {
    match resolved {
        Resolved::Local(i) => (op::SET_LOCAL, i),
        Resolved::Arg(i) => (op::SET_ARG, i),
        Resolved::Capture(i) => (op::SET_CAPTURE, i),
    }
}

/// Three-pass label patching: strip `NIL;POP 1` pairs, collect `LABEL`
/// offsets, then rewrite `JUMP`/`JUMP_IF_FALSE` operands (currently a
/// label id) into a relative displacement from the instruction after the
/// jump.
fn finalize_instructions(
    code: Vec<u32>,
    source_info: Vec<SourceInfo>,
    num_labels: u32,
) -> Result<(Vec<u32>, Vec<SourceInfo>), ArborError> {
    debug_assert_eq!(code.len(), source_info.len());

    // Pass 1: strip NIL immediately followed by POP 1.
    let mut stripped_code = Vec::with_capacity(code.len());
    let mut stripped_info = Vec::with_capacity(source_info.len());
    let mut i = 0;
    while i < code.len() {
        let (opcode, operand) = bytecode::decode(code[i]);
        if opcode == op::NIL && operand == 0 && i + 1 < code.len() {
            let (next_op, next_operand) = bytecode::decode(code[i + 1]);
            if next_op == op::POP && next_operand == 1 {
                i += 2;
                continue;
            }
        }
        stripped_code.push(code[i]);
        stripped_info.push(source_info[i]);
        i += 1;
    }

    // Pass 2: collect LABEL targets, dropping the pseudo-instructions.
    let mut labels: Vec<usize> = vec_of(num_labels as usize, 0);
    let mut final_code = Vec::with_capacity(stripped_code.len());
    let mut final_info = Vec::with_capacity(stripped_info.len());
    for idx in 0..stripped_code.len() {
        let (opcode, operand) = bytecode::decode(stripped_code[idx]);
        if opcode == op::LABEL {
            labels[operand as usize] = final_code.len();
        } else {
            final_code.push(stripped_code[idx]);
            final_info.push(stripped_info[idx]);
        }
    }

    // Pass 3: rewrite jump operands to relative displacements.
    for idx in 0..final_code.len() {
        let (opcode, operand) = bytecode::decode(final_code[idx]);
        if opcode == op::JUMP || opcode == op::JUMP_IF_FALSE {
            let target = labels[operand as usize];
            let displacement = target as i32 - idx as i32 - 1;
            final_code[idx] = bytecode::encode(opcode, bytecode::i24_to_operand(displacement));
        }
    }

    Ok((final_code, final_info))
}

#[cfg(any(test, feature = "std"))]
fn vec_of(n: usize, value: usize) -> Vec<usize> {
    std::vec![value; n]
}

#[cfg(not(any(test, feature = "std")))]
fn vec_of(n: usize, value: usize) -> Vec<usize> {
    alloc::vec![value; n]
}
