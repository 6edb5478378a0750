// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The bytecode dispatch loop.
//!
//! There is no recursive VM-to-VM call: every `CALL` that targets a VM
//! closure pushes a [`Frame`] onto `ctx.frames` and the same flat loop
//! keeps running against whichever frame is now on top. `CALL` against a
//! native closure runs to completion inline, without pushing a frame, so
//! the only Rust-level recursion is a native function calling back into
//! [`call`] itself.


use core::rc::Rc;

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

use crate::bytecode::{self, op, BytecodeFunction};
use crate::copy;
use crate::env::ExecCtx;
use crate::error::{ArborError, LimitKind};
use crate::heap;
use crate::value::{GcPtr, ObjType, Value};
use crate::zone::ZoneId;

/// One active VM-closure invocation. Native closures never get a frame:
/// they run to completion inside [`do_call`] before the dispatch loop
/// resumes.
pub struct Frame {
    closure: GcPtr,
    function: Rc<BytecodeFunction>,
    args_base: usize,
    locals_base: usize,
    ip: usize,
    /// The zone live when this frame's `CALL` executed; `RETURN` copies
    /// the result here.
    return_zone: ZoneId,
    /// The zone entered for this call; `RETURN` exits it.
    call_zone: ZoneId,
}

/// Call `func` with `args`, copying the result into `zone`.
///
/// # Errors
/// `core/unexpected-type` if `func` is not a function, `core/wrong-arity`
/// on an arity mismatch, plus anything the callee itself raises.
pub fn call(ctx: &mut ExecCtx, zone: ZoneId, func: Value, args: &[Value]) -> Result<Value, ArborError> {
    let base_depth = ctx.frames.len();
    for arg in args {
        ctx.value_stack.push(*arg);
    }
    match do_call(ctx, func, args.len())? {
        CallOutcome::Done(result) => {
            let result = copy::copy(ctx, zone, result);
            Ok(result)
        }
        CallOutcome::Entered => execute(ctx, base_depth, zone),
    }
}

/// Call `func` with the elements of `args_list` (a `Value::List`) as its
/// arguments.
///
/// # Errors
/// Same as [`call`], plus `core/unexpected-type` if `args_list` is not a
/// list.
pub fn apply(ctx: &mut ExecCtx, zone: ZoneId, func: Value, args_list: Value) -> Result<Value, ArborError> {
    let Value::List(obj) = args_list else {
        return Err(ArborError::UnexpectedType {
            expected: "list",
            got: args_list.type_name(),
        });
    };
    // SAFETY: obj is the payload of a Value::List.
    let args = unsafe { heap::list_body(obj) }.as_value_vec();
    call(ctx, zone, func, &args)
}

enum CallOutcome {
    /// A native closure ran to completion; the result still needs
    /// copying into the caller's target zone.
    Done(Value),
    /// A VM closure frame was pushed; the dispatch loop must run.
    Entered,
}

/// Run the dispatch loop until the frame stack shrinks back to
/// `base_depth`, returning the value the final `RETURN` produced
/// (already copied into `zone` by the time it unwinds past `base_depth`).
fn execute(ctx: &mut ExecCtx, base_depth: usize, zone: ZoneId) -> Result<Value, ArborError> {
    loop {
        let frame_idx = ctx.frames.len() - 1;
        let function = ctx.frames[frame_idx].function.clone();
        let ip = ctx.frames[frame_idx].ip;
        let instr = function.code[ip];
        let (opcode, operand) = bytecode::decode(instr);
        ctx.frames[frame_idx].ip = ip + 1;

        match opcode {
            op::NOP => {}
            op::NIL => ctx.value_stack.push(Value::Nil),
            op::TRUE => ctx.value_stack.push(Value::Bool(true)),
            op::FALSE => ctx.value_stack.push(Value::Bool(false)),
            op::SMALL_INT => ctx
                .value_stack
                .push(Value::Int(i32::from(bytecode::operand_as_i16(operand)))),
            op::CONSTANT => {
                let c = function.constants[operand as usize];
                let z = ctx.get_local_zone();
                let v = copy::copy(ctx, z, c);
                ctx.value_stack.push(v);
            }
            op::POP => {
                let n = operand as usize;
                let new_len = ctx.value_stack.len() - n;
                ctx.value_stack.truncate(new_len);
            }
            op::GET_LOCAL => {
                let base = ctx.frames[frame_idx].locals_base;
                let v = ctx.value_stack[base + operand as usize];
                ctx.value_stack.push(v);
            }
            op::SET_LOCAL => {
                let base = ctx.frames[frame_idx].locals_base;
                let top = *ctx.value_stack.last().expect("SET_LOCAL operand already on stack");
                ctx.value_stack[base + operand as usize] = top;
            }
            op::GET_ARG => {
                let base = ctx.frames[frame_idx].args_base;
                let v = ctx.value_stack[base + operand as usize];
                ctx.value_stack.push(v);
            }
            op::SET_ARG => {
                let base = ctx.frames[frame_idx].args_base;
                let top = *ctx.value_stack.last().expect("SET_ARG operand already on stack");
                ctx.value_stack[base + operand as usize] = top;
            }
            op::GET_CAPTURE => {
                let closure = ctx.frames[frame_idx].closure;
                // SAFETY: a frame's closure is always ObjType::Closure.
                let captures = unsafe { heap::closure_body(closure).captures.as_ref() };
                ctx.value_stack.push(captures[operand as usize]);
            }
            op::SET_CAPTURE => {
                let closure = ctx.frames[frame_idx].closure;
                let top = *ctx.value_stack.last().expect("SET_CAPTURE operand already on stack");
                // SAFETY: a frame's closure is always ObjType::Closure.
                let closure_zone = unsafe { closure.header() }.zone;
                let stored = copy::copy(ctx, closure_zone, top);
                // SAFETY: a frame's closure is always ObjType::Closure.
                let cb = unsafe { heap::closure_body(closure) };
                // SAFETY: operand was validated against num_captures at compile time.
                unsafe {
                    (*cb.captures.as_ptr())[operand as usize] = stored;
                }
                // SAFETY: closure is uniquely addressed here.
                unsafe { closure.header_mut() }.arena_mask.union_with(stored.arena_mask());
            }
            op::CALL => {
                let argc = operand as usize;
                let callee = ctx.value_stack.pop().expect("callee pushed before CALL");
                match do_call(ctx, callee, argc)? {
                    CallOutcome::Done(result) => ctx.value_stack.push(result),
                    CallOutcome::Entered => {}
                }
            }
            op::RETURN => {
                let frame = ctx.frames.pop().expect("frame stack non-empty inside execute");
                let raw_result = ctx.value_stack.pop().expect("RETURN value on stack");
                let result = copy::copy(ctx, frame.return_zone, raw_result);
                ctx.zone_exit(frame.call_zone);
                ctx.value_stack.truncate(frame.args_base);
                if ctx.frames.len() == base_depth {
                    let result = copy::copy(ctx, zone, result);
                    return Ok(result);
                }
                ctx.value_stack.push(result);
            }
            op::JUMP => {
                let disp = bytecode::operand_as_i24(operand);
                displace_ip(ctx, frame_idx, disp);
            }
            op::JUMP_IF_FALSE => {
                let top = ctx.value_stack.pop().expect("JUMP_IF_FALSE operand on stack");
                if !top.is_truthy() {
                    let disp = bytecode::operand_as_i24(operand);
                    displace_ip(ctx, frame_idx, disp);
                }
            }
            op::MAKE_CLOSURE => do_make_closure(ctx, frame_idx, operand, &function),
            op::CAPTURE_FROM_ARG | op::CAPTURE_FROM_LOCAL | op::CAPTURE_FROM_CAPTURE => {
                unreachable!("pseudo-instruction only ever consumed by MAKE_CLOSURE")
            }
            op::LT | op::LTE | op::GT | op::GTE => intrinsic_compare(ctx, opcode)?,
            op::PLUS => intrinsic_plus(ctx, operand as usize)?,
            op::SUB => intrinsic_sub(ctx, operand as usize)?,
            op::NEG => intrinsic_neg(ctx)?,
            op::MAKE_LIST => intrinsic_make_list(ctx, operand as usize)?,
            op::PUT => intrinsic_put(ctx, operand as usize)?,
            op::GET => intrinsic_get(ctx, operand as usize)?,
            op::LABEL => unreachable!("LABEL is stripped at compile time"),
            _ => unreachable!("illegal opcode {opcode}"),
        }
    }
}

fn displace_ip(ctx: &mut ExecCtx, frame_idx: usize, disp: i32) {
    let ip = ctx.frames[frame_idx].ip as i64 + i64::from(disp);
    ctx.frames[frame_idx].ip = usize::try_from(ip).expect("jump target within function bounds");
}

/// Dispatch a `CALL`-like invocation of `callee` with the top `argc`
/// values of `ctx.value_stack` as its arguments (left in place). Native
/// closures run synchronously and return `Done`; VM closures push a
/// [`Frame`] and return `Entered` for the caller's dispatch loop to run.
fn do_call(ctx: &mut ExecCtx, callee: Value, argc: usize) -> Result<CallOutcome, ArborError> {
    let Some(obj) = callee.as_gc_ptr().filter(|_| callee.is_function()) else {
        return Err(ArborError::UnexpectedType {
            expected: "function",
            got: callee.type_name(),
        });
    };
    // SAFETY: obj is Value::Function, so its header is Closure or NativeClosure.
    let type_tag = unsafe { obj.header() }.type_tag;
    match type_tag {
        ObjType::Closure => {
            // SAFETY: type_tag is Closure.
            let cb = unsafe { heap::closure_body(obj) };
            let num_args = cb.function.num_args;
            if usize::from(num_args) > argc {
                return Err(ArborError::WrongArity {
                    expected: num_args,
                    got: u8::try_from(argc).unwrap_or(u8::MAX),
                    variadic: true,
                });
            }
            let function = cb.function.clone();
            let args_base = ctx.value_stack.len() - argc;
            let carry: Vec<Value> = ctx.value_stack[args_base..].to_vec();
            let return_zone = ctx.get_local_zone();
            let call_zone = ctx.zone_enter(&carry)?;
            let locals_base = ctx.value_stack.len();
            for _ in 0..function.num_locals {
                ctx.value_stack.push(Value::Nil);
            }
            ctx.frames.push(Frame {
                closure: obj,
                function,
                args_base,
                locals_base,
                ip: 0,
                return_zone,
                call_zone,
            });
            Ok(CallOutcome::Entered)
        }
        ObjType::NativeClosure => {
            // SAFETY: type_tag is NativeClosure.
            let ncb = unsafe { heap::native_closure_body(obj) };
            let args_base = ctx.value_stack.len() - argc;
            let return_zone = ctx.get_local_zone();
            let call_zone = if ncb.no_alloc {
                None
            } else {
                let carry: Vec<Value> = ctx.value_stack[args_base..].to_vec();
                Some(ctx.zone_enter(&carry)?)
            };
            let args: Vec<Value> = ctx.value_stack[args_base..].to_vec();
            let result = (ncb.func)(ctx, &args, ncb.userdata)?;
            let result = copy::copy(ctx, return_zone, result);
            if let Some(z) = call_zone {
                ctx.zone_exit(z);
            }
            ctx.value_stack.truncate(args_base);
            Ok(CallOutcome::Done(result))
        }
        ObjType::Str | ObjType::Ref | ObjType::List | ObjType::Map => {
            unreachable!("Value::Function never wraps a Str/Ref/List/Map header")
        }
    }
}

/// Allocate a new closure in the current zone, consuming the
/// `num_captures` pseudo-instructions immediately following
/// `MAKE_CLOSURE` in `function`'s code as capture-source descriptors.
fn do_make_closure(ctx: &mut ExecCtx, frame_idx: usize, operand: u32, function: &Rc<BytecodeFunction>) {
    let subfn_index = ((operand >> 16) & 0xff) as usize;
    let num_captures = (operand & 0xffff) as usize;
    let subfunction = function.functions[subfn_index].clone();

    let base_ip = ctx.frames[frame_idx].ip;
    let mut captures = Vec::with_capacity(num_captures);
    for i in 0..num_captures {
        let (cap_op, cap_operand) = bytecode::decode(function.code[base_ip + i]);
        let value = match cap_op {
            op::CAPTURE_FROM_ARG => {
                let base = ctx.frames[frame_idx].args_base;
                ctx.value_stack[base + cap_operand as usize]
            }
            op::CAPTURE_FROM_LOCAL => {
                let base = ctx.frames[frame_idx].locals_base;
                ctx.value_stack[base + cap_operand as usize]
            }
            op::CAPTURE_FROM_CAPTURE => {
                let closure = ctx.frames[frame_idx].closure;
                // SAFETY: a frame's closure is always ObjType::Closure.
                let captures = unsafe { heap::closure_body(closure).captures.as_ref() };
                captures[cap_operand as usize]
            }
            _ => unreachable!("illegal closure capture pseudo-instruction"),
        };
        captures.push(value);
    }
    ctx.frames[frame_idx].ip = base_ip + num_captures;

    let zone = ctx.get_local_zone();
    let closure_value = heap::new_closure(ctx, zone, subfunction, &captures);
    ctx.value_stack.push(closure_value);
}

fn numeric_pair(a: Value, b: Value) -> Result<(f64, f64), ArborError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok((f64::from(x), f64::from(y))),
        (Value::Int(x), Value::Real(y)) => Ok((f64::from(x), y)),
        (Value::Real(x), Value::Int(y)) => Ok((x, f64::from(y))),
        (Value::Real(x), Value::Real(y)) => Ok((x, y)),
        _ => {
            let bad = if a.is_int() || a.is_real() { b } else { a };
            Err(ArborError::UnexpectedType {
                expected: "number",
                got: bad.type_name(),
            })
        }
    }
}

fn intrinsic_compare(ctx: &mut ExecCtx, opcode: u8) -> Result<(), ArborError> {
    let rhs = ctx.value_stack.pop().expect("rhs pushed before comparison");
    let lhs = ctx.value_stack.pop().expect("lhs pushed before comparison");
    let (x, y) = numeric_pair(lhs, rhs)?;
    let result = match opcode {
        op::LT => x < y,
        op::LTE => x <= y,
        op::GT => x > y,
        op::GTE => x >= y,
        _ => unreachable!("intrinsic_compare called with a non-comparison opcode"),
    };
    ctx.value_stack.push(Value::Bool(result));
    Ok(())
}

/// Fold `args` left-to-right: integer arithmetic if every value is an
/// `Int`, real arithmetic (ints promoted) if every value is numeric,
/// `core/unexpected-type` otherwise.
fn numeric_fold(
    args: &[Value],
    combine_int: fn(i32, i32) -> i32,
    combine_real: fn(f64, f64) -> f64,
) -> Result<Value, ArborError> {
    if args.iter().all(Value::is_int) {
        let mut acc = match args[0] {
            Value::Int(n) => n,
            _ => unreachable!("checked by the all(is_int) guard above"),
        };
        for v in &args[1..] {
            let Value::Int(n) = v else {
                unreachable!("checked by the all(is_int) guard above");
            };
            acc = combine_int(acc, *n);
        }
        Ok(Value::Int(acc))
    } else if args.iter().all(|v| v.is_int() || v.is_real()) {
        let as_f64 = |v: &Value| match v {
            Value::Int(n) => f64::from(*n),
            Value::Real(r) => *r,
            _ => unreachable!("checked by the all(is_int||is_real) guard above"),
        };
        let mut acc = as_f64(&args[0]);
        for v in &args[1..] {
            acc = combine_real(acc, as_f64(v));
        }
        Ok(Value::Real(acc))
    } else {
        let bad = args
            .iter()
            .find(|v| !v.is_int() && !v.is_real())
            .expect("mixed-but-not-all-numeric branch implies a non-numeric element");
        Err(ArborError::UnexpectedType {
            expected: "number",
            got: bad.type_name(),
        })
    }
}

fn intrinsic_plus(ctx: &mut ExecCtx, argc: usize) -> Result<(), ArborError> {
    if argc == 0 {
        ctx.value_stack.push(Value::Int(0));
        return Ok(());
    }
    let base = ctx.value_stack.len() - argc;
    let args: Vec<Value> = ctx.value_stack[base..].to_vec();
    let result = numeric_fold(&args, i32::wrapping_add, |a, b| a + b)?;
    ctx.value_stack.truncate(base);
    ctx.value_stack.push(result);
    Ok(())
}

fn intrinsic_sub(ctx: &mut ExecCtx, argc: usize) -> Result<(), ArborError> {
    let base = ctx.value_stack.len() - argc;
    let args: Vec<Value> = ctx.value_stack[base..].to_vec();
    let result = numeric_fold(&args, i32::wrapping_sub, |a, b| a - b)?;
    ctx.value_stack.truncate(base);
    ctx.value_stack.push(result);
    Ok(())
}

fn intrinsic_neg(ctx: &mut ExecCtx) -> Result<(), ArborError> {
    let v = ctx.value_stack.pop().expect("operand pushed before NEG");
    let result = match v {
        Value::Int(n) => Value::Int(n.wrapping_neg()),
        Value::Real(r) => Value::Real(-r),
        other => {
            return Err(ArborError::UnexpectedType {
                expected: "number",
                got: other.type_name(),
            })
        }
    };
    ctx.value_stack.push(result);
    Ok(())
}

/// Builds a list holding exactly the given elements, in order. The
/// original implementation's `list` intrinsic pushes `argv[0]` on every
/// iteration instead of `argv[i]`; this is not replicated.
fn intrinsic_make_list(ctx: &mut ExecCtx, argc: usize) -> Result<(), ArborError> {
    let base = ctx.value_stack.len() - argc;
    let args: Vec<Value> = ctx.value_stack[base..].to_vec();
    let zone = ctx.get_local_zone();
    let list_value = heap::new_list(ctx, zone, argc);
    let obj = list_value.as_gc_ptr().expect("new_list always returns Value::List");
    for v in args {
        crate::collections::list::push(ctx, obj, v);
    }
    ctx.value_stack.truncate(base);
    ctx.value_stack.push(list_value);
    Ok(())
}

fn intrinsic_put(ctx: &mut ExecCtx, argc: usize) -> Result<(), ArborError> {
    if argc != 3 {
        return Err(ArborError::WrongArity {
            expected: 3,
            got: u8::try_from(argc).unwrap_or(u8::MAX),
            variadic: false,
        });
    }
    let base = ctx.value_stack.len() - argc;
    let container = ctx.value_stack[base];
    let key_or_index = ctx.value_stack[base + 1];
    let value = ctx.value_stack[base + 2];
    let result = match container {
        Value::List(obj) => {
            let Value::Int(index) = key_or_index else {
                return Err(ArborError::UnexpectedType {
                    expected: "int",
                    got: key_or_index.type_name(),
                });
            };
            crate::collections::list::set(ctx, obj, index, value)
        }
        Value::Map(obj) => crate::collections::map::set(ctx, obj, key_or_index, value),
        other => {
            return Err(ArborError::UnexpectedType {
                expected: "map or list",
                got: other.type_name(),
            })
        }
    };
    ctx.value_stack.truncate(base);
    ctx.value_stack.push(result);
    Ok(())
}

fn intrinsic_get(ctx: &mut ExecCtx, argc: usize) -> Result<(), ArborError> {
    if argc != 2 {
        return Err(ArborError::WrongArity {
            expected: 2,
            got: u8::try_from(argc).unwrap_or(u8::MAX),
            variadic: false,
        });
    }
    let base = ctx.value_stack.len() - argc;
    let container = ctx.value_stack[base];
    let key_or_index = ctx.value_stack[base + 1];
    let result = match container {
        Value::List(obj) => {
            let Value::Int(index) = key_or_index else {
                return Err(ArborError::UnexpectedType {
                    expected: "int",
                    got: key_or_index.type_name(),
                });
            };
            crate::collections::list::get(obj, index)
        }
        Value::Map(obj) => crate::collections::map::get(obj, key_or_index),
        other => {
            return Err(ArborError::UnexpectedType {
                expected: "map or list",
                got: other.type_name(),
            })
        }
    };
    ctx.value_stack.truncate(base);
    ctx.value_stack.push(result);
    Ok(())
}
