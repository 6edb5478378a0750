// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end scenarios, mirroring the read-compile-execute path an
//! embedding host drives.

mod common;

use arbor_vm::collections::list;
use arbor_vm::compiler::{self, CompileOptions};
use arbor_vm::error::ArborError;
use arbor_vm::reader;
use arbor_vm::{heap, module, vm, ContextOptions, Env, EnvOptions, ExecCtx, Value};

use common::{assert_value_matches, IsInt, TestVm};

#[test]
fn s1_parses_and_evaluates_a_plus_call() {
    let mut env = Env::create(EnvOptions::default());
    let mut vm = TestVm::new(&mut env);
    let result = vm.read_and_eval("(+ 1 2 3)").expect("read_and_eval");
    assert_value_matches(&mut vm, result, &IsInt(6));
}

#[test]
fn s2_module_provided_intrinsic_is_usable_from_source() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = ExecCtx::begin(&mut env, ContextOptions::default());
    let zone = ctx.get_local_zone();

    let math_entry = heap::new_native_closure(&mut ctx, zone, math_module_entry, Value::Nil, false);
    module::init_module(&mut ctx, math_entry, "math").expect("math module should load");

    let script = "(def mul (import \"math\" \"mul\")) (def f (fn (x) (mul x x))) (f 7)";
    let script_closure = compile_program(&mut ctx, zone, script, false);
    module::init_module(&mut ctx, script_closure, "s2-script").expect("script should load as a module");

    let result = module::import(&mut ctx, "s2-script", "*main*").expect("read back *main*");
    assert!(matches!(result, Value::Int(49)), "expected 49, got {result:?}");
}

fn native_mul(_ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    let (Value::Int(a), Value::Int(b)) = (args[0], args[1]) else {
        return Err(ArborError::UnexpectedType { expected: "int", got: args[0].type_name() });
    };
    Ok(Value::Int(a * b))
}

fn math_module_entry(ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    let export_fn = args[1];
    let zone = ctx.get_local_zone();
    let name = heap::new_str(ctx, zone, "mul");
    let mul_fn = heap::new_native_closure(ctx, zone, native_mul, Value::Nil, false);
    vm::call(ctx, zone, export_fn, &[name, mul_fn])
}

#[test]
fn s3_if_with_a_true_condition_takes_the_then_branch() {
    let mut env = Env::create(EnvOptions::default());
    let mut vm = TestVm::new(&mut env);
    let result = vm.read_and_eval(r#"(if (< 3 4) "yes" "no")"#).expect("read_and_eval");
    assert_eq!(vm.print(result), "\"yes\"");
}

#[test]
fn s4_circular_module_imports_are_rejected() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = ExecCtx::begin(&mut env, ContextOptions::default());
    let zone = ctx.get_local_zone();

    let entry_a = compile_program(&mut ctx, zone, r#"(import "b" "x")"#, false);
    let entry_b = compile_program(&mut ctx, zone, r#"(import "a" "x")"#, false);
    let loader_a = make_named_loader(&mut ctx, zone, "a", entry_a);
    let loader_b = make_named_loader(&mut ctx, zone, "b", entry_b);
    module::add_loader(&mut ctx, loader_a).expect("add_loader a");
    module::add_loader(&mut ctx, loader_b).expect("add_loader b");

    let err = module::import(&mut ctx, "a", "x");
    assert!(matches!(err, Err(ArborError::CircularDependency { .. })), "expected circular dependency, got {err:?}");
}

fn named_loader(ctx: &mut ExecCtx, args: &[Value], userdata: Value) -> Result<Value, ArborError> {
    let Value::List(pair_obj) = userdata else {
        return Ok(Value::Bool(false));
    };
    let Value::Symbol(wanted) = args[0] else {
        return Ok(Value::Bool(false));
    };
    let Value::Str(name_obj) = list::get(pair_obj, 0) else {
        return Ok(Value::Bool(false));
    };
    // SAFETY: name_obj was just matched as Value::Str.
    let name = unsafe { heap::str_body(name_obj) }.0.clone();
    if ctx.env.symtab.lookup(wanted) == name {
        Ok(list::get(pair_obj, 1))
    } else {
        Ok(Value::Bool(false))
    }
}

fn make_named_loader(ctx: &mut ExecCtx, zone: arbor_vm::zone::ZoneId, module_name: &str, entry: Value) -> Value {
    let name_val = heap::new_str(ctx, zone, module_name);
    let pair = heap::new_list(ctx, zone, 2);
    let pair_obj = pair.as_gc_ptr().expect("new_list returns Value::List");
    list::push(ctx, pair_obj, name_val);
    list::push(ctx, pair_obj, entry);
    heap::new_native_closure(ctx, zone, named_loader, pair, false)
}

fn compile_program(ctx: &mut ExecCtx, zone: arbor_vm::zone::ZoneId, source: &str, standalone: bool) -> Value {
    let (top, _debug) = reader::parse_all(ctx, zone, source, "<test>").expect("parse");
    let obj = top.as_gc_ptr().expect("parse_all returns a list");
    let len = list::len(obj);
    let exprs: Vec<Value> = (0..len).map(|i| list::get(obj, i32::try_from(i).unwrap_or(i32::MAX))).collect();
    compiler::compile(ctx, &exprs, CompileOptions { standalone, strip_debug_info: false }).expect("compile")
}

#[test]
fn s5_list_put_and_get_round_trip() {
    let mut env = Env::create(EnvOptions::default());
    let mut vm = TestVm::new(&mut env);
    let result = vm.read_and_eval(r#"(def xs (list 1 2 3)) (put xs 1 99) (get xs 1)"#).expect("read_and_eval");
    assert_value_matches(&mut vm, result, &IsInt(99));
}

#[test]
fn s6_a_list_survives_a_call_that_opens_an_inner_zone() {
    let mut env = Env::create(EnvOptions::default());
    let mut vm = TestVm::new(&mut env);
    let zone = vm.ctx_mut().get_local_zone();

    let list_value = heap::new_list(vm.ctx_mut(), zone, 0);
    let obj = list_value.as_gc_ptr().expect("new_list returns Value::List");
    list::push(vm.ctx_mut(), obj, Value::Int(1));
    list::push(vm.ctx_mut(), obj, Value::Int(2));

    let identity_fn = vm.read_and_eval("(fn (xs) xs)").expect("compile identity fn");
    let result = vm::call(vm.ctx_mut(), zone, identity_fn, &[list_value]).expect("call");

    // The list already lived at/above the call's return zone, so the copy
    // on RETURN is a no-op: same object, not a dangling reference into the
    // call's now-exited inner zone.
    assert_eq!(result.as_gc_ptr(), list_value.as_gc_ptr());
    let Value::List(result_obj) = result else { panic!("expected list") };
    assert_eq!(list::len(result_obj), 2);
    assert!(matches!(list::get(result_obj, 0), Value::Int(1)));
    assert!(matches!(list::get(result_obj, 1), Value::Int(2)));
}

#[test]
fn property7_closure_captures_are_shared_and_mutable() {
    let mut env = Env::create(EnvOptions::default());
    let mut vm = TestVm::new(&mut env);
    let zone = vm.ctx_mut().get_local_zone();

    let outer = vm.read_and_eval("(fn () (def x 1) (fn () x))").expect("compile outer");
    let inner = vm::call(vm.ctx_mut(), zone, outer, &[]).expect("call outer");
    assert!(inner.is_function());

    let first = vm::call(vm.ctx_mut(), zone, inner, &[]).expect("call inner first time");
    assert!(matches!(first, Value::Int(1)));

    let second = vm::call(vm.ctx_mut(), zone, inner, &[]).expect("call inner second time");
    assert!(matches!(second, Value::Int(1)), "repeated calls observe the same captured value");
}
