use super::*;
use crate::env::{ContextOptions, Env, EnvOptions};
use crate::value::Value;

fn new_ctx(env: &mut Env) -> ExecCtx<'_> {
    ExecCtx::begin(env, ContextOptions::default())
}

fn greeting_entry(ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    let export_fn = args[1];
    let name = heap::new_str(ctx, ctx.get_local_zone(), "greeting");
    let value = Value::Int(7);
    vm::call(ctx, ctx.get_local_zone(), export_fn, &[name, value])
}

fn greeting_loader(ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    let wanted = args[0];
    let Value::Symbol(sym) = wanted else {
        return Ok(Value::Bool(false));
    };
    if ctx.env.symtab.lookup(sym) == "greeting-mod" {
        let zone = ctx.get_local_zone();
        return Ok(heap::new_native_closure(ctx, zone, greeting_entry, Value::Nil, false));
    }
    Ok(Value::Bool(false))
}

fn useless_loader(_ctx: &mut ExecCtx, _args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    Ok(Value::Bool(false))
}

#[test]
fn import_resolves_an_export_through_a_registered_loader() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);
    let zone = ctx.get_local_zone();

    let loader = heap::new_native_closure(&mut ctx, zone, greeting_loader, Value::Nil, false);
    add_loader(&mut ctx, loader).expect("add_loader");

    let result = import(&mut ctx, "greeting-mod", "greeting").expect("import");
    assert!(matches!(result, Value::Int(7)));
}

#[test]
fn import_on_an_unregistered_module_is_not_found() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);

    let err = import(&mut ctx, "does-not-exist", "x");
    assert!(matches!(err, Err(ArborError::ModuleNotFound { .. })));
}

#[test]
fn a_loader_returning_a_non_function_is_skipped_in_favor_of_the_next() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);
    let zone = ctx.get_local_zone();

    let skip = heap::new_native_closure(&mut ctx, zone, useless_loader, Value::Nil, false);
    let real = heap::new_native_closure(&mut ctx, zone, greeting_loader, Value::Nil, false);
    add_loader(&mut ctx, skip).expect("add_loader");
    add_loader(&mut ctx, real).expect("add_loader");

    let result = import(&mut ctx, "greeting-mod", "greeting").expect("import");
    assert!(matches!(result, Value::Int(7)));
}

#[test]
fn init_module_rejects_a_non_function_entry() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);

    let err = init_module(&mut ctx, Value::Int(1), "bad-mod");
    assert!(matches!(err, Err(ArborError::UnexpectedType { .. })));
}

#[test]
fn init_module_twice_on_the_same_name_is_a_duplicate() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);
    let zone = ctx.get_local_zone();

    let entry = heap::new_native_closure(&mut ctx, zone, greeting_entry, Value::Nil, false);
    init_module(&mut ctx, entry, "dup-mod").expect("first init_module");

    let entry_again = heap::new_native_closure(&mut ctx, zone, greeting_entry, Value::Nil, false);
    let err = init_module(&mut ctx, entry_again, "dup-mod");
    assert!(matches!(err, Err(ArborError::DuplicatedModule { .. })));
}

#[test]
fn import_reports_name_error_for_an_export_never_set() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);
    let zone = ctx.get_local_zone();

    let entry = heap::new_native_closure(&mut ctx, zone, greeting_entry, Value::Nil, false);
    init_module(&mut ctx, entry, "name-err-mod").expect("init_module");

    let err = import(&mut ctx, "name-err-mod", "not-exported");
    assert!(matches!(err, Err(ArborError::NameError { .. })));
}

#[test]
fn add_loader_rejects_a_non_function() {
    let mut env = Env::create(EnvOptions::default());
    let mut ctx = new_ctx(&mut env);

    let err = add_loader(&mut ctx, Value::Int(1));
    assert!(matches!(err, Err(ArborError::UnexpectedType { .. })));
}
