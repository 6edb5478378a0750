// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Module loading: `import`/`export`, the process-wide module cache, and
//! the loader-list a host registers to resolve a module name to its
//! entry-point function.
//!
//! A module's state in the cache is one of three things: absent entirely
//! (never touched), `Value::Bool(false)` (currently being initialized —
//! importing it again is a circular dependency), or `Value::Map` (its
//! export table, keyed by exported name, plus a `*main*` entry holding
//! the module body's own return value).

#[cfg(test)]
mod module_test;

#[cfg(any(test, feature = "std"))]
use std::{format, string::String};

#[cfg(not(any(test, feature = "std")))]
use alloc::{format, string::String};

use tracing::{debug, warn};

use crate::collections::map;
use crate::env::ExecCtx;
use crate::error::ArborError;
use crate::heap;
use crate::symtab::SymbolId;
use crate::value::Value;
use crate::vm;

/// Key under which a module's own body result is stored in its export map.
const MAIN_KEY: &str = "*main*";

/// Process-wide module cache, lazily allocated in the environment's
/// permanent zone the first time a module is registered.
#[derive(Default)]
pub struct ModuleRegistry {
    cache: Option<Value>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        ModuleRegistry { cache: None }
    }
}

fn cache_map(ctx: &mut ExecCtx) -> Value {
    if let Some(v) = ctx.env.modules.cache {
        return v;
    }
    let zone = ctx.get_permanent_zone();
    let v = heap::new_map(ctx, zone);
    ctx.env.modules.cache = Some(v);
    v
}

fn as_str(value: Value) -> Result<String, ArborError> {
    let Value::Str(obj) = value else {
        return Err(ArborError::UnexpectedType {
            expected: "string",
            got: value.type_name(),
        });
    };
    // SAFETY: matched on Value::Str above.
    Ok(unsafe { heap::str_body(obj) }.0.clone())
}

/// Qualify a `./name` import against the currently-loading module's own
/// name; leaves any other name untouched.
fn qualify(ctx: &ExecCtx, name: &str) -> String {
    if let Some(rest) = name.strip_prefix("./") {
        if let Some(calling) = ctx.current_module {
            return format!("{}/{rest}", ctx.env.symtab.lookup(calling));
        }
    }
    name.into()
}

/// Resolve `export_name` from `module_name`, loading it through the
/// registered loaders if it is not already cached.
///
/// # Errors
/// `core/name-error` if the module loaded but doesn't export that name,
/// `core/circular-dependency` if the module is mid-load, or
/// `core/module-not-found` if no loader produces an entry function.
pub fn import(ctx: &mut ExecCtx, module_name: &str, export_name: &str) -> Result<Value, ArborError> {
    let qualified = qualify(ctx, module_name);
    let module_sym = ctx.env.symtab.intern(&qualified);
    let export_sym = ctx.env.symtab.intern(export_name);

    match lookup_state(ctx, module_sym) {
        ModuleState::Loaded(exports) => read_export(exports, export_sym, &qualified, export_name),
        ModuleState::Loading => Err(ArborError::CircularDependency { name: module_sym }),
        ModuleState::Missing => {
            load_via_loaders(ctx, module_sym, &qualified)?;
            match lookup_state(ctx, module_sym) {
                ModuleState::Loaded(exports) => read_export(exports, export_sym, &qualified, export_name),
                _ => Err(ArborError::ModuleNotFound { name: module_sym }),
            }
        }
    }
}

enum ModuleState {
    Missing,
    Loading,
    Loaded(Value),
}

fn lookup_state(ctx: &mut ExecCtx, module_sym: SymbolId) -> ModuleState {
    let cache = cache_map(ctx);
    let Value::Map(cache_obj) = cache else {
        unreachable!("cache_map always returns Value::Map")
    };
    match map::get(cache_obj, Value::Symbol(module_sym)) {
        Value::Map(exports) => ModuleState::Loaded(Value::Map(exports)),
        Value::Bool(false) => ModuleState::Loading,
        _ => ModuleState::Missing,
    }
}

fn read_export(exports: Value, export_sym: SymbolId, module_name: &str, export_name: &str) -> Result<Value, ArborError> {
    let Value::Map(exports_obj) = exports else {
        unreachable!("ModuleState::Loaded always carries Value::Map")
    };
    let v = map::get(exports_obj, Value::Symbol(export_sym));
    if v.is_nil() {
        warn!(module_name, export_name, "name not defined in module");
        return Err(ArborError::NameError { name: export_sym });
    }
    Ok(v)
}

fn load_via_loaders(ctx: &mut ExecCtx, module_sym: SymbolId, qualified: &str) -> Result<(), ArborError> {
    let calling = ctx.current_module;
    let loaders = ctx.module_loaders.clone();
    let zone = ctx.get_local_zone();
    let calling_value = calling.map_or(Value::Nil, Value::Symbol);

    for loader in loaders {
        let args = [Value::Symbol(module_sym), calling_value];
        let Ok(entry) = vm::call(ctx, zone, loader, &args) else {
            continue;
        };
        if entry.is_function() {
            return init_module(ctx, entry, qualified);
        }
    }
    Ok(())
}

/// Run `entry_fn` as a module body: it receives `(import, export)` native
/// closures as its two arguments, and its exports (plus its own return
/// value under `*main*`) are cached under `module_name` on success.
///
/// # Errors
/// `core/unexpected-type` if `entry_fn` isn't a function,
/// `core/duplicated-module` if `module_name` is already loaded or
/// mid-load, or whatever error the module body itself raises.
pub fn init_module(ctx: &mut ExecCtx, entry_fn: Value, module_name: &str) -> Result<(), ArborError> {
    if !entry_fn.is_function() {
        return Err(ArborError::UnexpectedType {
            expected: "function",
            got: entry_fn.type_name(),
        });
    }

    let module_sym = ctx.env.symtab.intern(module_name);
    match lookup_state(ctx, module_sym) {
        ModuleState::Missing => {}
        ModuleState::Loading | ModuleState::Loaded(_) => {
            return Err(ArborError::DuplicatedModule { name: module_sym });
        }
    }

    let local_zone = ctx.get_local_zone();
    let cache = cache_map(ctx);
    let Value::Map(cache_obj) = cache else {
        unreachable!("cache_map always returns Value::Map")
    };
    map::set(ctx, cache_obj, Value::Symbol(module_sym), Value::Bool(false));

    let exports = heap::new_map(ctx, local_zone);
    let import_fn = heap::new_native_closure(ctx, local_zone, internal_import, Value::Nil, false);
    let export_fn = heap::new_native_closure(ctx, local_zone, internal_export, Value::Nil, false);

    let previous_module = ctx.current_module;
    let previous_exports = ctx.current_module_exports;
    ctx.current_module = Some(module_sym);
    ctx.current_module_exports = Some(exports);

    debug!(module_name, "loading module");
    let result = vm::call(ctx, local_zone, entry_fn, &[import_fn, export_fn]);

    ctx.current_module = previous_module;
    ctx.current_module_exports = previous_exports;

    let cache = cache_map(ctx);
    let Value::Map(cache_obj) = cache else {
        unreachable!("cache_map always returns Value::Map")
    };

    match result {
        Ok(main_result) => {
            let Value::Map(exports_obj) = exports else {
                unreachable!("exports was just built as Value::Map above")
            };
            let main_sym = ctx.env.symtab.intern(MAIN_KEY);
            map::set(ctx, exports_obj, Value::Symbol(main_sym), main_result);
            map::set(ctx, cache_obj, Value::Symbol(module_sym), exports);
            debug!(module_name, "module loaded");
            Ok(())
        }
        Err(e) => {
            map::set(ctx, cache_obj, Value::Symbol(module_sym), Value::Nil);
            warn!(module_name, category = e.category(), "module failed to load");
            Err(e)
        }
    }
}

/// Register a function tried (in registration order) by `import` to
/// resolve a module name that isn't already cached.
///
/// # Errors
/// `core/unexpected-type` if `loader` isn't a function.
pub fn add_loader(ctx: &mut ExecCtx, loader: Value) -> Result<(), ArborError> {
    if !loader.is_function() {
        return Err(ArborError::UnexpectedType {
            expected: "function",
            got: loader.type_name(),
        });
    }
    ctx.module_loaders.push(loader);
    Ok(())
}

fn internal_import(ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    if args.len() != 2 {
        return Err(ArborError::WrongArity {
            expected: 2,
            got: u8::try_from(args.len()).unwrap_or(u8::MAX),
            variadic: false,
        });
    }
    let module_name = as_str(args[0])?;
    let export_name = as_str(args[1])?;
    import(ctx, &module_name, &export_name)
}

fn internal_export(ctx: &mut ExecCtx, args: &[Value], _userdata: Value) -> Result<Value, ArborError> {
    if args.len() != 2 {
        return Err(ArborError::WrongArity {
            expected: 2,
            got: u8::try_from(args.len()).unwrap_or(u8::MAX),
            variadic: false,
        });
    }
    let export_name = as_str(args[0])?;
    let export_sym = ctx.env.symtab.intern(&export_name);
    if let Some(Value::Map(exports_obj)) = ctx.current_module_exports {
        map::set(ctx, exports_obj, Value::Symbol(export_sym), args[1]);
    }
    Ok(args[1])
}
