// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! A minimal, non-reader `Display`-style printer for [`Value`].
//!
//! Not a full pretty-printer: used for `core/panic` payload messages and
//! test assertions. Symbols and strings need the interning table and heap
//! bodies to render, so this is a free function taking `&ExecCtx` rather
//! than a `Display` impl on `Value` itself.

#[cfg(test)]
mod printer_test;

#[cfg(any(test, feature = "std"))]
use std::{fmt::Write as _, string::String};

#[cfg(not(any(test, feature = "std")))]
use alloc::{fmt::Write as _, string::String};

use crate::collections::{list, map};
use crate::env::ExecCtx;
use crate::heap;
use crate::value::Value;

/// Render `value` the way it would have been written in source, modulo
/// map/closure representations which have no surface-syntax literal form.
#[must_use]
pub fn print_value(ctx: &mut ExecCtx, value: Value) -> String {
    let mut out = String::new();
    write_value(ctx, value, &mut out);
    out
}

fn write_value(ctx: &mut ExecCtx, value: Value, out: &mut String) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Real(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Symbol(id) => out.push_str(ctx.env.symtab.lookup(id)),
        Value::Tombstone => out.push_str("<tombstone>"),
        Value::Str(obj) => {
            out.push('"');
            // SAFETY: value matched Value::Str, so obj carries ObjType::Str.
            write_escaped(&unsafe { heap::str_body(obj) }.0, out);
            out.push('"');
        }
        Value::Ref(obj) => {
            // SAFETY: value matched Value::Ref.
            let body = unsafe { heap::ref_body(obj) };
            let _ = write!(out, "#<ref {} {}>", body.tag, body.value);
        }
        Value::List(obj) => {
            out.push('(');
            for i in 0..list::len(obj) {
                if i > 0 {
                    out.push(' ');
                }
                write_value(ctx, list::get(obj, i32::try_from(i).unwrap_or(i32::MAX)), out);
            }
            out.push(')');
        }
        Value::Map(obj) => {
            out.push_str("{");
            let mut first = true;
            // The closure never errors, so the foreach itself cannot fail.
            let _ = map::foreach(ctx, obj, |ctx, v, k, _map_value| {
                if !first {
                    out.push(' ');
                }
                first = false;
                write_value(ctx, k, out);
                out.push(' ');
                write_value(ctx, v, out);
                Ok(true)
            });
            out.push('}');
        }
        Value::Function(_) => out.push_str("#<function>"),
    }
}

fn write_escaped(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
}
