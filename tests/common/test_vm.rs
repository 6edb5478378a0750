// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Test VM for integration testing.
//!
//! Bundles an [`Env`] borrow and an [`ExecCtx`] so tests can read, compile
//! and execute source text in one call, exercising the same code paths an
//! embedding host would.

#![expect(
    dead_code,
    reason = "test infrastructure used selectively across integration test files"
)]

use arbor_vm::compiler::{self, CompileOptions};
use arbor_vm::reader;
use arbor_vm::{collections, printer, vm, ArborError, ContextOptions, Env, ExecCtx, Value};

/// A test VM borrowing a caller-owned [`Env`].
///
/// Each test should construct its own `Env` and `TestVm` to ensure
/// isolation between test cases.
pub struct TestVm<'env> {
    ctx: ExecCtx<'env>,
}

impl<'env> TestVm<'env> {
    #[must_use]
    pub fn new(env: &'env mut Env) -> Self {
        Self {
            ctx: ExecCtx::begin(env, ContextOptions::default()),
        }
    }

    #[must_use]
    pub fn with_options(env: &'env mut Env, options: ContextOptions) -> Self {
        Self {
            ctx: ExecCtx::begin(env, options),
        }
    }

    /// Read, compile and execute every top-level form in `input`.
    ///
    /// # Errors
    /// Any `ArborError` raised by the reader, compiler, or VM.
    pub fn read_and_eval(&mut self, input: &str) -> Result<Value, TestVmError> {
        let zone = self.ctx.get_local_zone();
        let (top, _debug) = reader::parse_all(&mut self.ctx, zone, input, "<test>")?;
        let top_obj = top.as_gc_ptr().expect("parse_all always returns a list");
        let len = collections::list::len(top_obj);
        let exprs: Vec<Value> = (0..len).map(|i| collections::list::get(top_obj, i32::try_from(i).unwrap_or(i32::MAX))).collect();

        let closure = compiler::compile(&mut self.ctx, &exprs, CompileOptions::default())?;
        let result = vm::call(&mut self.ctx, zone, closure, &[])?;
        Ok(result)
    }

    /// Print a value using the crate's minimal display printer.
    pub fn print(&mut self, value: Value) -> String {
        printer::print_value(&mut self.ctx, value)
    }

    /// Read, evaluate, and print in one step.
    ///
    /// # Errors
    /// Same as [`Self::read_and_eval`].
    pub fn rep(&mut self, input: &str) -> Result<String, TestVmError> {
        let result = self.read_and_eval(input)?;
        Ok(self.print(result))
    }

    pub fn ctx_mut(&mut self) -> &mut ExecCtx<'env> {
        &mut self.ctx
    }
}

/// Error type for test VM operations.
#[derive(Debug)]
pub struct TestVmError(pub ArborError);

impl core::fmt::Display for TestVmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestVmError {}

impl From<ArborError> for TestVmError {
    fn from(e: ArborError) -> Self {
        Self(e)
    }
}
