// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared test infrastructure for integration tests.
//!
//! - [`TestVm`] bundles an `Env`/`ExecCtx` pair for read-compile-execute
//!   round trips.
//! - [`ValueMatcher`] gives structural assertions over the runtime's
//!   `Value` without every test file re-deriving `Debug` comparisons by
//!   hand.

#![expect(unused_imports, reason = "re-exports used selectively by test files")]

pub mod matchers;
pub mod test_vm;

pub use matchers::{assert_value_matches, IsBool, IsInt, IsList, IsNil, IsString, IsSymbol, PrintsAs, ValueMatcher};
pub use test_vm::{TestVm, TestVmError};
