// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! An embeddable, dynamically-typed Lisp-family interpreter core: an
//! S-expression reader, a register-lean stack-based bytecode compiler and
//! VM, and the zone/arena memory model that bounds and reclaims
//! everything allocated during one execution.
//!
//! There is no garbage collector running alongside the interpreter:
//! memory is owned by nested *zones*, each backed by a bump-allocated
//! *arena*, and reclaimed in bulk when its zone exits. See [`zone`] for
//! the allocation model and [`vm`] for the bytecode dispatch loop that
//! drives it.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod arena;
pub mod bytecode;
pub mod collections;
pub mod compiler;
pub mod copy;
pub mod env;
pub mod error;
pub mod heap;
pub mod module;
pub mod printer;
pub mod reader;
pub mod symtab;
pub mod value;
pub mod vm;
pub mod zone;

pub use env::{ContextOptions, Env, EnvOptions, ExecCtx};
pub use error::ArborError;
pub use value::Value;
