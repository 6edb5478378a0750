// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Zones: stack-nested allocation regions, the unit of lifetime for every
//! runtime heap value.
//!
//! A zone is bound to an arena chosen at entry by the rotation algorithm
//! (see [`crate::env::ExecCtx::zone_enter`]): the arena is guaranteed
//! disjoint from the storage of any value still reachable from an
//! enclosing zone, so exiting the zone can bulk-free its arena without
//! touching live objects.

#[cfg(test)]
mod zone_test;

use crate::arena::ArenaSnapshot;

#[cfg(any(test, feature = "std"))]
use std::boxed::Box;
#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::boxed::Box;
#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

/// Maximum number of arenas an execution context may rotate through.
/// Bounds [`ArenaMask`] to a single machine word.
pub const MAX_ARENAS: usize = 64;

/// A bit-set naming every arena transitively reachable from a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaMask(pub u64);

impl ArenaMask {
    #[must_use]
    pub const fn empty() -> Self {
        ArenaMask(0)
    }

    #[must_use]
    pub const fn of(index: u8) -> Self {
        ArenaMask(1u64 << index)
    }

    pub fn union_with(&mut self, other: ArenaMask) {
        self.0 |= other.0;
    }

    #[must_use]
    pub const fn contains(self, index: u8) -> bool {
        self.0 & (1u64 << index) != 0
    }
}

/// Which arena a zone draws its allocations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaRef {
    /// The environment's never-popped permanent zone.
    Permanent,
    /// The context's dedicated error zone.
    Error,
    /// An index into the context's rotating arena pool.
    Pool(u8),
}

/// A handle identifying a zone on the context's zone stack.
///
/// Zones are strictly nested, so a plain stack index is sufficient: a
/// `ZoneId` only remains meaningful while the zone it names has not yet
/// been exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneId(pub usize);

/// A stack frame in the region hierarchy.
pub struct Zone {
    pub parent: Option<ZoneId>,
    pub arena: ArenaRef,
    /// Arena state captured at entry; restored (bulk-freeing everything
    /// allocated since) on exit.
    pub snapshot: ArenaSnapshot,
    /// Depth from the permanent zone (which is level 0).
    pub level: i32,
    /// Cleanups to run, in LIFO order, when this zone exits.
    pub finalizers: Vec<Box<dyn FnOnce()>>,
    /// Optional source location captured at zone entry, for diagnostics.
    pub source_info: Option<crate::compiler::SourceInfo>,
}

impl Zone {
    pub fn register_finalizer<F: FnOnce() + 'static>(&mut self, f: F) {
        self.finalizers.push(Box::new(f));
    }

    /// Run every registered finalizer, most-recently-registered first.
    pub fn run_finalizers(&mut self) {
        while let Some(f) = self.finalizers.pop() {
            f();
        }
    }
}

/// Compute which pool arenas are "in use" (must not be chosen for a new
/// zone) given the current zone's arena and a carry set of values passed
/// into the new zone (e.g. call arguments).
///
/// Implements the arena rotation algorithm: the returned vector has one
/// entry per pool arena, `true` meaning "in use, do not reuse".
#[must_use]
pub fn compute_in_use(
    pool_len: usize,
    current_arena: ArenaRef,
    carry_masks: &[ArenaMask],
) -> Vec<bool> {
    let mut in_use = vec![false; pool_len];
    if let ArenaRef::Pool(i) = current_arena {
        in_use[i as usize] = true;
    }
    for mask in carry_masks {
        for i in 0..pool_len {
            if mask.contains(u8::try_from(i).expect("pool larger than u8")) {
                in_use[i] = true;
            }
        }
    }
    in_use
}

/// Pick the first arena index not marked in-use, if any.
#[must_use]
pub fn pick_free_arena(in_use: &[bool]) -> Option<u8> {
    in_use
        .iter()
        .position(|used| !used)
        .map(|i| u8::try_from(i).expect("pool larger than u8"))
}
