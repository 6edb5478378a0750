// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! List operations: dense dynamic array, bump-allocated in its zone until
//! it must grow past that capacity, after which it is promoted to
//! system-allocator storage (freed by a registered finalizer).

#[cfg(test)]
mod list_test;

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

use crate::copy;
use crate::env::ExecCtx;
use crate::heap::{self, ListBody, ListStorage};
use crate::value::{GcPtr, Value};

fn body(obj: GcPtr) -> &'static mut ListBody {
    // SAFETY: callers only reach here through a `Value::List`.
    unsafe { heap::list_body(obj) }
}

#[must_use]
pub fn len(obj: GcPtr) -> usize {
    body(obj).len
}

#[must_use]
pub fn get(obj: GcPtr, index: i32) -> Value {
    if index < 0 {
        return Value::Nil;
    }
    body(obj).get(index as usize).unwrap_or(Value::Nil)
}

/// Reserve room for at least `new_capacity` elements, promoting
/// zone-bump storage to a heap `Vec` (with a finalizer to free it) the
/// first time a list outgrows its initial capacity.
fn reserve(ctx: &mut ExecCtx, obj: GcPtr, new_capacity: usize) {
    let b = body(obj);
    match &b.storage {
        ListStorage::InZone { ptr, cap } => {
            let mut v = Vec::with_capacity(new_capacity);
            // SAFETY: the first `b.len` slots of `ptr` are initialized.
            v.extend((0..b.len).map(|i| unsafe { *ptr.as_ptr().add(i) }));
            debug_assert!(new_capacity >= *cap);
            b.storage = ListStorage::Heap(v);
            // The list header lives in bump-allocated arena memory, which
            // is reclaimed wholesale on zone exit without running `Drop` —
            // register a finalizer so the promoted `Vec`'s own heap buffer
            // is still freed exactly once.
            // SAFETY: obj is a live List object.
            let zone = unsafe { obj.header() }.zone;
            ctx.defer(zone, move || {
                // Dropping the old `Heap(Vec<_>)` frees its buffer.
                body(obj).storage = ListStorage::Heap(Vec::new());
            });
        }
        ListStorage::Heap(_) => {
            let ListStorage::Heap(v) = &mut b.storage else {
                unreachable!()
            };
            v.reserve(new_capacity.saturating_sub(v.len()));
        }
    }
}

pub fn set(ctx: &mut ExecCtx, obj: GcPtr, index: i32, value: Value) -> Value {
    if index < 0 || index as usize >= body(obj).len {
        return Value::Nil;
    }
    let index = index as usize;
    // SAFETY: obj is a live List object.
    let zone = unsafe { obj.header() }.zone;
    let copy = copy::copy(ctx, zone, value);
    let b = body(obj);
    let old = b.get(index).expect("index < len");
    b.set(index, copy);
    // SAFETY: obj was just constructed/owned here.
    unsafe { obj.header_mut() }.arena_mask.union_with(copy.arena_mask());
    old
}

pub fn push(ctx: &mut ExecCtx, obj: GcPtr, value: Value) {
    // SAFETY: obj is a live List object.
    let zone = unsafe { obj.header() }.zone;
    let copy = copy::copy(ctx, zone, value);

    let cur_cap = match &body(obj).storage {
        ListStorage::InZone { cap, .. } => *cap,
        ListStorage::Heap(v) => v.capacity(),
    };
    if body(obj).len >= cur_cap {
        let new_cap = if cur_cap > 0 { cur_cap * 2 } else { 4 };
        reserve(ctx, obj, new_cap);
    }

    let b = body(obj);
    let idx = b.len;
    b.set(idx, copy);
    b.len += 1;
    // SAFETY: obj was just constructed/owned here.
    unsafe { obj.header_mut() }.arena_mask.union_with(copy.arena_mask());
}

pub fn delete(obj: GcPtr, index: i32) -> Value {
    if index < 0 || index as usize >= body(obj).len {
        return Value::Nil;
    }
    let index = index as usize;
    let b = body(obj);
    let old = b.get(index).expect("index < len");
    for i in index..b.len - 1 {
        let next = b.get(i + 1).expect("index < len");
        b.set(i, next);
    }
    b.len -= 1;
    old
}

/// Swap-remove: O(1), does not preserve order.
pub fn quick_delete(obj: GcPtr, index: i32) -> Value {
    if index < 0 || index as usize >= body(obj).len {
        return Value::Nil;
    }
    let index = index as usize;
    let b = body(obj);
    let old = b.get(index).expect("index < len");
    let last = b.get(b.len - 1).expect("index < len");
    b.set(index, last);
    b.len -= 1;
    old
}

pub fn resize(ctx: &mut ExecCtx, obj: GcPtr, new_len: i32) {
    let new_len = new_len.max(0) as usize;
    let cur_len = body(obj).len;
    if new_len <= cur_len {
        body(obj).len = new_len;
        return;
    }
    let cur_cap = match &body(obj).storage {
        ListStorage::InZone { cap, .. } => *cap,
        ListStorage::Heap(v) => v.capacity(),
    };
    if new_len > cur_cap {
        reserve(ctx, obj, new_len);
    }
    let b = body(obj);
    for i in cur_len..new_len {
        b.set(i, Value::Nil);
    }
    b.len = new_len;
}

/// Call `f(value, index, list)` for every element in index order, stopping
/// early if `f` returns `Ok(false)`.
pub fn foreach<F>(ctx: &mut ExecCtx, obj: GcPtr, mut f: F) -> Result<(), crate::error::ArborError>
where
    F: FnMut(&mut ExecCtx, Value, i32, Value) -> Result<bool, crate::error::ArborError>,
{
    let list_value = Value::List(obj);
    let len = body(obj).len;
    for i in 0..len {
        let elem = body(obj).get(i).expect("index < len");
        let keep_going = f(ctx, elem, i32::try_from(i).expect("list bounded"), list_value)?;
        if !keep_going {
            break;
        }
    }
    Ok(())
}
