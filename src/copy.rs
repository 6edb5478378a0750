// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Copying a value into a (possibly shorter-lived, possibly longer-lived)
//! target zone.
//!
//! Every write into a container, and every value returned from a call,
//! passes through [`copy`]. A value already living at or above the
//! target zone's level is returned unchanged (its storage will outlive
//! the target zone regardless); otherwise a fresh copy is made so the
//! original's zone can still be torn down independently. Containers
//! recurse: list/map/closure contents are copied too, with a ptr-map
//! scoped to one top-level `copy` call so shared substructure and cycles
//! are preserved rather than duplicated or looped forever.

#[cfg(test)]
mod copy_test;

#[cfg(any(test, feature = "std"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::collections::BTreeMap as HashMap;
#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

use crate::collections::map;
use crate::env::ExecCtx;
use crate::heap;
use crate::value::{GcPtr, ObjType, Value};
use crate::zone::ZoneId;

/// Copy `value` into `zone`. A no-op for non-heap values and for heap
/// values that already live at or above `zone`'s nesting level.
pub fn copy(ctx: &mut ExecCtx, zone: ZoneId, value: Value) -> Value {
    let Some(obj) = value.as_gc_ptr() else {
        return value;
    };
    // SAFETY: obj came from a live Value.
    let level = unsafe { obj.header() }.level;
    if level <= ctx.zone_level(zone) {
        return value;
    }

    // SAFETY: obj came from a live Value.
    match unsafe { obj.header() }.type_tag {
        ObjType::Str => {
            // SAFETY: type_tag is Str.
            let s = unsafe { heap::str_body(obj) };
            heap::new_str(ctx, zone, &s.0)
        }
        ObjType::Ref => {
            // SAFETY: type_tag is Ref.
            let r = unsafe { heap::ref_body(obj) };
            heap::new_ref(ctx, zone, r.tag, r.value)
        }
        ObjType::NativeClosure => {
            // SAFETY: type_tag is NativeClosure.
            let n = unsafe { heap::native_closure_body(obj) };
            heap::new_native_closure(ctx, zone, n.func, n.userdata, n.no_alloc)
        }
        ObjType::List | ObjType::Map | ObjType::Closure => {
            let mut copied = HashMap::new();
            deep_copy(ctx, zone, &mut copied, value)
        }
    }
}

fn wrap(obj: GcPtr) -> Value {
    // SAFETY: obj came from a live Value or a just-constructed object.
    match unsafe { obj.header() }.type_tag {
        ObjType::Str => Value::Str(obj),
        ObjType::Ref => Value::Ref(obj),
        ObjType::List => Value::List(obj),
        ObjType::Map => Value::Map(obj),
        ObjType::Closure | ObjType::NativeClosure => Value::Function(obj),
    }
}

fn deep_copy(ctx: &mut ExecCtx, target: ZoneId, copied: &mut HashMap<usize, GcPtr>, value: Value) -> Value {
    let Some(obj) = value.as_gc_ptr() else {
        return value;
    };
    // SAFETY: obj came from a live Value.
    let level = unsafe { obj.header() }.level;
    if level <= ctx.zone_level(target) {
        return value;
    }

    let key = obj.0.as_ptr() as usize;
    if let Some(&mapped) = copied.get(&key) {
        return wrap(mapped);
    }

    // SAFETY: obj came from a live Value.
    match unsafe { obj.header() }.type_tag {
        ObjType::Str => {
            let result = copy(ctx, target, value);
            copied.insert(key, result.as_gc_ptr().expect("Str copies to a heap value"));
            result
        }
        ObjType::Ref => {
            let result = copy(ctx, target, value);
            copied.insert(key, result.as_gc_ptr().expect("Ref copies to a heap value"));
            result
        }
        ObjType::NativeClosure => {
            let result = copy(ctx, target, value);
            copied.insert(key, result.as_gc_ptr().expect("NativeClosure copies to a heap value"));
            result
        }
        ObjType::List => {
            // SAFETY: type_tag is List.
            let elems = unsafe { heap::list_body(obj) }.as_value_vec();
            let new_val = heap::new_list(ctx, target, elems.len());
            let new_obj = new_val.as_gc_ptr().expect("new_list returns Value::List");
            copied.insert(key, new_obj);

            // SAFETY: type_tag is List.
            unsafe { heap::list_body(new_obj) }.len = elems.len();
            for (i, elem) in elems.into_iter().enumerate() {
                let elem_copy = deep_copy(ctx, target, copied, elem);
                // SAFETY: type_tag is List.
                unsafe { heap::list_body(new_obj) }.set(i, elem_copy);
                // SAFETY: new_obj was just constructed by this function.
                unsafe { new_obj.header_mut() }.arena_mask.union_with(elem_copy.arena_mask());
            }
            new_val
        }
        ObjType::Map => {
            // SAFETY: type_tag is Map.
            let entries: Vec<(Value, Value)> = unsafe { heap::map_body(obj) }
                .entries
                .iter()
                .filter(|e| !e.deleted)
                .map(|e| (e.key, e.value))
                .collect();

            let new_val = heap::new_map(ctx, target);
            let new_obj = new_val.as_gc_ptr().expect("new_map returns Value::Map");
            copied.insert(key, new_obj);

            for (k, v) in entries {
                // The copy must happen here, threaded through `copied`, to
                // stay deep: `map::set`'s own `copy()` call is a no-op
                // once the value already lives in the target zone.
                let key_copy = deep_copy(ctx, target, copied, k);
                let value_copy = deep_copy(ctx, target, copied, v);
                map::set(ctx, new_obj, key_copy, value_copy);
            }
            new_val
        }
        ObjType::Closure => {
            // SAFETY: type_tag is Closure.
            let old_cb = unsafe { heap::closure_body(obj) };
            // SAFETY: captures is a valid slice for this closure's lifetime.
            let num_captures = unsafe { old_cb.captures.as_ref() }.len();
            let function = old_cb.function.clone();

            let placeholders: Vec<Value> = core::iter::repeat(Value::Nil).take(num_captures).collect();
            let new_val = heap::new_closure(ctx, target, function, &placeholders);
            let new_obj = new_val.as_gc_ptr().expect("new_closure returns Value::Function");
            copied.insert(key, new_obj);

            for i in 0..num_captures {
                // SAFETY: type_tag is Closure, i < num_captures.
                let old_capture = unsafe { heap::closure_body(obj).captures.as_ref() }[i];
                let capture_copy = deep_copy(ctx, target, copied, old_capture);
                // SAFETY: type_tag is Closure, new_obj owns this capture array.
                let new_cb = unsafe { heap::closure_body(new_obj) };
                // SAFETY: i < num_captures, captures sized for num_captures.
                unsafe {
                    (*new_cb.captures.as_ptr())[i] = capture_copy;
                }
                // SAFETY: new_obj was just constructed by this function.
                unsafe { new_obj.header_mut() }.arena_mask.union_with(capture_copy.arena_mask());
            }
            new_val
        }
    }
}
