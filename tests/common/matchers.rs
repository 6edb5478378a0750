// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Value matchers for structural assertions in tests.

#![expect(
    dead_code,
    reason = "test infrastructure used selectively across integration test files"
)]

use super::TestVm;
use arbor_vm::collections::list;
use arbor_vm::Value;

/// A matcher for structural assertions on values.
pub trait ValueMatcher {
    /// Check if the value matches this matcher's criteria.
    ///
    /// # Errors
    /// Returns an error message describing the mismatch if the value doesn't match.
    fn matches(&self, value: Value, vm: &mut TestVm) -> Result<(), String>;
}

/// Assert that a value matches the expected pattern.
///
/// # Panics
/// Panics with a descriptive message if the value doesn't match.
pub fn assert_value_matches(vm: &mut TestVm, value: Value, matcher: &dyn ValueMatcher) {
    let printed = vm.print(value);
    if let Err(msg) = matcher.matches(value, vm) {
        panic!("assertion failed: {msg}\n  actual: {printed}");
    }
}

pub struct IsNil;

impl ValueMatcher for IsNil {
    fn matches(&self, value: Value, _vm: &mut TestVm) -> Result<(), String> {
        if value.is_nil() {
            Ok(())
        } else {
            Err("expected nil".into())
        }
    }
}

pub struct IsBool(pub bool);

impl ValueMatcher for IsBool {
    fn matches(&self, value: Value, _vm: &mut TestVm) -> Result<(), String> {
        match value {
            Value::Bool(b) if b == self.0 => Ok(()),
            Value::Bool(b) => Err(format!("expected {}, got {b}", self.0)),
            _ => Err(format!("expected bool {}, got non-bool", self.0)),
        }
    }
}

pub struct IsInt(pub i32);

impl ValueMatcher for IsInt {
    fn matches(&self, value: Value, _vm: &mut TestVm) -> Result<(), String> {
        match value {
            Value::Int(n) if n == self.0 => Ok(()),
            Value::Int(n) => Err(format!("expected {}, got {n}", self.0)),
            _ => Err(format!("expected integer {}", self.0)),
        }
    }
}

pub struct IsString(pub String);

impl IsString {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl ValueMatcher for IsString {
    fn matches(&self, value: Value, _vm: &mut TestVm) -> Result<(), String> {
        match value {
            Value::Str(obj) => {
                // SAFETY: matched Value::Str above.
                let s = &unsafe { arbor_vm::heap::str_body(obj) }.0;
                if *s == self.0 {
                    Ok(())
                } else {
                    Err(format!("expected string {:?}, got {:?}", self.0, s))
                }
            }
            _ => Err(format!("expected string {:?}, got non-string", self.0)),
        }
    }
}

pub struct IsSymbol(pub String);

impl IsSymbol {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl ValueMatcher for IsSymbol {
    fn matches(&self, value: Value, vm: &mut TestVm) -> Result<(), String> {
        match value {
            Value::Symbol(id) => {
                let s = vm.ctx_mut().env.symtab.lookup(id).to_string();
                if s == self.0 {
                    Ok(())
                } else {
                    Err(format!("expected symbol {}, got {s}", self.0))
                }
            }
            _ => Err(format!("expected symbol {}", self.0)),
        }
    }
}

/// Matcher for lists with specific elements (by value, not `nil`-terminated
/// pairs — this runtime's lists are dense arrays).
pub struct IsList(pub Vec<Box<dyn ValueMatcher>>);

impl IsList {
    #[must_use]
    pub fn of(matchers: Vec<Box<dyn ValueMatcher>>) -> Self {
        Self(matchers)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(vec![])
    }
}

impl ValueMatcher for IsList {
    fn matches(&self, value: Value, vm: &mut TestVm) -> Result<(), String> {
        let Value::List(obj) = value else {
            return Err("expected a list".into());
        };
        let len = list::len(obj);
        if len != self.0.len() {
            return Err(format!("expected {} elements, got {len}", self.0.len()));
        }
        for (i, matcher) in self.0.iter().enumerate() {
            let elem = list::get(obj, i32::try_from(i).unwrap_or(i32::MAX));
            matcher.matches(elem, vm).map_err(|e| format!("at index {i}: {e}"))?;
        }
        Ok(())
    }
}

/// Matcher that checks the printed representation of a value.
pub struct PrintsAs(pub String);

impl PrintsAs {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl ValueMatcher for PrintsAs {
    fn matches(&self, value: Value, vm: &mut TestVm) -> Result<(), String> {
        let printed = vm.print(value);
        if printed == self.0 {
            Ok(())
        } else {
            Err(format!("expected to print {:?}, got {:?}", self.0, printed))
        }
    }
}
