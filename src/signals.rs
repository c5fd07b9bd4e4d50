//! Named values shared between subsystems and external observers.
//!
//! The store is created once by the [`Scheduler`](crate::Scheduler) and lent
//! to every callback by reference. Everything runs on the scheduler thread,
//! so interior mutability is a plain `RefCell`; no borrow is ever held
//! across a callback.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use thiserror::Error;

/// Current value of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Number(f64),
    Flag(bool),
}

impl SignalValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Flag(_) => "flag",
        }
    }
}

/// Errors raised by signal reads and writes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("Signal '{0}' is not declared")]
    Unknown(String),

    #[error("Signal '{name}' holds a {expected}, not a {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Signal '{0}' is already declared")]
    Duplicate(String),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: SignalValue,
    default: SignalValue,
}

/// Process-wide named values (setpoints, ready flags, telemetry).
#[derive(Debug, Default)]
pub struct SignalStore {
    entries: RefCell<BTreeMap<String, Entry>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a signal with its default value. Names are unique.
    pub fn declare(&self, name: impl Into<String>, default: SignalValue) -> Result<(), SignalError> {
        let name = name.into();
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&name) {
            return Err(SignalError::Duplicate(name));
        }
        entries.insert(
            name,
            Entry {
                value: default,
                default,
            },
        );
        Ok(())
    }

    pub fn declare_number(&self, name: impl Into<String>, default: f64) -> Result<(), SignalError> {
        self.declare(name, SignalValue::Number(default))
    }

    pub fn declare_flag(&self, name: impl Into<String>, default: bool) -> Result<(), SignalError> {
        self.declare(name, SignalValue::Flag(default))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<SignalValue> {
        self.entries.borrow().get(name).map(|e| e.value)
    }

    pub fn number(&self, name: &str) -> Result<f64, SignalError> {
        match self.get(name) {
            Some(SignalValue::Number(v)) => Ok(v),
            Some(other) => Err(mismatch(name, "number", &other)),
            None => Err(SignalError::Unknown(name.to_string())),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool, SignalError> {
        match self.get(name) {
            Some(SignalValue::Flag(v)) => Ok(v),
            Some(other) => Err(mismatch(name, "flag", &other)),
            None => Err(SignalError::Unknown(name.to_string())),
        }
    }

    /// Overwrite a signal. The new value must have the declared kind.
    pub fn set(&self, name: &str, value: SignalValue) -> Result<(), SignalError> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| SignalError::Unknown(name.to_string()))?;
        if entry.default.kind() != value.kind() {
            return Err(SignalError::TypeMismatch {
                name: name.to_string(),
                expected: entry.default.kind(),
                found: value.kind(),
            });
        }
        entry.value = value;
        Ok(())
    }

    pub fn set_number(&self, name: &str, value: f64) -> Result<(), SignalError> {
        self.set(name, SignalValue::Number(value))
    }

    pub fn set_flag(&self, name: &str, value: bool) -> Result<(), SignalError> {
        self.set(name, SignalValue::Flag(value))
    }

    /// Add `delta` to a numeric signal and return the new value.
    pub fn adjust(&self, name: &str, delta: f64) -> Result<f64, SignalError> {
        let next = self.number(name)? + delta;
        self.set_number(name, next)?;
        Ok(next)
    }

    /// Restore a signal to the value it was declared with.
    pub fn reset(&self, name: &str) -> Result<(), SignalError> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| SignalError::Unknown(name.to_string()))?;
        entry.value = entry.default;
        Ok(())
    }

    /// Copy of every signal, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, SignalValue> {
        self.entries
            .borrow()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value))
            .collect()
    }
}

fn mismatch(name: &str, expected: &'static str, found: &SignalValue) -> SignalError {
    SignalError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_signal_starts_at_default() {
        let store = SignalStore::new();
        store.declare_number("elevator.position", 12.5).unwrap();
        assert_eq!(store.number("elevator.position"), Ok(12.5));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let store = SignalStore::new();
        store.declare_flag("elevator.homed", false).unwrap();
        assert_eq!(
            store.declare_flag("elevator.homed", true),
            Err(SignalError::Duplicate("elevator.homed".to_string()))
        );
    }

    #[test]
    fn writes_must_keep_declared_kind() {
        let store = SignalStore::new();
        store.declare_flag("elevator.homed", false).unwrap();

        let err = store.set_number("elevator.homed", 1.0).unwrap_err();
        assert!(matches!(err, SignalError::TypeMismatch { expected: "flag", .. }));
        assert_eq!(store.flag("elevator.homed"), Ok(false));
    }

    #[test]
    fn unknown_signal_reads_fail() {
        let store = SignalStore::new();
        assert_eq!(
            store.number("missing"),
            Err(SignalError::Unknown("missing".to_string()))
        );
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn adjust_and_reset() {
        let store = SignalStore::new();
        store.declare_number("position", 10.0).unwrap();

        assert_eq!(store.adjust("position", 2.5), Ok(12.5));
        assert_eq!(store.number("position"), Ok(12.5));

        store.reset("position").unwrap();
        assert_eq!(store.number("position"), Ok(10.0));
    }

    #[test]
    fn snapshot_serializes_as_plain_values() {
        let store = SignalStore::new();
        store.declare_number("b.position", 3.0).unwrap();
        store.declare_flag("a.ready", true).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        assert_eq!(json, r#"{"a.ready":true,"b.position":3.0}"#);
    }
}
