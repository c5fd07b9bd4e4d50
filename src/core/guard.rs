//! Reject-guards and cross-machine state watches.
//!
//! A reject-guard is evaluated against the *destination* of a transition.
//! When it returns `true` the request is refused and the machine stays
//! where it is, with no exit or entry fired.

use super::state::State;
use crate::signals::SignalStore;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Predicate that blocks entry into a state.
///
/// # Example
///
/// ```rust
/// use robomind::core::RejectGuard;
/// use robomind::signals::SignalStore;
///
/// let signals = SignalStore::new();
/// signals.declare_flag("elevator.homed", false).unwrap();
///
/// let unhomed = RejectGuard::new(|_: &(), s: &SignalStore| {
///     !s.flag("elevator.homed").unwrap_or(false)
/// });
///
/// assert!(unhomed.rejects(&(), &signals));
/// signals.set_flag("elevator.homed", true).unwrap();
/// assert!(!unhomed.rejects(&(), &signals));
/// ```
pub struct RejectGuard<D> {
    predicate: Box<dyn Fn(&D, &SignalStore) -> bool>,
}

impl<D> RejectGuard<D> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&D, &SignalStore) -> bool + 'static,
    {
        RejectGuard {
            predicate: Box::new(predicate),
        }
    }

    /// `true` when entry must be refused.
    pub fn rejects(&self, data: &D, signals: &SignalStore) -> bool {
        (self.predicate)(data, signals)
    }
}

impl<D> fmt::Debug for RejectGuard<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RejectGuard")
    }
}

/// Read-only view of another machine's active state.
///
/// Before the watched machine has started, the watch reports its default
/// state.
#[derive(Debug, Clone)]
pub struct StateWatch<S: State> {
    active: Rc<Cell<S>>,
}

impl<S: State> StateWatch<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self {
            active: Rc::new(Cell::new(initial)),
        }
    }

    pub(crate) fn publish(&self, state: S) {
        self.active.set(state);
    }

    pub fn get(&self) -> S {
        self.active.get()
    }

    pub fn is(&self, state: S) -> bool {
        self.active.get() == state
    }
}
