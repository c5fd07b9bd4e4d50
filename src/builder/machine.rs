//! Builders for states and state machines.

use crate::builder::error::BuildError;
use crate::core::{RejectGuard, State};
use crate::error::BoxError;
use crate::machine::{Callback, StateCx, StateDef, StateMachine, Timeout};
use crate::signals::SignalStore;
use std::time::Duration;

/// Default number of transitions a machine remembers.
pub const DEFAULT_HISTORY_DEPTH: usize = 32;

/// Builder for a single state's behaviour.
pub struct StateBuilder<S: State, D> {
    state: S,
    entry: Option<Callback<S, D>>,
    action: Option<Callback<S, D>>,
    exit: Option<Callback<S, D>>,
    reject: Option<RejectGuard<D>>,
    timeout: Option<Timeout<S>>,
}

impl<S: State, D> StateBuilder<S, D> {
    /// Create a state with no behaviour.
    pub fn new(state: S) -> Self {
        Self {
            state,
            entry: None,
            action: None,
            exit: None,
            reject: None,
            timeout: None,
        }
    }

    /// Run once each time the state is entered.
    pub fn entry<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut StateCx<'_, S, D>) -> Result<(), BoxError> + 'static,
    {
        self.entry = Some(Box::new(f));
        self
    }

    /// Run once per tick while the state is active.
    pub fn action<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut StateCx<'_, S, D>) -> Result<(), BoxError> + 'static,
    {
        self.action = Some(Box::new(f));
        self
    }

    /// Run once each time the state is left.
    pub fn exit<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut StateCx<'_, S, D>) -> Result<(), BoxError> + 'static,
    {
        self.exit = Some(Box::new(f));
        self
    }

    /// Refuse entry while the predicate returns `true`.
    pub fn reject_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&D, &SignalStore) -> bool + 'static,
    {
        self.reject = Some(RejectGuard::new(predicate));
        self
    }

    /// Move to `target` once the state has been active for `after`.
    pub fn timeout(mut self, after: Duration, target: S) -> Self {
        self.timeout = Some(Timeout { after, target });
        self
    }

    pub(crate) fn into_def(self) -> StateDef<S, D> {
        StateDef {
            state: self.state,
            entry: self.entry,
            action: self.action,
            exit: self.exit,
            reject: self.reject,
            timeout: self.timeout,
        }
    }
}

/// Builder for constructing state machines with a fluent API.
pub struct StateMachineBuilder<S: State, D> {
    name: String,
    data: D,
    default: Option<S>,
    states: Vec<StateDef<S, D>>,
    history_depth: Option<usize>,
}

impl<S: State, D> StateMachineBuilder<S, D> {
    /// Create a builder for a machine owning `data`.
    pub fn new(name: impl Into<String>, data: D) -> Self {
        Self {
            name: name.into(),
            data,
            default: None,
            states: Vec::new(),
            history_depth: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a state. Returns an error if the state is already defined.
    pub fn state(mut self, builder: StateBuilder<S, D>) -> Result<Self, BuildError> {
        let def = builder.into_def();
        if self.states.iter().any(|s| s.state == def.state) {
            return Err(BuildError::DuplicateState {
                machine: self.name,
                state: def.state.name(),
            });
        }
        self.states.push(def);
        Ok(self)
    }

    /// Set the default state (required). It is entered at startup and
    /// whenever an unknown state is requested.
    pub fn default_state(mut self, state: S) -> Self {
        self.default = Some(state);
        self
    }

    /// Number of transitions to keep for diagnostics.
    pub fn history_depth(mut self, depth: usize) -> Self {
        self.history_depth = Some(depth);
        self
    }

    pub(crate) fn default_history_depth(mut self, depth: usize) -> Self {
        self.history_depth.get_or_insert(depth);
        self
    }

    /// Build the state machine.
    /// Returns an error if the default state or a timeout target is undefined.
    pub fn build(self) -> Result<StateMachine<S, D>, BuildError> {
        let default = self
            .default
            .ok_or_else(|| BuildError::MissingDefaultState(self.name.clone()))?;

        if !self.states.iter().any(|s| s.state == default) {
            return Err(BuildError::UndefinedDefaultState {
                machine: self.name,
                state: default.name(),
            });
        }

        for def in &self.states {
            if let Some(timeout) = &def.timeout {
                if !self.states.iter().any(|s| s.state == timeout.target) {
                    return Err(BuildError::UndefinedTimeoutTarget {
                        machine: self.name.clone(),
                        state: def.state.name(),
                        target: timeout.target.name(),
                    });
                }
            }
        }

        Ok(StateMachine::from_parts(
            self.name,
            self.data,
            default,
            self.states,
            self.history_depth.unwrap_or(DEFAULT_HISTORY_DEPTH),
        ))
    }
}
