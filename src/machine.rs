//! The state machine engine.
//!
//! A [`StateMachine`] owns its states, its data record and the marker of
//! which state is active. Callbacks receive a [`StateCx`] through which they
//! reach the machine's data and the signal store, and through which they may
//! request the next state.
//!
//! Transitions follow one algorithm wherever they come from:
//!
//! 1. An unknown or empty state name resolves to the default state.
//! 2. Requesting the active state is a no-op.
//! 3. The destination's reject-guard may refuse the request.
//! 4. Otherwise the current state's exit runs, the destination becomes
//!    active (arming its timeout) and its entry runs.

use crate::clock::elapsed;
use crate::core::{Cause, RejectGuard, State, StateHistory, StateWatch, TransitionRecord};
use crate::error::{BoxError, CallbackFault, Phase};
use crate::signals::SignalStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of follow-up requests applied within one call.
const MAX_CHAINED_REQUESTS: usize = 8;

/// Boxed entry, action or exit callback.
pub type Callback<S, D> = Box<dyn FnMut(&mut StateCx<'_, S, D>) -> Result<(), BoxError>>;

/// Automatic transition armed when a state is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout<S> {
    pub after: Duration,
    pub target: S,
}

pub(crate) struct StateDef<S: State, D> {
    pub(crate) state: S,
    pub(crate) entry: Option<Callback<S, D>>,
    pub(crate) action: Option<Callback<S, D>>,
    pub(crate) exit: Option<Callback<S, D>>,
    pub(crate) reject: Option<RejectGuard<D>>,
    pub(crate) timeout: Option<Timeout<S>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Request<S> {
    To(S),
    Named(String),
}

#[derive(Debug, Clone, Copy)]
struct Active<S> {
    state: S,
    index: usize,
    entered_at: DateTime<Utc>,
    entered_cycle: u64,
    timeout_armed: bool,
}

/// Outcome of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// The machine switched states.
    Entered { from: Option<S>, to: S, cause: Cause },
    /// The requested state was already active.
    Unchanged(S),
    /// The destination's reject-guard refused entry.
    Rejected { current: Option<S>, target: S },
}

impl<S: State> Transition<S> {
    pub fn entered(&self) -> bool {
        matches!(self, Self::Entered { .. })
    }
}

/// What a callback sees while it runs.
pub struct StateCx<'a, S: State, D> {
    /// The machine's private data record.
    pub data: &'a mut D,
    signals: &'a SignalStore,
    state: S,
    entered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    request: Option<Request<S>>,
}

impl<'a, S: State, D> StateCx<'a, S, D> {
    pub fn signals(&self) -> &SignalStore {
        self.signals
    }

    /// The state whose callback is running.
    pub fn state(&self) -> S {
        self.state
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// How long the running state has been active.
    pub fn time_in_state(&self) -> Duration {
        elapsed(self.entered_at, self.now)
    }

    /// Request a transition, applied as soon as the callback returns.
    /// A later request in the same callback replaces an earlier one.
    pub fn set_state(&mut self, state: S) {
        self.request = Some(Request::To(state));
    }

    /// Request a transition by name; unknown names fall back to the default.
    pub fn set_state_named(&mut self, name: impl Into<String>) {
        self.request = Some(Request::Named(name.into()));
    }
}

/// A named finite-state machine with a fixed set of states.
pub struct StateMachine<S: State, D> {
    name: String,
    data: D,
    default: S,
    states: Vec<StateDef<S, D>>,
    active: Option<Active<S>>,
    history: StateHistory<S>,
    watch: StateWatch<S>,
    cycle: u64,
}

impl<S: State, D> StateMachine<S, D> {
    pub(crate) fn from_parts(
        name: String,
        data: D,
        default: S,
        states: Vec<StateDef<S, D>>,
        history_depth: usize,
    ) -> Self {
        Self {
            name,
            data,
            default,
            states,
            active: None,
            history: StateHistory::with_capacity(history_depth),
            watch: StateWatch::new(default),
            cycle: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active state, `None` before the machine has started.
    pub fn state(&self) -> Option<S> {
        self.active.map(|a| a.state)
    }

    pub fn state_name(&self) -> Option<&'static str> {
        self.state().map(|s| s.name())
    }

    pub fn default_state(&self) -> S {
        self.default
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn history(&self) -> &StateHistory<S> {
        &self.history
    }

    /// Shared view of the active state for other machines' guards.
    pub fn watch(&self) -> StateWatch<S> {
        self.watch.clone()
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.active.map(|a| a.entered_at)
    }

    pub fn defines(&self, state: S) -> bool {
        self.index_of(state).is_some()
    }

    pub fn is_started(&self) -> bool {
        self.active.is_some()
    }

    /// Enter the default state. Its reject-guard is not consulted.
    pub fn start(
        &mut self,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Transition<S>, CallbackFault> {
        if let Some(active) = self.active {
            return Ok(Transition::Unchanged(active.state));
        }
        let index = self.index_of(self.default).unwrap_or(0);
        let pending = self.enter(index, Cause::Startup, signals, now)?;
        self.follow(pending, signals, now)?;
        Ok(Transition::Entered {
            from: None,
            to: self.states[index].state,
            cause: Cause::Startup,
        })
    }

    /// Request a transition to `state`.
    pub fn set_state(
        &mut self,
        state: S,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Transition<S>, CallbackFault> {
        self.apply(Request::To(state), signals, now)
    }

    /// Request a transition by state name.
    pub fn set_state_named(
        &mut self,
        name: &str,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Transition<S>, CallbackFault> {
        self.apply(Request::Named(name.to_string()), signals, now)
    }

    /// Advance the machine by one scheduler cycle.
    ///
    /// Starts the machine if needed. An expired timeout is handled before
    /// the action; the action never runs in the cycle its state was entered.
    pub fn tick(
        &mut self,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition<S>>, CallbackFault> {
        self.begin_cycle();
        self.advance(signals, now)
    }

    pub(crate) fn begin_cycle(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
    }

    pub(crate) fn advance(
        &mut self,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition<S>>, CallbackFault> {
        let Some(active) = self.active else {
            return self.start(signals, now).map(Some);
        };

        if let Some(timeout) = self.expired_timeout(&active, now) {
            if let Some(a) = self.active.as_mut() {
                a.timeout_armed = false;
            }
            let (transition, pending) = self.switch(timeout.target, Cause::Timeout, signals, now)?;
            match transition {
                Transition::Entered { .. } => {
                    self.follow(pending, signals, now)?;
                    return Ok(Some(transition));
                }
                Transition::Rejected { .. } => {
                    warn!(
                        machine = %self.name,
                        state = active.state.name(),
                        target = timeout.target.name(),
                        "timeout target rejected entry"
                    );
                }
                Transition::Unchanged(_) => {}
            }
        }

        let Some(active) = self.active else {
            return Ok(None);
        };
        if active.entered_cycle == self.cycle {
            return Ok(None);
        }

        match self.run(active.index, Phase::Action, signals, now)? {
            Some(request) => self.apply(request, signals, now).map(Some),
            None => Ok(None),
        }
    }

    fn expired_timeout(&self, active: &Active<S>, now: DateTime<Utc>) -> Option<Timeout<S>> {
        if !active.timeout_armed {
            return None;
        }
        let timeout = self.states[active.index].timeout?;
        (elapsed(active.entered_at, now) >= timeout.after).then_some(timeout)
    }

    fn index_of(&self, state: S) -> Option<usize> {
        self.states.iter().position(|def| def.state == state)
    }

    fn resolve(&self, request: Request<S>) -> (S, Cause) {
        match request {
            Request::To(state) if self.defines(state) => (state, Cause::Request),
            Request::To(state) => {
                warn!(
                    machine = %self.name,
                    requested = state.name(),
                    fallback = self.default.name(),
                    "state not defined, falling back to default"
                );
                (self.default, Cause::Fallback)
            }
            Request::Named(name) => {
                match S::from_name(&name).filter(|s| self.defines(*s)) {
                    Some(state) => (state, Cause::Request),
                    None if name.is_empty() => {
                        debug!(machine = %self.name, "empty state request, using default");
                        (self.default, Cause::Fallback)
                    }
                    None => {
                        warn!(
                            machine = %self.name,
                            requested = %name,
                            fallback = self.default.name(),
                            "unknown state name, falling back to default"
                        );
                        (self.default, Cause::Fallback)
                    }
                }
            }
        }
    }

    fn apply(
        &mut self,
        request: Request<S>,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Transition<S>, CallbackFault> {
        if self.active.is_none() {
            self.start(signals, now)?;
        }
        let (target, cause) = self.resolve(request);
        let (transition, pending) = self.switch(target, cause, signals, now)?;
        self.follow(pending, signals, now)?;
        Ok(transition)
    }

    /// Apply requests made by entry or action callbacks.
    fn follow(
        &mut self,
        mut pending: Option<Request<S>>,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<(), CallbackFault> {
        let mut hops = 0;
        while let Some(request) = pending.take() {
            if hops == MAX_CHAINED_REQUESTS {
                warn!(machine = %self.name, "too many chained state requests, dropping the rest");
                break;
            }
            hops += 1;
            let (target, cause) = self.resolve(request);
            pending = self.switch(target, cause, signals, now)?.1;
        }
        Ok(())
    }

    fn switch(
        &mut self,
        target: S,
        cause: Cause,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<(Transition<S>, Option<Request<S>>), CallbackFault> {
        let current = self.active;
        if current.map(|a| a.state) == Some(target) {
            return Ok((Transition::Unchanged(target), None));
        }
        let Some(index) = self.index_of(target) else {
            return Ok((Transition::Unchanged(self.default), None));
        };

        if let Some(guard) = &self.states[index].reject {
            if guard.rejects(&self.data, signals) {
                debug!(
                    machine = %self.name,
                    target = target.name(),
                    "entry rejected by guard"
                );
                return Ok((
                    Transition::Rejected {
                        current: current.map(|a| a.state),
                        target,
                    },
                    None,
                ));
            }
        }

        if let Some(leaving) = current {
            if self.run(leaving.index, Phase::Exit, signals, now)?.is_some() {
                warn!(
                    machine = %self.name,
                    state = leaving.state.name(),
                    "state request from exit callback ignored"
                );
            }
        }

        let pending = self.enter(index, cause, signals, now)?;
        Ok((
            Transition::Entered {
                from: current.map(|a| a.state),
                to: target,
                cause,
            },
            pending,
        ))
    }

    fn enter(
        &mut self,
        index: usize,
        cause: Cause,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Request<S>>, CallbackFault> {
        let state = self.states[index].state;
        let from = self.state();
        self.active = Some(Active {
            state,
            index,
            entered_at: now,
            entered_cycle: self.cycle,
            timeout_armed: self.states[index].timeout.is_some(),
        });
        self.watch.publish(state);
        self.history.record(TransitionRecord {
            from,
            to: state,
            cause,
            timestamp: now,
        });
        debug!(
            machine = %self.name,
            from = from.map(|s| s.name()).unwrap_or("-"),
            to = state.name(),
            ?cause,
            "state entered"
        );
        self.run(index, Phase::Entry, signals, now)
    }

    fn run(
        &mut self,
        index: usize,
        phase: Phase,
        signals: &SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Option<Request<S>>, CallbackFault> {
        let entered_at = self.active.map(|a| a.entered_at).unwrap_or(now);
        let def = &mut self.states[index];
        let state = def.state;
        let callback = match phase {
            Phase::Entry => def.entry.as_mut(),
            Phase::Action => def.action.as_mut(),
            Phase::Exit => def.exit.as_mut(),
        };
        let Some(callback) = callback else {
            return Ok(None);
        };

        let mut cx = StateCx {
            data: &mut self.data,
            signals,
            state,
            entered_at,
            now,
            request: None,
        };
        let result = callback(&mut cx);
        let request = cx.request.take();

        result.map(|()| request).map_err(|e| CallbackFault {
            machine: self.name.clone(),
            state: state.name(),
            phase,
            message: e.to_string(),
        })
    }
}

/// Serializable view of one machine for the operator channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    pub name: String,
    pub state: Option<&'static str>,
    pub entered_at: Option<DateTime<Utc>>,
    pub recent: Vec<&'static str>,
}

/// Type-erased machine interface used by the scheduler.
pub(crate) trait ErasedMachine {
    fn name(&self) -> &str;
    fn start(&mut self, signals: &SignalStore, now: DateTime<Utc>) -> Result<(), CallbackFault>;
    fn begin_cycle(&mut self);
    fn advance(&mut self, signals: &SignalStore, now: DateTime<Utc>) -> Result<(), CallbackFault>;
    fn snapshot(&self) -> MachineSnapshot;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: State, D: 'static> ErasedMachine for StateMachine<S, D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, signals: &SignalStore, now: DateTime<Utc>) -> Result<(), CallbackFault> {
        StateMachine::start(self, signals, now).map(drop)
    }

    fn begin_cycle(&mut self) {
        StateMachine::begin_cycle(self)
    }

    fn advance(&mut self, signals: &SignalStore, now: DateTime<Utc>) -> Result<(), CallbackFault> {
        StateMachine::advance(self, signals, now).map(drop)
    }

    fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            name: self.name.clone(),
            state: self.state_name(),
            entered_at: self.entered_at(),
            recent: self.history.get_path().iter().map(|s| s.name()).collect(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
