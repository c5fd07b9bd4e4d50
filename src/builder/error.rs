//! Setup errors for state machines, subsystems and signals.

use crate::signals::SignalError;
use thiserror::Error;

/// Errors that can occur while wiring the robot together.
///
/// All of them are fatal: they are raised during setup, before the first
/// tick, and are never recovered from.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("State '{state}' is declared twice in machine '{machine}'")]
    DuplicateState {
        machine: String,
        state: &'static str,
    },

    #[error("Machine '{machine}' is declared twice in subsystem '{subsystem}'")]
    DuplicateMachine { subsystem: String, machine: String },

    #[error("Subsystem '{0}' is registered twice")]
    DuplicateSubsystem(String),

    #[error("Default state not specified for machine '{0}'. Call .default_state(state) before .build()")]
    MissingDefaultState(String),

    #[error("Default state '{state}' of machine '{machine}' has no definition. Add it with .state()")]
    UndefinedDefaultState {
        machine: String,
        state: &'static str,
    },

    #[error("Timeout of '{machine}::{state}' targets undefined state '{target}'")]
    UndefinedTimeoutTarget {
        machine: String,
        state: &'static str,
        target: &'static str,
    },

    #[error("Machine handle does not refer to a machine of this scheduler")]
    UnknownMachine,

    #[error(transparent)]
    Signal(#[from] SignalError),
}
