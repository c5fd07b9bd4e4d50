//! Runtime error types shared by the engine, the scheduler and subsystems.
//!
//! Setup-time errors live in [`crate::builder::BuildError`]; the types here
//! describe what can go wrong while the robot is running.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error type returned by user callbacks (entry, action, exit, reactions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which callback of a state was running when a fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Entry,
    Action,
    Exit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entry => "entry",
            Self::Action => "action",
            Self::Exit => "exit",
        })
    }
}

/// A state callback returned an error.
///
/// The scheduler stops ticking the owning subsystem and records the fault
/// in its fault log; other subsystems keep running.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{phase} callback of '{machine}::{state}' failed: {message}")]
pub struct CallbackFault {
    pub machine: String,
    pub state: &'static str,
    pub phase: Phase,
    pub message: String,
}

/// Errors from explicit transition requests routed through the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("Machine handle ({subsystem}, {index}) does not refer to a registered machine")]
    UnknownMachine { subsystem: usize, index: usize },

    #[error(transparent)]
    Fault(#[from] CallbackFault),
}
