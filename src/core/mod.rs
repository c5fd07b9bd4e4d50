//! Core state machine types.
//!
//! This module contains the building blocks the engine is made of:
//! - State definitions via the `State` trait
//! - Reject-guards and watches for transition control
//! - Bounded history tracking

mod guard;
mod history;
mod state;

pub use guard::{RejectGuard, StateWatch};
pub use history::{Cause, StateHistory, TransitionRecord};
pub use state::State;
