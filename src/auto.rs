//! Autonomous routines.
//!
//! At most one [`AutoLoop`] is active. It is entered when the robot enters
//! autonomous mode, runs at its own rate on the scheduler clock, and exits
//! when it reports itself done or the mode changes.

use crate::clock::elapsed;
use crate::diagnostics::FaultSource;
use crate::error::BoxError;
use crate::scheduler::Control;
use crate::subsystems::drivetrain::signal;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

/// A routine run during autonomous mode.
pub trait AutoLoop {
    fn name(&self) -> &str;

    /// Minimum time between two actions.
    fn rate(&self) -> Duration;

    fn entry(&mut self, cx: &mut Control<'_>) -> Result<(), BoxError>;

    fn action(&mut self, cx: &mut Control<'_>) -> Result<(), BoxError>;

    fn exit(&mut self, _cx: &mut Control<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Set by the routine itself once it has finished.
    fn done(&self) -> bool;
}

/// Owner of the selected routine and its activity.
#[derive(Default)]
pub struct AutoManager {
    routine: Option<Box<dyn AutoLoop>>,
    active: bool,
    last_action: Option<DateTime<Utc>>,
}

impl AutoManager {
    /// Replace the selected routine. Call [`AutoManager::stop`] first if one
    /// is active; an active routine is dropped without its exit here.
    pub fn select(&mut self, routine: Box<dyn AutoLoop>) {
        info!(routine = routine.name(), "autonomous routine selected");
        self.routine = Some(routine);
        self.active = false;
        self.last_action = None;
    }

    pub fn name(&self) -> Option<&str> {
        self.routine.as_deref().map(|r| r.name())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter the selected routine.
    pub fn begin(&mut self, cx: &mut Control<'_>) {
        let Some(routine) = self.routine.as_mut() else {
            return;
        };
        if self.active {
            return;
        }
        self.last_action = None;
        match routine.entry(cx) {
            Ok(()) => {
                info!(routine = routine.name(), "autonomous routine started");
                self.active = true;
            }
            Err(e) => fault(cx, &**routine, "entry", e),
        }
    }

    /// Run the routine's action if it is due, then exit it once done.
    pub fn tick(&mut self, cx: &mut Control<'_>) {
        let Some(routine) = self.routine.as_mut() else {
            return;
        };
        if !self.active {
            return;
        }

        let now = cx.now();
        let due = self
            .last_action
            .map_or(true, |last| elapsed(last, now) >= routine.rate());
        if due {
            self.last_action = Some(now);
            if let Err(e) = routine.action(cx) {
                self.active = false;
                fault(cx, &**routine, "action", e);
                // A failed routine still exits.
                if let Err(e) = routine.exit(cx) {
                    fault(cx, &**routine, "exit", e);
                }
                return;
            }
        }

        if routine.done() {
            self.active = false;
            match routine.exit(cx) {
                Ok(()) => info!(routine = routine.name(), "autonomous routine finished"),
                Err(e) => fault(cx, &**routine, "exit", e),
            }
        }
    }

    /// Exit the routine early.
    pub fn stop(&mut self, cx: &mut Control<'_>) {
        let Some(routine) = self.routine.as_mut() else {
            return;
        };
        if !self.active {
            return;
        }
        self.active = false;
        match routine.exit(cx) {
            Ok(()) => info!(routine = routine.name(), "autonomous routine stopped"),
            Err(e) => fault(cx, &**routine, "exit", e),
        }
    }
}

fn fault(cx: &mut Control<'_>, routine: &dyn AutoLoop, phase: &str, e: BoxError) {
    error!(routine = routine.name(), phase, error = %e, "autonomous routine failed");
    cx.record_fault(
        FaultSource::Routine(routine.name().to_string()),
        format!("{phase} failed: {e}"),
    );
}

/// Drive open-loop for a fixed time, then stop.
///
/// Writes the drivetrain's autonomous output signals, which the drivetrain
/// follows while in external control.
#[derive(Debug, Clone)]
pub struct TimedDrive {
    left: f64,
    right: f64,
    duration: Duration,
    rate: Duration,
    started: Option<DateTime<Utc>>,
    finished: bool,
}

impl TimedDrive {
    pub fn new(left: f64, right: f64, duration: Duration) -> Self {
        Self {
            left,
            right,
            duration,
            rate: Duration::from_millis(20),
            started: None,
            finished: false,
        }
    }

    pub fn with_rate(mut self, rate: Duration) -> Self {
        self.rate = rate;
        self
    }

    fn command(cx: &Control<'_>, left: f64, right: f64) -> Result<(), BoxError> {
        cx.signals().set_number(signal::AUTO_LEFT, left)?;
        cx.signals().set_number(signal::AUTO_RIGHT, right)?;
        Ok(())
    }
}

impl AutoLoop for TimedDrive {
    fn name(&self) -> &str {
        "timed_drive"
    }

    fn rate(&self) -> Duration {
        self.rate
    }

    fn entry(&mut self, cx: &mut Control<'_>) -> Result<(), BoxError> {
        self.started = Some(cx.now());
        self.finished = false;
        Self::command(cx, self.left, self.right)
    }

    fn action(&mut self, cx: &mut Control<'_>) -> Result<(), BoxError> {
        let started = *self.started.get_or_insert(cx.now());
        if elapsed(started, cx.now()) >= self.duration {
            self.finished = true;
            return Self::command(cx, 0.0, 0.0);
        }
        Self::command(cx, self.left, self.right)
    }

    fn exit(&mut self, cx: &mut Control<'_>) -> Result<(), BoxError> {
        self.started = None;
        Self::command(cx, 0.0, 0.0)
    }

    fn done(&self) -> bool {
        self.finished
    }
}
