//! Operator-facing diagnostics: the fault log and the self-test suite.
//!
//! Self-tests are not realtime. They command actuators, pause, and inspect
//! the result, so they only run while the robot is disabled and take over
//! the scheduler from the periodic loop. A test that needs timeouts and
//! actions to keep running waits with [`settle`].

use crate::clock::ManualClock;
use crate::core::State;
use crate::error::BoxError;
use crate::events::{RobotEvent, RobotMode};
use crate::machine::Transition;
use crate::scheduler::{MachineHandle, Scheduler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Where a fault came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum FaultSource {
    Subsystem(String),
    Event(RobotEvent),
    Routine(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    pub timestamp: DateTime<Utc>,
    pub source: FaultSource,
    pub message: String,
}

/// Bounded log of runtime faults, oldest dropped first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FaultLog {
    records: VecDeque<FaultRecord>,
    #[serde(skip)]
    capacity: usize,
    total: u64,
}

impl FaultLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            total: 0,
        }
    }

    pub fn record(&mut self, timestamp: DateTime<Utc>, source: FaultSource, message: String) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(FaultRecord {
            timestamp,
            source,
            message,
        });
    }

    pub fn records(&self) -> impl Iterator<Item = &FaultRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Faults recorded since creation, including dropped ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn drain(&mut self) -> Vec<FaultRecord> {
        self.records.drain(..).collect()
    }
}

/// How a self-test waits for an actuator to move.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Advances a manual clock instead of sleeping.
impl Pause for ManualClock {
    fn pause(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Wait for `duration` while ticking the scheduler once per period, so
/// timeouts and actions keep running during a self-test.
pub fn settle(scheduler: &mut Scheduler, pause: &dyn Pause, duration: Duration) {
    let period = scheduler.config().period().max(Duration::from_millis(1));
    let mut waited = Duration::ZERO;
    while waited < duration {
        pause.pause(period);
        scheduler.tick();
        waited += period;
    }
}

/// Self-test that steps a machine through `sequence`, `step` apart, then
/// requests the empty state name. Passes when no step was rejected and the
/// machine fell back to its default state.
pub fn actuation_test<S: State, D: 'static>(
    handle: MachineHandle<S, D>,
    sequence: Vec<S>,
    step: Duration,
) -> impl FnMut(&mut Scheduler, &dyn Pause) -> Result<bool, BoxError> + 'static {
    move |scheduler: &mut Scheduler, pause: &dyn Pause| {
        for &state in &sequence {
            if let Transition::Rejected { .. } = scheduler.set_state(handle, state)? {
                return Ok(false);
            }
            pause.pause(step);
        }
        scheduler.set_state_named(handle, "")?;
        pause.pause(step);

        let default = scheduler.machine(handle).map(|m| m.default_state());
        Ok(default.is_some() && scheduler.state(handle) == default)
    }
}

/// A self-test returns whether the mechanism passed.
pub type SelfTestFn = Box<dyn FnMut(&mut Scheduler, &dyn Pause) -> Result<bool, BoxError>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum TestOutcome {
    Passed,
    Failed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TestOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub started: DateTime<Utc>,
    pub results: Vec<TestResult>,
}

impl DiagnosticReport {
    /// `true` when every test passed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome == TestOutcome::Passed)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiagnosticError {
    #[error("Self-tests only run while the robot is disabled (mode is {0:?})")]
    NotDisabled(RobotMode),
}

/// Named self-tests contributed by subsystems.
#[derive(Default)]
pub struct DiagnosticSuite {
    tests: Vec<(String, SelfTestFn)>,
}

impl DiagnosticSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: impl Into<String>, test: F)
    where
        F: FnMut(&mut Scheduler, &dyn Pause) -> Result<bool, BoxError> + 'static,
    {
        self.tests.push((name.into(), Box::new(test)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.tests.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Run every test in order. A failing or erroring test does not stop
    /// the ones after it.
    pub fn run(&mut self, scheduler: &mut Scheduler, pause: &dyn Pause) -> Result<DiagnosticReport, DiagnosticError> {
        if scheduler.mode() != RobotMode::Disabled {
            return Err(DiagnosticError::NotDisabled(scheduler.mode()));
        }
        scheduler.start();

        let started = scheduler.now();
        let mut results = Vec::with_capacity(self.tests.len());
        for (name, test) in &mut self.tests {
            let began = scheduler.now();
            let outcome = match test(scheduler, pause) {
                Ok(true) => TestOutcome::Passed,
                Ok(false) => TestOutcome::Failed,
                Err(e) => TestOutcome::Error(e.to_string()),
            };
            let duration = scheduler
                .now()
                .signed_duration_since(began)
                .to_std()
                .unwrap_or(Duration::ZERO);

            match &outcome {
                TestOutcome::Passed => info!(test = %name, "self-test passed"),
                TestOutcome::Failed => warn!(test = %name, "self-test failed"),
                TestOutcome::Error(e) => warn!(test = %name, error = %e, "self-test errored"),
            }
            results.push(TestResult {
                name: name.clone(),
                outcome,
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            });
        }

        Ok(DiagnosticReport { started, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::SchedulerConfig;

    fn scheduler() -> (Scheduler, ManualClock) {
        let clock = ManualClock::starting_now();
        (Scheduler::new(SchedulerConfig::default(), Box::new(clock.clone())), clock)
    }

    #[test]
    fn fault_log_is_bounded() {
        let mut log = FaultLog::with_capacity(2);
        let now = Utc::now();
        for i in 0..3 {
            log.record(now, FaultSource::Subsystem("Elevator".into()), format!("fault {i}"));
        }

        assert_eq!(log.len(), 2);
        assert_eq!(log.total(), 3);
        assert_eq!(log.records().next().map(|r| r.message.as_str()), Some("fault 1"));

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn fault_source_serializes_with_kind() {
        let source = FaultSource::Subsystem("Drivetrain".into());
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            serde_json::json!({"kind": "subsystem", "name": "Drivetrain"})
        );
    }

    #[test]
    fn suite_refuses_to_run_when_enabled() {
        let (mut scheduler, clock) = scheduler();
        scheduler.set_mode(RobotMode::Teleop).unwrap();
        let mut suite = DiagnosticSuite::new();
        suite.add("noop", |_, _| Ok(true));

        assert_eq!(
            suite.run(&mut scheduler, &clock).unwrap_err(),
            DiagnosticError::NotDisabled(RobotMode::Teleop)
        );
    }

    #[test]
    fn settle_ticks_once_per_period() {
        let (mut scheduler, clock) = scheduler();
        let start = clock.now();

        settle(&mut scheduler, &clock, Duration::from_millis(100));

        assert_eq!(scheduler.stats().count, 5);
        assert_eq!(
            clock.now().signed_duration_since(start).num_milliseconds(),
            100
        );
    }

    #[test]
    fn actuation_test_ends_in_default_state() {
        use crate::builder::{on_entry, StateMachineBuilder};
        use crate::machine::StateCx;
        use crate::state_enum;

        state_enum! {
            enum Kicker {
                Out => "out",
                In => "in",
            }
        }

        let (mut scheduler, clock) = scheduler();
        let kicker = scheduler
            .add_subsystem("Kicker")
            .unwrap()
            .declare(
                StateMachineBuilder::new("kicker", Vec::<Kicker>::new())
                    .state(on_entry(Kicker::Out, |cx: &mut StateCx<'_, Kicker, Vec<Kicker>>| {
                        cx.data.push(Kicker::Out);
                        Ok(())
                    }))
                    .unwrap()
                    .state(on_entry(Kicker::In, |cx: &mut StateCx<'_, Kicker, Vec<Kicker>>| {
                        cx.data.push(Kicker::In);
                        Ok(())
                    }))
                    .unwrap()
                    .default_state(Kicker::In),
            )
            .unwrap();

        let mut suite = DiagnosticSuite::new();
        suite.add(
            "Kicker test",
            actuation_test(kicker, vec![Kicker::Out, Kicker::In], Duration::from_secs(1)),
        );
        let report = suite.run(&mut scheduler, &clock).unwrap();

        assert!(report.passed());
        assert_eq!(report.results[0].duration_ms, 3000);
        assert_eq!(
            scheduler.machine(kicker).unwrap().data(),
            &vec![Kicker::In, Kicker::Out, Kicker::In]
        );
    }

    #[test]
    fn suite_reports_every_outcome() {
        let (mut scheduler, clock) = scheduler();
        let mut suite = DiagnosticSuite::new();
        suite.add("waits", |_, pause| {
            pause.pause(Duration::from_secs(1));
            Ok(true)
        });
        suite.add("fails", |_, _| Ok(false));
        suite.add("errors", |_, _| Err("no air pressure".into()));

        let report = suite.run(&mut scheduler, &clock).unwrap();

        assert!(!report.passed());
        assert_eq!(report.results[0].duration_ms, 1000);
        assert_eq!(report.results[1].outcome, TestOutcome::Failed);
        assert_eq!(report.results[2].outcome, TestOutcome::Error("no air pressure".into()));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["results"][0]["outcome"], "passed");
        assert_eq!(json["results"][2]["error"], "no air pressure");
    }
}
