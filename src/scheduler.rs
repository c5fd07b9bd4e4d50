//! The periodic scheduler that owns every subsystem.
//!
//! Each tick advances the autonomous routine (when one is active) and then
//! every state machine of every healthy subsystem, in declaration order. A
//! subsystem whose callback fails is marked faulted and skipped by later
//! ticks until [`Scheduler::clear_fault`] re-enables it; the others keep
//! running.

use crate::auto::{AutoLoop, AutoManager};
use crate::builder::{BuildError, StateMachineBuilder};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::core::{State, StateWatch};
use crate::diagnostics::{FaultLog, FaultRecord, FaultSource};
use crate::error::{BoxError, CallbackFault, ControlError};
use crate::events::{EventBus, EventFault, RobotEvent, RobotMode};
use crate::machine::{ErasedMachine, MachineSnapshot, StateMachine, Transition};
use crate::signals::{SignalStore, SignalValue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Typed reference to a machine registered with a [`Scheduler`].
pub struct MachineHandle<S, D> {
    subsystem: usize,
    index: usize,
    _marker: PhantomData<fn() -> (S, D)>,
}

impl<S, D> Clone for MachineHandle<S, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, D> Copy for MachineHandle<S, D> {}

impl<S, D> PartialEq for MachineHandle<S, D> {
    fn eq(&self, other: &Self) -> bool {
        self.subsystem == other.subsystem && self.index == other.index
    }
}

impl<S, D> Eq for MachineHandle<S, D> {}

impl<S, D> fmt::Debug for MachineHandle<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineHandle")
            .field("subsystem", &self.subsystem)
            .field("index", &self.index)
            .finish()
    }
}

impl<S, D> MachineHandle<S, D> {
    fn unknown(&self) -> ControlError {
        ControlError::UnknownMachine {
            subsystem: self.subsystem,
            index: self.index,
        }
    }
}

struct SubsystemSlot {
    name: String,
    machines: Vec<Box<dyn ErasedMachine>>,
    fault: Option<CallbackFault>,
}

impl SubsystemSlot {
    fn typed<S: State, D: 'static>(&self, index: usize) -> Option<&StateMachine<S, D>> {
        self.machines.get(index)?.as_any().downcast_ref()
    }

    fn typed_mut<S: State, D: 'static>(&mut self, index: usize) -> Option<&mut StateMachine<S, D>> {
        self.machines.get_mut(index)?.as_any_mut().downcast_mut()
    }
}

/// Access to machines and signals for event reactions and autonomous
/// routines.
pub struct Control<'a> {
    subsystems: &'a mut [SubsystemSlot],
    signals: &'a SignalStore,
    faults: &'a mut FaultLog,
    now: DateTime<Utc>,
}

impl<'a> Control<'a> {
    pub fn signals(&self) -> &SignalStore {
        self.signals
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn state<S: State, D: 'static>(&self, handle: MachineHandle<S, D>) -> Option<S> {
        self.machine(handle)?.state()
    }

    pub fn machine<S: State, D: 'static>(&self, handle: MachineHandle<S, D>) -> Option<&StateMachine<S, D>> {
        self.subsystems.get(handle.subsystem)?.typed(handle.index)
    }

    /// Request a transition outside the machine's own tick.
    ///
    /// A failing callback faults the owning subsystem.
    pub fn set_state<S: State, D: 'static>(
        &mut self,
        handle: MachineHandle<S, D>,
        state: S,
    ) -> Result<Transition<S>, ControlError> {
        let (signals, now) = (self.signals, self.now);
        self.request(handle, |machine| machine.set_state(state, signals, now))
    }

    /// Request a transition by state name; unknown names fall back to the
    /// machine's default state.
    pub fn set_state_named<S: State, D: 'static>(
        &mut self,
        handle: MachineHandle<S, D>,
        name: &str,
    ) -> Result<Transition<S>, ControlError> {
        let (signals, now) = (self.signals, self.now);
        self.request(handle, |machine| machine.set_state_named(name, signals, now))
    }

    fn request<S, D, F>(&mut self, handle: MachineHandle<S, D>, f: F) -> Result<Transition<S>, ControlError>
    where
        S: State,
        D: 'static,
        F: FnOnce(&mut StateMachine<S, D>) -> Result<Transition<S>, CallbackFault>,
    {
        let machine = self
            .subsystems
            .get_mut(handle.subsystem)
            .and_then(|slot| slot.typed_mut(handle.index))
            .ok_or_else(|| handle.unknown())?;

        f(machine).map_err(|fault| {
            self.fault_subsystem(handle.subsystem, fault.clone());
            ControlError::Fault(fault)
        })
    }

    pub(crate) fn record_fault(&mut self, source: FaultSource, message: String) {
        self.faults.record(self.now, source, message);
    }

    fn fault_subsystem(&mut self, index: usize, fault: CallbackFault) {
        if let Some(slot) = self.subsystems.get_mut(index) {
            error!(
                subsystem = %slot.name,
                machine = %fault.machine,
                state = fault.state,
                phase = %fault.phase,
                error = %fault.message,
                "callback failed, subsystem disabled"
            );
            self.faults
                .record(self.now, FaultSource::Subsystem(slot.name.clone()), fault.to_string());
            slot.fault = Some(fault);
        }
    }
}

/// Timing statistics of scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleStats {
    /// Total ticks executed.
    pub count: u64,
    pub last: Duration,
    pub min: Duration,
    pub max: Duration,
    total: Duration,
    /// Ticks that took longer than the configured period.
    pub overruns: u64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            count: 0,
            last: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            total: Duration::ZERO,
            overruns: 0,
        }
    }

    pub fn record(&mut self, duration: Duration, overrun: bool) {
        self.count += 1;
        self.last = duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.total = self.total.saturating_add(duration);
        if overrun {
            self.overruns += 1;
        }
    }

    /// Average tick duration (zero before the first tick).
    pub fn average(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total / n,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Subsystems whose machines were advanced.
    pub advanced: usize,
    /// Faulted subsystems that were skipped.
    pub skipped: usize,
    /// Subsystems that faulted during this tick.
    pub faulted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsystemSnapshot {
    pub name: String,
    pub fault: Option<CallbackFault>,
    pub machines: Vec<MachineSnapshot>,
}

/// Serializable view of the whole robot for the operator channel.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub timestamp: DateTime<Utc>,
    pub mode: RobotMode,
    pub routine: Option<String>,
    pub subsystems: Vec<SubsystemSnapshot>,
    pub signals: BTreeMap<String, SignalValue>,
    pub stats: CycleStats,
}

/// Fixed-rate driver of every registered state machine.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Box<dyn Clock>,
    signals: SignalStore,
    subsystems: Vec<SubsystemSlot>,
    bus: EventBus,
    auto: AutoManager,
    faults: FaultLog,
    mode: RobotMode,
    stats: CycleStats,
    started: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            faults: FaultLog::with_capacity(config.fault_log_depth),
            config,
            clock,
            signals: SignalStore::new(),
            subsystems: Vec::new(),
            bus: EventBus::new(),
            auto: AutoManager::default(),
            mode: RobotMode::Disabled,
            stats: CycleStats::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn signals(&self) -> &SignalStore {
        &self.signals
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn mode(&self) -> RobotMode {
        self.mode
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Register a subsystem. Subsystems tick in registration order.
    pub fn add_subsystem(&mut self, name: impl Into<String>) -> Result<SubsystemSetup<'_>, BuildError> {
        let name = name.into();
        if self.subsystems.iter().any(|s| s.name == name) {
            return Err(BuildError::DuplicateSubsystem(name));
        }
        self.subsystems.push(SubsystemSlot {
            name,
            machines: Vec::new(),
            fault: None,
        });
        let index = self.subsystems.len() - 1;
        Ok(SubsystemSetup {
            scheduler: self,
            index,
        })
    }

    pub fn subsystem_names(&self) -> Vec<&str> {
        self.subsystems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Borrow machines and signals at the current time.
    pub fn control(&mut self) -> Control<'_> {
        let now = self.clock.now();
        Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        }
    }

    /// Enter every machine's default state. Called by the first tick or
    /// mode change when not called explicitly.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let now = self.clock.now();
        let mut control = Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        };
        for index in 0..control.subsystems.len() {
            let slot = &mut control.subsystems[index];
            let result = slot
                .machines
                .iter_mut()
                .try_for_each(|machine| machine.start(control.signals, now));
            if let Err(fault) = result {
                control.fault_subsystem(index, fault);
            }
        }
        info!(subsystems = self.subsystems.len(), "scheduler started");
    }

    /// Advance the autonomous routine and every healthy subsystem once.
    pub fn tick(&mut self) -> TickReport {
        let started_at = Instant::now();
        let now = self.clock.now();
        let mut report = TickReport::default();

        for slot in self.subsystems.iter_mut().filter(|s| s.fault.is_none()) {
            slot.machines.iter_mut().for_each(|m| m.begin_cycle());
        }
        self.start();

        let mut control = Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        };
        self.auto.tick(&mut control);

        for index in 0..control.subsystems.len() {
            let slot = &mut control.subsystems[index];
            if slot.fault.is_some() {
                report.skipped += 1;
                continue;
            }
            report.advanced += 1;
            let result = slot
                .machines
                .iter_mut()
                .try_for_each(|machine| machine.advance(control.signals, now));
            if let Err(fault) = result {
                report.faulted += 1;
                control.fault_subsystem(index, fault);
            }
        }

        let elapsed = started_at.elapsed();
        let period = self.config.period();
        let overrun = elapsed > period;
        self.stats.record(elapsed, overrun);
        if overrun {
            warn!(
                elapsed_us = elapsed.as_micros() as u64,
                period_ms = self.config.period_ms,
                "tick overran its period"
            );
        }
        report
    }

    /// Tick at the configured period until `running` is cleared.
    ///
    /// Deadlines are absolute, so a slow tick does not shift the ones after
    /// it; after an overrun the schedule restarts from the current instant.
    pub fn run(&mut self, running: &AtomicBool) {
        let period = self.config.period();
        let mut deadline = Instant::now();
        info!(period_ms = self.config.period_ms, "scheduler loop started");

        while running.load(Ordering::Relaxed) {
            self.tick();
            deadline += period;
            let now = Instant::now();
            match deadline.checked_duration_since(now) {
                Some(remaining) => std::thread::sleep(remaining),
                None => deadline = now,
            }
        }
        info!(ticks = self.stats.count, overruns = self.stats.overruns, "scheduler loop stopped");
    }

    /// Change the robot mode and publish the matching event.
    ///
    /// Leaving autonomous stops the active routine before the event is
    /// delivered; entering it begins the selected routine afterwards.
    pub fn set_mode(&mut self, mode: RobotMode) -> Result<usize, EventFault> {
        if mode == self.mode {
            return Ok(0);
        }
        info!(from = ?self.mode, to = ?mode, "robot mode changed");
        let previous = std::mem::replace(&mut self.mode, mode);
        self.start();

        let now = self.clock.now();
        let mut control = Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        };
        if previous == RobotMode::Autonomous {
            self.auto.stop(&mut control);
        }
        let delivered = Self::deliver(&mut self.bus, mode.event(), &mut control);
        if mode == RobotMode::Autonomous {
            self.auto.begin(&mut control);
        }
        delivered
    }

    /// Publish an event without changing the mode.
    pub fn publish(&mut self, event: RobotEvent) -> Result<usize, EventFault> {
        let now = self.clock.now();
        let mut control = Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        };
        Self::deliver(&mut self.bus, event, &mut control)
    }

    fn deliver(bus: &mut EventBus, event: RobotEvent, control: &mut Control<'_>) -> Result<usize, EventFault> {
        bus.publish(event, control).map_err(|fault| {
            control.record_fault(FaultSource::Event(event), fault.to_string());
            fault
        })
    }

    /// Select the routine run during autonomous.
    ///
    /// An active routine is stopped first. In autonomous the new routine
    /// begins right away.
    pub fn set_auto(&mut self, routine: Box<dyn AutoLoop>) {
        let now = self.clock.now();
        let mut control = Control {
            subsystems: &mut self.subsystems,
            signals: &self.signals,
            faults: &mut self.faults,
            now,
        };
        self.auto.stop(&mut control);
        self.auto.select(routine);
        if self.mode == RobotMode::Autonomous {
            self.auto.begin(&mut control);
        }
    }

    pub fn auto_active(&self) -> bool {
        self.auto.is_active()
    }

    pub fn set_state<S: State, D: 'static>(
        &mut self,
        handle: MachineHandle<S, D>,
        state: S,
    ) -> Result<Transition<S>, ControlError> {
        self.start();
        self.control().set_state(handle, state)
    }

    pub fn set_state_named<S: State, D: 'static>(
        &mut self,
        handle: MachineHandle<S, D>,
        name: &str,
    ) -> Result<Transition<S>, ControlError> {
        self.start();
        self.control().set_state_named(handle, name)
    }

    pub fn state<S: State, D: 'static>(&self, handle: MachineHandle<S, D>) -> Option<S> {
        self.machine(handle)?.state()
    }

    pub fn machine<S: State, D: 'static>(&self, handle: MachineHandle<S, D>) -> Option<&StateMachine<S, D>> {
        self.subsystems.get(handle.subsystem)?.typed(handle.index)
    }

    pub fn machine_mut<S: State, D: 'static>(
        &mut self,
        handle: MachineHandle<S, D>,
    ) -> Option<&mut StateMachine<S, D>> {
        self.subsystems.get_mut(handle.subsystem)?.typed_mut(handle.index)
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn drain_faults(&mut self) -> Vec<FaultRecord> {
        self.faults.drain()
    }

    pub fn fault(&self, subsystem: &str) -> Option<&CallbackFault> {
        self.subsystems
            .iter()
            .find(|s| s.name == subsystem)
            .and_then(|s| s.fault.as_ref())
    }

    pub fn is_faulted(&self, subsystem: &str) -> bool {
        self.fault(subsystem).is_some()
    }

    /// Re-enable a faulted subsystem. Returns `false` if it was not faulted.
    pub fn clear_fault(&mut self, subsystem: &str) -> bool {
        match self.subsystems.iter_mut().find(|s| s.name == subsystem) {
            Some(slot) if slot.fault.is_some() => {
                slot.fault = None;
                info!(subsystem, "fault cleared, subsystem re-enabled");
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            timestamp: self.clock.now(),
            mode: self.mode,
            routine: self.auto.name().map(str::to_string),
            subsystems: self
                .subsystems
                .iter()
                .map(|slot| SubsystemSnapshot {
                    name: slot.name.clone(),
                    fault: slot.fault.clone(),
                    machines: slot.machines.iter().map(|m| m.snapshot()).collect(),
                })
                .collect(),
            signals: self.signals.snapshot(),
            stats: self.stats,
        }
    }
}

/// Registration of one subsystem's machines, signals and reactions.
pub struct SubsystemSetup<'a> {
    scheduler: &'a mut Scheduler,
    index: usize,
}

impl<'a> SubsystemSetup<'a> {
    pub fn name(&self) -> &str {
        &self.scheduler.subsystems[self.index].name
    }

    pub fn signals(&self) -> &SignalStore {
        &self.scheduler.signals
    }

    /// Build `machine` and register it with this subsystem.
    pub fn declare<S: State, D: 'static>(
        &mut self,
        machine: StateMachineBuilder<S, D>,
    ) -> Result<MachineHandle<S, D>, BuildError> {
        let slot = &self.scheduler.subsystems[self.index];
        if slot.machines.iter().any(|m| m.name() == machine.name()) {
            return Err(BuildError::DuplicateMachine {
                subsystem: slot.name.clone(),
                machine: machine.name().to_string(),
            });
        }

        let machine = machine
            .default_history_depth(self.scheduler.config.history_depth)
            .build()?;
        let slot = &mut self.scheduler.subsystems[self.index];
        slot.machines.push(Box::new(machine));
        Ok(MachineHandle {
            subsystem: self.index,
            index: slot.machines.len() - 1,
            _marker: PhantomData,
        })
    }

    /// Shared view of a declared machine's active state.
    pub fn watch<S: State, D: 'static>(&self, handle: MachineHandle<S, D>) -> Result<StateWatch<S>, BuildError> {
        self.scheduler
            .machine(handle)
            .map(StateMachine::watch)
            .ok_or(BuildError::UnknownMachine)
    }

    /// React to a lifecycle event.
    pub fn on<F>(&mut self, event: RobotEvent, reaction: F)
    where
        F: FnMut(&mut Control<'_>) -> Result<(), BoxError> + 'static,
    {
        let name = self.scheduler.subsystems[self.index].name.clone();
        self.scheduler.bus.subscribe(event, name, reaction);
    }
}
