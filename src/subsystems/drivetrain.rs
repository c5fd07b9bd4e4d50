//! Tank drivetrain with a two-speed pneumatic transmission.
//!
//! Two machines: `drive` selects who commands the wheels, `shifting`
//! selects the gear. In the `autoShifting` state the gear is chosen every
//! tick by the decision engine in [`crate::shift`].

use crate::builder::{BuildError, StateBuilder, StateMachineBuilder};
use crate::config::DriveConfig;
use crate::diagnostics::{actuation_test, DiagnosticSuite};
use crate::error::BoxError;
use crate::events::RobotEvent;
use crate::hal::{BinaryActuator, ControlMode, DriveSensors, HardwareError, MotorOutput};
use crate::machine::StateCx;
use crate::scheduler::{MachineHandle, Scheduler};
use crate::shift::{AutoShifter, Gear, ShiftDecision};
use crate::state_enum;
use chrono::{DateTime, Utc};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Signals owned by the drivetrain.
pub mod signal {
    /// Operator throttle axis, `[-1, 1]`.
    pub const THROTTLE: &str = "drive.throttle";
    /// Operator turn axis, `[-1, 1]`.
    pub const TURN: &str = "drive.turn";
    /// Left output while under external control.
    pub const AUTO_LEFT: &str = "drive.auto_left";
    /// Right output while under external control.
    pub const AUTO_RIGHT: &str = "drive.auto_right";
    /// Whether the transmission is in high gear.
    pub const HIGH_GEAR: &str = "drive.high_gear";
}

state_enum! {
    /// Who commands the wheels.
    pub enum DriveState {
        /// Another process (an autonomous routine) writes the output signals.
        ExternalControl => "external",
        OpenLoop => "openloop",
        ClosedLoop => "closedloop",
        Stopped => "stopped",
    }
}

state_enum! {
    pub enum ShiftState {
        High => "high",
        Low => "low",
        Auto => "autoShifting",
    }
}

/// Mix arcade stick inputs into `(left, right)` outputs in `[-1, 1]`.
///
/// Inputs inside the deadband count as zero, as do non-finite inputs.
pub fn arcade(throttle: f64, turn: f64, deadband: f64) -> (f64, f64) {
    let shape = |axis: f64| {
        if !axis.is_finite() || axis.abs() < deadband {
            0.0
        } else {
            axis.clamp(-1.0, 1.0)
        }
    };
    let (throttle, turn) = (shape(throttle), shape(turn));
    let (left, right) = (throttle + turn, throttle - turn);
    let scale = left.abs().max(right.abs()).max(1.0);
    (left / scale, right / scale)
}

pub struct DriveHardware {
    pub left: Box<dyn MotorOutput>,
    pub right: Box<dyn MotorOutput>,
    pub shifter: Box<dyn BinaryActuator>,
    pub sensors: Rc<dyn DriveSensors>,
}

/// Data record of the `drive` machine.
pub struct DriveData {
    left: Box<dyn MotorOutput>,
    right: Box<dyn MotorOutput>,
    deadband: f64,
    max_velocity: f64,
}

impl DriveData {
    fn command(&mut self, mode: ControlMode, (left, right): (f64, f64)) -> Result<(), HardwareError> {
        self.left.set_output(mode, left)?;
        self.right.set_output(mode, right)
    }

    fn zero(&mut self) -> Result<(), HardwareError> {
        self.left.zero_position()?;
        self.right.zero_position()
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.left.stop()?;
        self.right.stop()
    }
}

/// Data record of the `shifting` machine.
pub struct ShiftData {
    actuator: Box<dyn BinaryActuator>,
    sensors: Rc<dyn DriveSensors>,
    shifter: AutoShifter,
    velocity_scale: f64,
    invert: bool,
    last_decision: Option<ShiftDecision>,
}

impl ShiftData {
    pub fn gear(&self) -> Gear {
        self.shifter.applied()
    }

    /// Most recent decision of the auto-shift state.
    pub fn last_decision(&self) -> Option<ShiftDecision> {
        self.last_decision
    }

    fn solenoid(&self, gear: Gear) -> bool {
        (gear == Gear::High) != self.invert
    }

    fn engage(&mut self, gear: Gear, now: DateTime<Utc>) -> Result<(), HardwareError> {
        let on = self.solenoid(gear);
        self.actuator.set_binary(on)?;
        self.shifter.reset(gear, now);
        Ok(())
    }
}

type DriveStep = StateBuilder<DriveState, DriveData>;
type ShiftStep = StateBuilder<ShiftState, ShiftData>;

fn engage(gear: Gear) -> impl FnMut(&mut StateCx<'_, ShiftState, ShiftData>) -> Result<(), BoxError> {
    move |cx: &mut StateCx<'_, ShiftState, ShiftData>| {
        let now = cx.now();
        cx.data.engage(gear, now)?;
        cx.signals().set_flag(signal::HIGH_GEAR, gear == Gear::High)?;
        Ok(())
    }
}

fn auto_shift(cx: &mut StateCx<'_, ShiftState, ShiftData>) -> Result<(), BoxError> {
    let now = cx.now();
    let data = &mut *cx.data;
    let current = data.sensors.read_current();
    let speed = data.sensors.read_velocity().map(|v| v * data.velocity_scale);
    let decision = data.shifter.evaluate(now, current, speed, None);
    data.last_decision = Some(decision);
    if decision.gear == data.shifter.applied() {
        return Ok(());
    }

    // The gear counts as applied only once the solenoid accepted it.
    let on = data.solenoid(decision.gear);
    data.actuator.set_binary(on)?;
    data.shifter.apply(decision, now);
    debug!(gear = %decision.gear, reason = %decision.reason, "shifted");
    cx.signals().set_flag(signal::HIGH_GEAR, decision.gear == Gear::High)?;
    Ok(())
}

/// Handles to the drivetrain's machines.
#[derive(Debug, Clone, Copy)]
pub struct Drivetrain {
    pub drive: MachineHandle<DriveState, DriveData>,
    pub shifting: MachineHandle<ShiftState, ShiftData>,
}

impl Drivetrain {
    /// Register the `Drivetrain` subsystem: signals, both machines and the
    /// mode reactions.
    pub fn register(scheduler: &mut Scheduler, hardware: DriveHardware, config: &DriveConfig) -> Result<Self, BuildError> {
        let now = scheduler.now();
        let mut setup = scheduler.add_subsystem("Drivetrain")?;
        let signals = setup.signals();
        signals.declare_number(signal::THROTTLE, 0.0)?;
        signals.declare_number(signal::TURN, 0.0)?;
        signals.declare_number(signal::AUTO_LEFT, 0.0)?;
        signals.declare_number(signal::AUTO_RIGHT, 0.0)?;
        signals.declare_flag(signal::HIGH_GEAR, false)?;

        let drive = StateMachineBuilder::new(
            "drive",
            DriveData {
                left: hardware.left,
                right: hardware.right,
                deadband: config.deadband,
                max_velocity: config.max_velocity,
            },
        )
        .state(DriveStep::new(DriveState::ExternalControl).action(|cx| {
            let left = cx.signals().number(signal::AUTO_LEFT)?;
            let right = cx.signals().number(signal::AUTO_RIGHT)?;
            let outputs = (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0));
            cx.data.command(ControlMode::PercentOutput, outputs)?;
            Ok(())
        }))?
        .state(
            DriveStep::new(DriveState::OpenLoop)
                .entry(|cx| Ok(cx.data.zero()?))
                .action(|cx| {
                    let throttle = cx.signals().number(signal::THROTTLE)?;
                    let turn = cx.signals().number(signal::TURN)?;
                    let outputs = arcade(throttle, turn, cx.data.deadband);
                    cx.data.command(ControlMode::PercentOutput, outputs)?;
                    Ok(())
                }),
        )?
        .state(
            DriveStep::new(DriveState::ClosedLoop)
                .entry(|cx| Ok(cx.data.zero()?))
                .action(|cx| {
                    let throttle = cx.signals().number(signal::THROTTLE)?;
                    let turn = cx.signals().number(signal::TURN)?;
                    let (left, right) = arcade(throttle, turn, cx.data.deadband);
                    let max = cx.data.max_velocity;
                    cx.data.command(ControlMode::Velocity, (left * max, right * max))?;
                    Ok(())
                }),
        )?
        .state(DriveStep::new(DriveState::Stopped).entry(|cx| Ok(cx.data.stop()?)))?
        .default_state(DriveState::Stopped);

        let shifting = StateMachineBuilder::new(
            "shifting",
            ShiftData {
                actuator: hardware.shifter,
                sensors: hardware.sensors,
                shifter: AutoShifter::new(config.shift.clone(), now, Gear::Low),
                velocity_scale: config.velocity_scale,
                invert: config.invert_shifter,
                last_decision: None,
            },
        )
        .state(ShiftStep::new(ShiftState::High).entry(engage(Gear::High)))?
        .state(ShiftStep::new(ShiftState::Low).entry(engage(Gear::Low)))?
        .state(
            ShiftStep::new(ShiftState::Auto)
                .entry(engage(Gear::Low))
                .action(auto_shift),
        )?
        .default_state(ShiftState::Low);

        let drivetrain = Self {
            drive: setup.declare(drive)?,
            shifting: setup.declare(shifting)?,
        };

        let Self { drive, shifting } = drivetrain;
        setup.on(RobotEvent::TeleopEnabled, move |cx| {
            cx.set_state(drive, DriveState::ClosedLoop)?;
            cx.set_state(shifting, ShiftState::High)?;
            Ok(())
        });
        setup.on(RobotEvent::AutoEnabled, move |cx| {
            cx.signals().reset(signal::AUTO_LEFT)?;
            cx.signals().reset(signal::AUTO_RIGHT)?;
            cx.set_state(drive, DriveState::ExternalControl)?;
            cx.set_state(shifting, ShiftState::High)?;
            Ok(())
        });
        setup.on(RobotEvent::Disabled, move |cx| {
            cx.set_state(drive, DriveState::Stopped)?;
            Ok(())
        });

        Ok(drivetrain)
    }

    /// Gear currently applied to the transmission.
    pub fn gear(&self, scheduler: &Scheduler) -> Option<Gear> {
        scheduler.machine(self.shifting).map(|m| m.data().gear())
    }

    /// Most recent auto-shift decision.
    pub fn last_decision(&self, scheduler: &Scheduler) -> Option<ShiftDecision> {
        scheduler.machine(self.shifting)?.data().last_decision()
    }

    /// Add a shifter actuation test to `suite`.
    pub fn self_tests(&self, suite: &mut DiagnosticSuite, step: Duration) {
        suite.add(
            "Drive shifter test",
            actuation_test(self.shifting, vec![ShiftState::High, ShiftState::Low], step),
        );
    }
}
