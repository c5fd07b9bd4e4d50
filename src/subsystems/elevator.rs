//! Cube elevator: a deployable lift with pneumatic helpers.
//!
//! The lift only moves once the deploy latch reports `Deployed`; every lift
//! state except `pos_lock` and `off` refuses entry before that. The
//! shifter, ratchet, kicker and clamp are one solenoid each, driven by
//! [`solenoid_machine`](super::solenoid_machine).

use super::{solenoid_machine, solenoid_state, Solenoid};
use crate::builder::{BuildError, StateBuilder, StateMachineBuilder};
use crate::config::ElevatorConfig;
use crate::core::StateWatch;
use crate::diagnostics::{actuation_test, settle, DiagnosticSuite, Pause};
use crate::error::BoxError;
use crate::events::RobotEvent;
use crate::hal::{BinaryActuator, ControlMode, DigitalInput, HardwareError, MotorOutput};
use crate::machine::{StateCx, Transition};
use crate::scheduler::{MachineHandle, Scheduler};
use crate::signals::SignalStore;
use crate::state_enum;
use std::time::Duration;
use tracing::warn;

/// Signals owned by the elevator.
pub mod signal {
    /// Lift setpoint in encoder ticks.
    pub const POSITION: &str = "elevator.position";
    /// Set once homing has found the lower limit.
    pub const HOMED: &str = "elevator.homed";
    /// Operator lift axis, `[-1, 1]`.
    pub const MANUAL: &str = "elevator.manual";
}

state_enum! {
    pub enum DeployState {
        Stowed => "stowed",
        Deploying => "deploy",
        Deployed => "deployed",
        Safe => "safe",
    }
}

state_enum! {
    pub enum ElevatorState {
        /// Follow the position signal.
        SignalControl => "signal",
        OpenLoop => "openloop",
        /// Move the position signal with the operator axis and follow it.
        ManualAdjustment => "manual",
        /// Hold the current position without knowing where it is.
        HoldPosition => "pos_lock",
        Homing => "homing",
        Off => "off",
    }
}

state_enum! {
    pub enum LiftGearState {
        High => "high",
        Low => "low",
        HoldCarriage => "hold_carriage",
        Safe => "safe",
    }
}

state_enum! {
    pub enum RatchetState {
        Locked => "locked",
        Unlocked => "unlocked",
        Safe => "safe",
    }
}

state_enum! {
    pub enum KickerState {
        Out => "out",
        In => "in",
        Safe => "safe",
    }
}

state_enum! {
    pub enum ClampState {
        Out => "out",
        In => "in",
        Safe => "safe",
    }
}

pub struct ElevatorHardware {
    pub gearbox: Box<dyn MotorOutput>,
    /// Closed when the carriage is at the bottom.
    pub lower_limit: Box<dyn DigitalInput>,
    pub deployer: Box<dyn BinaryActuator>,
    pub shifter: Box<dyn BinaryActuator>,
    pub ratchet: Box<dyn BinaryActuator>,
    pub kicker: Box<dyn BinaryActuator>,
    pub clamp: Box<dyn BinaryActuator>,
}

/// Data record of the `elevator` machine.
pub struct ElevatorData {
    gearbox: Box<dyn MotorOutput>,
    lower_limit: Box<dyn DigitalInput>,
    manual_rate: f64,
    homing_rate: f64,
    max_position: f64,
}

impl ElevatorData {
    /// Drive to `target`, clamped to the travel. A non-finite target stops
    /// the lift instead.
    fn follow(&mut self, target: f64) -> Result<(), HardwareError> {
        if !target.is_finite() {
            warn!(target, "elevator setpoint is not a number, stopping");
            return self.gearbox.stop();
        }
        self.gearbox
            .set_output(ControlMode::MotionMagic, target.clamp(0.0, self.max_position))
    }
}

type LiftStep = StateBuilder<ElevatorState, ElevatorData>;

fn unless_deployed(deploy: &StateWatch<DeployState>) -> impl Fn(&ElevatorData, &SignalStore) -> bool + 'static {
    let deploy = deploy.clone();
    move |_: &ElevatorData, _: &SignalStore| !deploy.is(DeployState::Deployed)
}

fn operator_axis(cx: &StateCx<'_, ElevatorState, ElevatorData>) -> Result<f64, BoxError> {
    let axis = cx.signals().number(signal::MANUAL)?;
    Ok(if axis.is_finite() { axis.clamp(-1.0, 1.0) } else { 0.0 })
}

fn home(cx: &mut StateCx<'_, ElevatorState, ElevatorData>) -> Result<(), BoxError> {
    match cx.data.lower_limit.read_digital() {
        Some(false) => {
            let rate = cx.data.homing_rate;
            cx.data.gearbox.set_output(ControlMode::PercentOutput, rate)?;
        }
        Some(true) => {
            cx.data.gearbox.stop()?;
            cx.data.gearbox.zero_position()?;
            cx.signals().set_number(signal::POSITION, 0.0)?;
            cx.signals().set_flag(signal::HOMED, true)?;
            cx.set_state(ElevatorState::SignalControl);
        }
        None => {
            warn!("lower limit switch not responding, homing aborted");
            cx.data.gearbox.stop()?;
            cx.set_state(ElevatorState::Off);
        }
    }
    Ok(())
}

/// Handles to the elevator's machines.
#[derive(Debug, Clone, Copy)]
pub struct Elevator {
    pub deploy: MachineHandle<DeployState, Solenoid>,
    pub lift: MachineHandle<ElevatorState, ElevatorData>,
    pub shifter: MachineHandle<LiftGearState, Solenoid>,
    pub ratchet: MachineHandle<RatchetState, Solenoid>,
    pub kicker: MachineHandle<KickerState, Solenoid>,
    pub clamp: MachineHandle<ClampState, Solenoid>,
    deploy_time: Duration,
    max_position: f64,
}

impl Elevator {
    /// Register the `Elevator` subsystem.
    pub fn register(
        scheduler: &mut Scheduler,
        hardware: ElevatorHardware,
        config: &ElevatorConfig,
    ) -> Result<Self, BuildError> {
        let mut setup = scheduler.add_subsystem("Elevator")?;
        let signals = setup.signals();
        signals.declare_number(signal::POSITION, 0.0)?;
        signals.declare_flag(signal::HOMED, false)?;
        signals.declare_number(signal::MANUAL, 0.0)?;

        let locked = config.deploy_locked;
        let deploy = setup.declare(
            StateMachineBuilder::new("elevator_deploy", hardware.deployer)
                .state(solenoid_state(DeployState::Stowed, locked))?
                .state(
                    solenoid_state(DeployState::Deploying, !locked)
                        .timeout(config.deploy_time(), DeployState::Deployed),
                )?
                .state(solenoid_state(DeployState::Deployed, locked))?
                .state(solenoid_state(DeployState::Safe, false))?
                .default_state(DeployState::Safe),
        )?;
        let deployed = setup.watch(deploy)?;

        let lift = setup.declare(
            StateMachineBuilder::new(
                "elevator",
                ElevatorData {
                    gearbox: hardware.gearbox,
                    lower_limit: hardware.lower_limit,
                    manual_rate: config.manual_rate,
                    homing_rate: config.homing_rate,
                    max_position: config.max_position,
                },
            )
            .state(
                LiftStep::new(ElevatorState::SignalControl)
                    .reject_if(unless_deployed(&deployed))
                    .action(|cx| {
                        let target = cx.signals().number(signal::POSITION)?;
                        cx.data.follow(target)?;
                        Ok(())
                    }),
            )?
            .state(
                LiftStep::new(ElevatorState::OpenLoop)
                    .reject_if(unless_deployed(&deployed))
                    .action(|cx| {
                        let axis = operator_axis(cx)?;
                        cx.data.gearbox.set_output(ControlMode::PercentOutput, axis)?;
                        Ok(())
                    }),
            )?
            .state(
                LiftStep::new(ElevatorState::ManualAdjustment)
                    .reject_if(unless_deployed(&deployed))
                    .action(|cx| {
                        let delta = cx.data.manual_rate * operator_axis(cx)?;
                        let current = cx.signals().number(signal::POSITION)?;
                        let target = (current + delta).clamp(0.0, cx.data.max_position);
                        if target.is_finite() {
                            cx.signals().set_number(signal::POSITION, target)?;
                        }
                        cx.data.follow(target)?;
                        Ok(())
                    }),
            )?
            .state(
                LiftStep::new(ElevatorState::HoldPosition)
                    .entry(|cx| Ok(cx.data.gearbox.zero_position()?))
                    .action(|cx| Ok(cx.data.gearbox.set_output(ControlMode::Position, 0.0)?)),
            )?
            .state(
                LiftStep::new(ElevatorState::Homing)
                    .reject_if(unless_deployed(&deployed))
                    .entry(|cx| {
                        cx.signals().set_flag(signal::HOMED, false)?;
                        Ok(())
                    })
                    .action(home),
            )?
            .state(LiftStep::new(ElevatorState::Off).entry(|cx| Ok(cx.data.gearbox.stop()?)))?
            .default_state(ElevatorState::Off),
        )?;

        let shifter = setup.declare(solenoid_machine(
            "elevator_shifter",
            hardware.shifter,
            &[
                (LiftGearState::High, config.shifter_high),
                (LiftGearState::Low, !config.shifter_high),
                (LiftGearState::HoldCarriage, config.shifter_hold),
                (LiftGearState::Safe, false),
            ],
            LiftGearState::Safe,
        )?)?;
        let ratchet = setup.declare(solenoid_machine(
            "elevator_ratchet",
            hardware.ratchet,
            &[
                (RatchetState::Locked, config.ratchet_locked),
                (RatchetState::Unlocked, !config.ratchet_locked),
                (RatchetState::Safe, false),
            ],
            RatchetState::Safe,
        )?)?;
        let kicker = setup.declare(solenoid_machine(
            "elevator_kicker",
            hardware.kicker,
            &[
                (KickerState::Out, config.kicker_extended),
                (KickerState::In, !config.kicker_extended),
                (KickerState::Safe, false),
            ],
            KickerState::Safe,
        )?)?;
        let clamp = setup.declare(solenoid_machine(
            "elevator_clamp",
            hardware.clamp,
            &[(ClampState::Out, true), (ClampState::In, false), (ClampState::Safe, false)],
            ClampState::Safe,
        )?)?;

        setup.on(RobotEvent::TeleopEnabled, move |cx| {
            cx.set_state(lift, ElevatorState::ManualAdjustment)?;
            Ok(())
        });
        setup.on(RobotEvent::Disabled, move |cx| {
            cx.set_state(lift, ElevatorState::Off)?;
            Ok(())
        });

        Ok(Self {
            deploy,
            lift,
            shifter,
            ratchet,
            kicker,
            clamp,
            deploy_time: config.deploy_time(),
            max_position: config.max_position,
        })
    }

    pub fn is_homed(&self, scheduler: &Scheduler) -> bool {
        scheduler.signals().flag(signal::HOMED).unwrap_or(false)
    }

    /// Add the pneumatic actuation tests and the lift travel test to `suite`.
    pub fn self_tests(&self, suite: &mut DiagnosticSuite, step: Duration) {
        suite.add(
            "Kicker test",
            actuation_test(self.kicker, vec![KickerState::Out, KickerState::In], step),
        );
        suite.add(
            "Clamp test",
            actuation_test(self.clamp, vec![ClampState::Out, ClampState::In], step),
        );
        suite.add(
            "Ratchet test",
            actuation_test(self.ratchet, vec![RatchetState::Locked, RatchetState::Unlocked], step),
        );
        suite.add(
            "Shifter test",
            actuation_test(
                self.shifter,
                vec![LiftGearState::High, LiftGearState::Low, LiftGearState::HoldCarriage],
                step,
            ),
        );

        let elevator = *self;
        suite.add("Elevator test", move |scheduler: &mut Scheduler, pause: &dyn Pause| {
            elevator.travel_test(scheduler, pause, step)
        });
    }

    /// Deploy, home, then sweep the setpoint across the travel.
    fn travel_test(&self, scheduler: &mut Scheduler, pause: &dyn Pause, step: Duration) -> Result<bool, BoxError> {
        scheduler.set_state(self.deploy, DeployState::Deploying)?;
        settle(scheduler, pause, self.deploy_time + scheduler.config().period());
        if scheduler.state(self.deploy) != Some(DeployState::Deployed) {
            return Ok(false);
        }

        if let Transition::Rejected { .. } = scheduler.set_state(self.lift, ElevatorState::Homing)? {
            return Ok(false);
        }
        settle(scheduler, pause, step);
        if !self.is_homed(scheduler) || scheduler.state(self.lift) != Some(ElevatorState::SignalControl) {
            return Ok(false);
        }

        let max = self.max_position;
        for target in [max, max * 0.75, max * 0.5, 0.0] {
            scheduler.signals().set_number(signal::POSITION, target)?;
            settle(scheduler, pause, step);
        }
        let followed = scheduler.state(self.lift) == Some(ElevatorState::SignalControl);

        scheduler.set_state_named(self.lift, "")?;
        Ok(followed && scheduler.state(self.lift) == Some(ElevatorState::Off))
    }
}
