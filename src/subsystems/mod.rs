//! The robot's subsystems, built on the engine.
//!
//! Each subsystem registers its machines, signals and event reactions with
//! the [`Scheduler`] once at setup and hands back typed handles to its
//! machines.

pub mod drivetrain;
pub mod elevator;

pub use drivetrain::{DriveHardware, DriveState, Drivetrain, ShiftState};
pub use elevator::{
    ClampState, DeployState, Elevator, ElevatorHardware, ElevatorState, KickerState, LiftGearState, RatchetState,
};

use crate::builder::{on_entry, BuildError, StateBuilder, StateMachineBuilder};
use crate::config::RobotConfig;
use crate::core::State;
use crate::diagnostics::DiagnosticSuite;
use crate::hal::BinaryActuator;
use crate::machine::StateCx;
use crate::scheduler::Scheduler;
use std::time::Duration;

/// Data record of a machine that drives a single solenoid.
pub type Solenoid = Box<dyn BinaryActuator>;

/// A state that sets the solenoid to `on` when entered.
pub fn solenoid_state<S: State>(state: S, on: bool) -> StateBuilder<S, Solenoid> {
    on_entry(state, move |cx: &mut StateCx<'_, S, Solenoid>| {
        cx.data.set_binary(on)?;
        Ok(())
    })
}

/// A machine with one state per solenoid position.
pub fn solenoid_machine<S: State>(
    name: &str,
    actuator: Solenoid,
    positions: &[(S, bool)],
    default: S,
) -> Result<StateMachineBuilder<S, Solenoid>, BuildError> {
    positions
        .iter()
        .try_fold(StateMachineBuilder::new(name, actuator), |machine, &(state, on)| {
            machine.state(solenoid_state(state, on))
        })
        .map(|machine| machine.default_state(default))
}

/// All hardware of the robot.
pub struct RobotHardware {
    pub drive: DriveHardware,
    pub elevator: ElevatorHardware,
}

/// Handles to every subsystem of the robot.
#[derive(Debug, Clone, Copy)]
pub struct Robot {
    pub drivetrain: Drivetrain,
    pub elevator: Elevator,
}

impl Robot {
    /// Register the drivetrain, then the elevator.
    pub fn register(
        scheduler: &mut Scheduler,
        hardware: RobotHardware,
        config: &RobotConfig,
    ) -> Result<Self, BuildError> {
        let drivetrain = Drivetrain::register(scheduler, hardware.drive, &config.drivetrain)?;
        let elevator = Elevator::register(scheduler, hardware.elevator, &config.elevator)?;
        Ok(Self { drivetrain, elevator })
    }

    /// Every subsystem's self-tests, `step` apart.
    pub fn self_tests(&self, step: Duration) -> DiagnosticSuite {
        let mut suite = DiagnosticSuite::new();
        self.drivetrain.self_tests(&mut suite, step);
        self.elevator.self_tests(&mut suite, step);
        suite
    }
}
