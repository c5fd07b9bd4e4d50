//! Hardware boundary.
//!
//! Subsystems only see these traits; motor controllers, solenoids and
//! sensors are provided by the robot program. The `Sim*` devices implement
//! the traits over shared in-memory state so tests and the match simulation
//! can drive the robot without hardware.
//!
//! Sensor reads return `None` when no reading is available, commands return
//! [`HardwareError`] when the device cannot be reached.

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;

/// How a variable drive interprets its setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    PercentOutput,
    Velocity,
    Position,
    MotionMagic,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    #[error("Device '{0}' is not responding")]
    NotResponding(String),

    #[error("Device '{device}' rejected command: {reason}")]
    Rejected { device: String, reason: String },
}

/// Variable drive (motor controller or gearbox of them).
pub trait MotorOutput {
    fn set_output(&mut self, mode: ControlMode, value: f64) -> Result<(), HardwareError>;

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.set_output(ControlMode::Disabled, 0.0)
    }

    /// Reset the integrated sensor position.
    fn zero_position(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// Two-position actuator.
pub trait BinaryActuator {
    fn set_binary(&mut self, on: bool) -> Result<(), HardwareError>;
}

/// Feedback of a drive.
pub trait DriveSensors {
    fn read_position(&self) -> Option<f64>;
    fn read_velocity(&self) -> Option<f64>;
    /// Current draw [A].
    fn read_current(&self) -> Option<f64>;
}

pub trait DigitalInput {
    fn read_digital(&self) -> Option<bool>;
}

/// Last command received by a [`SimMotor`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotorCommand {
    pub mode: ControlMode,
    pub value: f64,
}

/// Simulated motor controller.
///
/// Clones share state: keep one to observe what the subsystem commanded.
#[derive(Debug, Clone, Default)]
pub struct SimMotor {
    name: String,
    last: Rc<Cell<MotorCommand>>,
    commands: Rc<Cell<u64>>,
    zeroed: Rc<Cell<u64>>,
    offline: Rc<Cell<bool>>,
}

impl SimMotor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn last(&self) -> MotorCommand {
        self.last.get()
    }

    /// Number of commands accepted so far.
    pub fn commands(&self) -> u64 {
        self.commands.get()
    }

    pub fn times_zeroed(&self) -> u64 {
        self.zeroed.get()
    }

    /// Make every following command fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    fn check(&self) -> Result<(), HardwareError> {
        if self.offline.get() {
            return Err(HardwareError::NotResponding(self.name.clone()));
        }
        Ok(())
    }
}

impl MotorOutput for SimMotor {
    fn set_output(&mut self, mode: ControlMode, value: f64) -> Result<(), HardwareError> {
        self.check()?;
        self.last.set(MotorCommand { mode, value });
        self.commands.set(self.commands.get() + 1);
        Ok(())
    }

    fn zero_position(&mut self) -> Result<(), HardwareError> {
        self.check()?;
        self.zeroed.set(self.zeroed.get() + 1);
        Ok(())
    }
}

/// Simulated solenoid that remembers every value it was set to.
#[derive(Debug, Clone, Default)]
pub struct SimSolenoid {
    history: Rc<RefCell<Vec<bool>>>,
    offline: Rc<Cell<bool>>,
}

impl SimSolenoid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<bool> {
        self.history.borrow().last().copied()
    }

    pub fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }

    /// Make every following write fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }
}

impl BinaryActuator for SimSolenoid {
    fn set_binary(&mut self, on: bool) -> Result<(), HardwareError> {
        if self.offline.get() {
            return Err(HardwareError::NotResponding("solenoid".to_string()));
        }
        self.history.borrow_mut().push(on);
        Ok(())
    }
}

/// Simulated drive feedback, writable from the test side.
#[derive(Debug, Clone, Default)]
pub struct SimSensors {
    position: Rc<Cell<Option<f64>>>,
    velocity: Rc<Cell<Option<f64>>>,
    current: Rc<Cell<Option<f64>>>,
}

impl SimSensors {
    pub fn new() -> Self {
        let sensors = Self::default();
        sensors.set_position(0.0);
        sensors.set_velocity(0.0);
        sensors.set_current(0.0);
        sensors
    }

    pub fn set_position(&self, value: f64) {
        self.position.set(Some(value));
    }

    pub fn set_velocity(&self, value: f64) {
        self.velocity.set(Some(value));
    }

    pub fn set_current(&self, value: f64) {
        self.current.set(Some(value));
    }

    /// Drop all readings, as an unplugged sensor would.
    pub fn disconnect(&self) {
        self.position.set(None);
        self.velocity.set(None);
        self.current.set(None);
    }
}

impl DriveSensors for SimSensors {
    fn read_position(&self) -> Option<f64> {
        self.position.get()
    }

    fn read_velocity(&self) -> Option<f64> {
        self.velocity.get()
    }

    fn read_current(&self) -> Option<f64> {
        self.current.get()
    }
}

/// Simulated limit switch.
#[derive(Debug, Clone, Default)]
pub struct SimSwitch {
    state: Rc<Cell<Option<bool>>>,
}

impl SimSwitch {
    pub fn new(pressed: bool) -> Self {
        let switch = Self::default();
        switch.set(pressed);
        switch
    }

    pub fn set(&self, pressed: bool) {
        self.state.set(Some(pressed));
    }
}

impl DigitalInput for SimSwitch {
    fn read_digital(&self) -> Option<bool> {
        self.state.get()
    }
}
