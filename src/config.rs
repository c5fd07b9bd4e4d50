//! Robot configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Validation accumulates all violations instead of stopping at the first,
//! so a bad file can be fixed in one pass.

use crate::shift::ShiftConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stillwater::validation::Validation;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub scheduler: SchedulerConfig,
    pub drivetrain: DriveConfig,
    pub elevator: ElevatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick period.
    pub period_ms: u64,
    /// Transitions remembered per machine.
    pub history_depth: usize,
    /// Faults kept in the scheduler's fault log.
    pub fault_log_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            history_depth: 32,
            fault_log_depth: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub shift: ShiftConfig,
    /// Converts encoder velocity to the units of the shift thresholds.
    pub velocity_scale: f64,
    /// Velocity setpoint at full stick in closed loop.
    pub max_velocity: f64,
    pub invert_shifter: bool,
    /// Stick values below this magnitude are treated as zero.
    pub deadband: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            shift: ShiftConfig::default(),
            velocity_scale: 0.0025566,
            max_velocity: 4200.0,
            invert_shifter: false,
            deadband: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevatorConfig {
    /// Time the deploy latch stays open.
    pub deploy_ms: u64,
    /// Position change per tick at full operator axis.
    pub manual_rate: f64,
    /// Open-loop output while homing.
    pub homing_rate: f64,
    pub max_position: f64,
    pub deploy_locked: bool,
    pub shifter_high: bool,
    pub shifter_hold: bool,
    pub ratchet_locked: bool,
    pub kicker_extended: bool,
}

impl Default for ElevatorConfig {
    fn default() -> Self {
        Self {
            deploy_ms: 500,
            manual_rate: 200.0,
            homing_rate: -0.25,
            max_position: 30000.0,
            deploy_locked: false,
            shifter_high: true,
            shifter_hold: true,
            ratchet_locked: true,
            kicker_extended: true,
        }
    }
}

impl ElevatorConfig {
    pub fn deploy_time(&self) -> Duration {
        Duration::from_millis(self.deploy_ms)
    }
}

/// One invalid setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigViolation {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration ({} violations): {}", .0.len(), join(.0))]
    Invalid(Vec<ConfigViolation>),
}

fn join(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RobotConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RobotConfig = toml::from_str(text)?;
        match config.validate() {
            Validation::Success(()) => Ok(config),
            Validation::Failure(violations) => Err(ConfigError::Invalid(violations)),
        }
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Check every setting, accumulating all violations.
    pub fn validate(&self) -> Validation<(), Vec<ConfigViolation>> {
        let mut violations = Vec::new();
        let mut check = |ok: bool, field: &'static str, message: &str| {
            if !ok {
                violations.push(ConfigViolation {
                    field,
                    message: message.to_string(),
                });
            }
        };

        let scheduler = &self.scheduler;
        check(scheduler.period_ms > 0, "scheduler.period_ms", "must be positive");

        let drive = &self.drivetrain;
        let shift = &drive.shift;
        check(
            shift.max_current.is_finite() && shift.max_current > 0.0,
            "drivetrain.shift.max_current",
            "must be a positive number",
        );
        check(
            shift.delta.is_finite() && shift.delta >= 0.0,
            "drivetrain.shift.delta",
            "must not be negative",
        );
        check(
            shift.split_speed.is_finite(),
            "drivetrain.shift.split_speed",
            "must be a finite number",
        );
        check(
            shift.stall_speed < shift.split_speed - shift.delta,
            "drivetrain.shift.stall_speed",
            "must lie below the dead-band around the split speed",
        );
        check(
            drive.velocity_scale.is_finite() && drive.velocity_scale > 0.0,
            "drivetrain.velocity_scale",
            "must be a positive number",
        );
        check(
            drive.max_velocity.is_finite() && drive.max_velocity > 0.0,
            "drivetrain.max_velocity",
            "must be a positive number",
        );
        check(
            (0.0..1.0).contains(&drive.deadband),
            "drivetrain.deadband",
            "must be in [0, 1)",
        );

        let elevator = &self.elevator;
        check(
            elevator.manual_rate.is_finite() && elevator.manual_rate >= 0.0,
            "elevator.manual_rate",
            "must not be negative",
        );
        check(
            elevator.homing_rate.is_finite() && elevator.homing_rate.abs() <= 1.0,
            "elevator.homing_rate",
            "must be a percent output in [-1, 1]",
        );
        check(
            elevator.max_position.is_finite() && elevator.max_position > 0.0,
            "elevator.max_position",
            "must be a positive number",
        );

        if violations.is_empty() {
            Validation::Success(())
        } else {
            Validation::Failure(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RobotConfig::from_toml("").unwrap();

        assert_eq!(config, RobotConfig::default());
        assert_eq!(config.scheduler.period(), Duration::from_millis(20));
        assert_eq!(config.drivetrain.shift.max_current, 35.0);
        assert_eq!(config.drivetrain.shift.dwell_ms, 250);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RobotConfig::from_toml(
            r#"
            [scheduler]
            period_ms = 10

            [drivetrain.shift]
            max_current = 40.0
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.period_ms, 10);
        assert_eq!(config.scheduler.history_depth, 32);
        assert_eq!(config.drivetrain.shift.max_current, 40.0);
        assert_eq!(config.drivetrain.shift.delta, 0.3);
    }

    #[test]
    fn validation_accumulates_all_violations() {
        let mut config = RobotConfig::default();
        config.scheduler.period_ms = 0;
        config.drivetrain.shift.delta = -0.1;
        config.drivetrain.shift.max_current = 0.0;
        config.elevator.max_position = -1.0;

        match config.validate() {
            Validation::Failure(violations) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field).collect();
                assert_eq!(
                    fields,
                    vec![
                        "scheduler.period_ms",
                        "drivetrain.shift.max_current",
                        "drivetrain.shift.delta",
                        "elevator.max_position",
                    ]
                );
            }
            Validation::Success(_) => panic!("expected violations"),
        }
    }

    #[test]
    fn stall_speed_inside_dead_band_is_rejected() {
        let err = RobotConfig::from_toml(
            r#"
            [drivetrain.shift]
            stall_speed = 1.8
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(ref v) if v.len() == 1));
        assert!(err.to_string().contains("drivetrain.shift.stall_speed"));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = RobotConfig::from_toml("[scheduler]\nperiod_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RobotConfig::load("/definitely/not/here/robot.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
