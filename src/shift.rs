//! Automatic gear selection for a two-speed transmission.
//!
//! [`decide`] is a pure function of the inputs of one evaluation. The only
//! timing state, the instant of the last accepted shift, lives in
//! [`AutoShifter`], which applies decisions and resets the dwell timer when
//! the applied gear actually changes.
//!
//! Rules, first match wins:
//!
//! 1. Current at or above the maximum (or no current reading): LOW.
//! 2. Within the dwell window since the last shift: keep the current gear.
//! 3. No speed reading: LOW.
//! 4. HIGH gear below the stall speed: LOW.
//! 5. Speed below `reference - delta`: LOW; above `reference + delta`: HIGH.
//! 6. Otherwise keep the current gear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Transmission ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gear {
    High,
    Low,
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
        })
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftReason {
    Overcurrent,
    CurrentUnavailable,
    FastToggle,
    Stall,
    SpeedUnavailable,
    LowSpeed,
    HighSpeed,
    NoCaseSatisfied,
}

impl fmt::Display for ShiftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overcurrent => "overcurrent",
            Self::CurrentUnavailable => "current unavailable",
            Self::FastToggle => "fast toggle",
            Self::Stall => "stall/underspeed",
            Self::SpeedUnavailable => "speed unavailable",
            Self::LowSpeed => "low speed",
            Self::HighSpeed => "high speed",
            Self::NoCaseSatisfied => "no case satisfied",
        })
    }
}

/// Proposed gear and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShiftDecision {
    pub gear: Gear,
    pub reason: ShiftReason,
}

impl ShiftDecision {
    fn new(gear: Gear, reason: ShiftReason) -> Self {
        Self { gear, reason }
    }
}

/// Thresholds of the decision rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// Current draw [A] at which LOW is forced.
    pub max_current: f64,
    /// Minimum time between two accepted shifts.
    pub dwell_ms: u64,
    /// Speed below which HIGH gear is considered stalled.
    pub stall_speed: f64,
    /// Reference speed when the caller supplies none.
    pub split_speed: f64,
    /// Half-width of the dead-band around the reference.
    pub delta: f64,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            max_current: 35.0,
            dwell_ms: 250,
            stall_speed: 0.1,
            split_speed: 2.0,
            delta: 0.3,
        }
    }
}

impl ShiftConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

/// Inputs of one evaluation. Missing readings are `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftInputs {
    pub now: DateTime<Utc>,
    pub last_shift: DateTime<Utc>,
    pub current: Option<f64>,
    pub speed: Option<f64>,
    /// Desired speed; the configured split speed is used when `None`.
    pub reference: Option<f64>,
    pub gear: Gear,
}

/// Pick a gear for the given inputs.
pub fn decide(config: &ShiftConfig, inputs: &ShiftInputs) -> ShiftDecision {
    match inputs.current.filter(|c| !c.is_nan()) {
        None => return ShiftDecision::new(Gear::Low, ShiftReason::CurrentUnavailable),
        Some(current) if current >= config.max_current => {
            return ShiftDecision::new(Gear::Low, ShiftReason::Overcurrent)
        }
        Some(_) => {}
    }

    if within_dwell(inputs.last_shift, inputs.now, config.dwell()) {
        return ShiftDecision::new(inputs.gear, ShiftReason::FastToggle);
    }

    let Some(speed) = inputs.speed.filter(|s| s.is_finite()) else {
        return ShiftDecision::new(Gear::Low, ShiftReason::SpeedUnavailable);
    };

    if inputs.gear == Gear::High && speed < config.stall_speed {
        return ShiftDecision::new(Gear::Low, ShiftReason::Stall);
    }

    // Both edges belong to the dead-band.
    let reference = inputs.reference.unwrap_or(config.split_speed);
    if speed < reference - config.delta {
        ShiftDecision::new(Gear::Low, ShiftReason::LowSpeed)
    } else if speed > reference + config.delta {
        ShiftDecision::new(Gear::High, ShiftReason::HighSpeed)
    } else {
        ShiftDecision::new(inputs.gear, ShiftReason::NoCaseSatisfied)
    }
}

/// `true` while `now - last_shift <= dwell`. A last shift in the future
/// counts as within the window.
fn within_dwell(last_shift: DateTime<Utc>, now: DateTime<Utc>, dwell: Duration) -> bool {
    now.signed_duration_since(last_shift)
        .to_std()
        .map_or(true, |elapsed| elapsed <= dwell)
}

/// Decision engine plus the gear it last applied.
#[derive(Debug, Clone)]
pub struct AutoShifter {
    config: ShiftConfig,
    last_shift: DateTime<Utc>,
    applied: Gear,
}

impl AutoShifter {
    pub fn new(config: ShiftConfig, now: DateTime<Utc>, applied: Gear) -> Self {
        Self {
            config,
            last_shift: now,
            applied,
        }
    }

    pub fn config(&self) -> &ShiftConfig {
        &self.config
    }

    pub fn applied(&self) -> Gear {
        self.applied
    }

    pub fn last_shift(&self) -> DateTime<Utc> {
        self.last_shift
    }

    /// Evaluate the rules against the applied gear.
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        current: Option<f64>,
        speed: Option<f64>,
        reference: Option<f64>,
    ) -> ShiftDecision {
        decide(
            &self.config,
            &ShiftInputs {
                now,
                last_shift: self.last_shift,
                current,
                speed,
                reference,
                gear: self.applied,
            },
        )
    }

    /// Apply `decision` if it changes the gear, restarting the dwell window.
    /// Returns whether the gear changed.
    pub fn apply(&mut self, decision: ShiftDecision, now: DateTime<Utc>) -> bool {
        if decision.gear == self.applied {
            return false;
        }
        self.applied = decision.gear;
        self.last_shift = now;
        true
    }

    /// Force `gear` as applied, restarting the dwell window.
    pub fn reset(&mut self, gear: Gear, now: DateTime<Utc>) {
        self.applied = gear;
        self.last_shift = now;
    }
}
