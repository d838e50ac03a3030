//! Simulated power/TDP proxy. There is no hardware reading behind this: every call
//! draws a fresh value uniformly from a fixed range.

use rand::Rng;

use crate::error::TelemetryError;
use crate::types::PowerReading;

pub const DEFAULT_POWER_MIN: f64 = 10.0;
pub const DEFAULT_POWER_MAX: f64 = 20.0;
pub const DEFAULT_POWER_CEILING: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedPower {
    min: f64,
    max: f64,
    ceiling: f64,
}

impl Default for SimulatedPower {
    fn default() -> Self {
        Self {
            min: DEFAULT_POWER_MIN,
            max: DEFAULT_POWER_MAX,
            ceiling: DEFAULT_POWER_CEILING,
        }
    }
}

impl SimulatedPower {
    /// `min..=max` is the draw range, `ceiling` the constant reported `maxValue`.
    pub fn new(min: f64, max: f64, ceiling: f64) -> Result<Self, TelemetryError> {
        let finite = min.is_finite() && max.is_finite() && ceiling.is_finite();
        if !finite || min < 0.0 || min > max || ceiling <= 0.0 {
            return Err(TelemetryError::Other(format!(
                "invalid power range {min}..={max} with ceiling {ceiling}"
            )));
        }
        Ok(Self { min, max, ceiling })
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn read(&self) -> PowerReading {
        let raw = rand::rng().random_range(self.min..=self.max);
        // a draw range above the ceiling would otherwise report current > max
        let current = (raw.min(self.ceiling) * 100.0).round() / 100.0;
        PowerReading {
            current_value: current,
            max_value: self.ceiling,
        }
    }
}
