//! # Monitor Configuration
//!
//! Construction-time tuning parameters for [`PitchMonitor`](crate::PitchMonitor).
//! A config is validated once when the monitor is built and never changes
//! afterwards.
//!
//! The struct deserializes from JSON with camelCase keys; any key that is
//! missing takes its default value.

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Default analysis window, in samples (~46ms at 44.1kHz).
pub const DEFAULT_WINDOW_SIZE: usize = 2048;

/// Tuning parameters for detection band, gates and emission rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Lowest frequency the analyzer searches for, in Hz.
    pub min_hz: f32,
    /// Highest frequency the analyzer searches for, in Hz.
    pub max_hz: f32,
    /// Minimum RMS energy for a frame to be accepted.
    pub rms_gate: f32,
    /// Minimum clarity (0.0 to 1.0) for a frame to be accepted.
    pub clarity_gate: f32,
    /// How many readings per second are handed to the observer.
    pub update_hz: f32,
    /// Frequency of A4 used for note mapping.
    pub reference_hz: f32,
    /// Number of samples in each analysed frame.
    pub window_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_hz: 50.0,
            max_hz: 2000.0,
            rms_gate: 0.01,
            clarity_gate: 0.75,
            update_hz: 30.0,
            reference_hz: 440.0,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl MonitorConfig {
    /// Checks every invariant and reports the first one that is violated.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let finite = [
            ("minHz", self.min_hz),
            ("maxHz", self.max_hz),
            ("rmsGate", self.rms_gate),
            ("clarityGate", self.clarity_gate),
            ("updateHz", self.update_hz),
            ("referenceHz", self.reference_hz),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!("{name} must be finite, got {value}")));
        }

        if self.min_hz <= 0.0 {
            return Err(invalid(format!("minHz must be positive, got {}", self.min_hz)));
        }
        if self.min_hz >= self.max_hz {
            return Err(invalid(format!(
                "minHz ({}) must be lower than maxHz ({})",
                self.min_hz, self.max_hz
            )));
        }
        if self.rms_gate < 0.0 {
            return Err(invalid(format!("rmsGate must not be negative, got {}", self.rms_gate)));
        }
        if !(0.0..=1.0).contains(&self.clarity_gate) {
            return Err(invalid(format!(
                "clarityGate must lie in [0, 1], got {}",
                self.clarity_gate
            )));
        }
        if self.update_hz <= 0.0 {
            return Err(invalid(format!("updateHz must be positive, got {}", self.update_hz)));
        }
        if self.reference_hz <= 0.0 {
            return Err(invalid(format!(
                "referenceHz must be positive, got {}",
                self.reference_hz
            )));
        }
        if self.window_size == 0 {
            return Err(invalid("windowSize must be at least one sample".to_string()));
        }
        Ok(())
    }

    /// Minimum spacing between two emitted readings.
    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.update_hz as f64)
    }
}

fn invalid(message: String) -> MonitorError {
    MonitorError::InvalidConfiguration(message)
}
