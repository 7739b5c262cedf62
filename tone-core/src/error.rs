//! Error taxonomy for the monitor.
//!
//! Only acquisition and configuration failures are errors. A frame that
//! carries no usable pitch (silence, a window too short for the band, no
//! periodicity, an out-of-band estimate) is a normal analysis outcome and is
//! reported through a zeroed [`AnalysisResult`](crate::AnalysisResult).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    /// The audio source could not be opened (no device, permission denied,
    /// unsupported format). The monitor stays idle.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),
    /// A construction-time parameter violates a configuration invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
