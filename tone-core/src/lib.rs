// tone-core/src/lib.rs

//! The core logic for the tone monitor.
//! This crate is responsible for audio frame delivery, pitch detection,
//! gating and note mapping. It is completely headless and contains no
//! rendering code.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod monitor;
pub mod tuning;

pub use analysis::{analyze, AnalysisResult, FrameAnalyzer};
pub use audio::{AudioFrame, AudioSource, AudioStream, MicrophoneSource, ToneSource};
pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{Observer, PitchMonitor, PitchReading, StopHandle};
pub use tuning::NoteReading;
