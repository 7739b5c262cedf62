//! # Pitch Monitor
//!
//! Drives an [`AudioSource`] through the [`FrameAnalyzer`] and reports
//! readings to an [`Observer`].
//!
//! ## Lifecycle
//! - `Idle`: no source is held. `stop()` is a no-op.
//! - `Running`: the source is acquired and frames are analysed in delivery
//!   order. `start()` is a no-op.
//!
//! Every delivered frame is analysed, but readings are emitted at most
//! `update_hz` times per second of stream time. Stopping emits one final
//! reading with `is_running == false`.
//!
//! The monitor has a single owner and no internal threads. The owner drives
//! it with [`PitchMonitor::run`] (blocking) or [`PitchMonitor::poll`]
//! (non-blocking). A [`StopHandle`] can end the run from inside the
//! observer or from another thread.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{AnalysisResult, FrameAnalyzer};
use crate::audio::{AudioFrame, AudioSource};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::tuning::{self, NoteReading};

/// The record handed to the observer on every emission.
///
/// Serializes as a flat camelCase record. The final reading of a run
/// carries no pitch fields at all, only `{"isRunning": false}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchReading {
    /// Detected frequency in Hz, or 0 when the frame was rejected.
    pub frequency_hz: f32,
    /// Nearest note; present only when the frame passed the gates.
    pub note: Option<NoteReading>,
    pub clarity: f32,
    pub rms: f32,
    pub is_running: bool,
}

impl Serialize for PitchReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if self.is_running {
            map.serialize_entry("frequencyHz", &self.frequency_hz)?;
            if let Some(note) = &self.note {
                map.serialize_entry("noteName", &note.name)?;
                map.serialize_entry("midiNumber", &note.midi)?;
                map.serialize_entry("centsOffset", &note.cents)?;
            }
            map.serialize_entry("clarity", &self.clarity)?;
            map.serialize_entry("rms", &self.rms)?;
        }
        map.serialize_entry("isRunning", &self.is_running)?;
        map.end()
    }
}

impl PitchReading {
    /// Reading for a frame that passed every gate.
    fn accepted(analysis: &AnalysisResult, note: NoteReading) -> Self {
        Self {
            frequency_hz: analysis.frequency_hz,
            note: Some(note),
            clarity: analysis.clarity,
            rms: analysis.rms,
            is_running: true,
        }
    }

    /// Reading for a frame without a confident pitch.
    fn rejected(analysis: &AnalysisResult) -> Self {
        Self {
            frequency_hz: 0.0,
            note: None,
            clarity: analysis.clarity,
            rms: analysis.rms,
            is_running: true,
        }
    }

    /// The final reading emitted on shutdown.
    fn stopped() -> Self {
        Self {
            frequency_hz: 0.0,
            note: None,
            clarity: 0.0,
            rms: 0.0,
            is_running: false,
        }
    }

    pub fn note_name(&self) -> Option<&str> {
        self.note.as_ref().map(|n| n.name.as_str())
    }

    pub fn midi_number(&self) -> Option<i32> {
        self.note.as_ref().map(|n| n.midi)
    }

    pub fn cents_offset(&self) -> Option<f32> {
        self.note.as_ref().map(|n| n.cents)
    }
}

/// Receives readings from the monitor.
///
/// Called inline with frame processing, so implementations should return
/// quickly. Called exactly once with `is_running == false` per stop.
pub trait Observer {
    fn on_reading(&mut self, reading: PitchReading);
}

impl<F> Observer for F
where
    F: FnMut(PitchReading),
{
    fn on_reading(&mut self, reading: PitchReading) {
        self(reading)
    }
}

/// Forwards readings to another thread, e.g. a UI loop.
impl Observer for Sender<PitchReading> {
    fn on_reading(&mut self, reading: PitchReading) {
        if self.send(reading).is_err() {
            log::debug!("Reading receiver dropped; discarding reading");
        }
    }
}

/// Requests a monitor to stop.
///
/// Cheap to clone and safe to use from any thread, including from inside
/// the observer while a reading is being delivered. The monitor honours the
/// request before it analyses another frame.
#[derive(Debug, Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // A full channel already holds a pending wake-up.
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Forgets earlier requests so a new run starts clean.
    fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
        while self.wake_rx.try_recv().is_ok() {}
    }
}

/// Everything that only exists while the monitor is running.
#[derive(Debug)]
struct Session {
    sample_rate: u32,
    frames: Receiver<AudioFrame>,
    /// Reusable window, overwritten by every frame.
    buffer: Box<[f32]>,
    last_emit: Option<Duration>,
    latest: Option<AnalysisResult>,
}

#[derive(Debug)]
enum MonitorState {
    Idle,
    Running(Session),
}

/// Real-time pitch monitor.
pub struct PitchMonitor<S: AudioSource, O: Observer> {
    config: MonitorConfig,
    analyzer: FrameAnalyzer,
    source: S,
    observer: O,
    state: MonitorState,
    stop: StopHandle,
}

impl<S: AudioSource, O: Observer> PitchMonitor<S, O> {
    /// Creates an idle monitor.
    ///
    /// # Errors
    /// * `MonitorError::InvalidConfiguration` - if `config` breaks an invariant
    pub fn new(config: MonitorConfig, source: S, observer: O) -> Result<Self, MonitorError> {
        config.validate()?;
        let analyzer = FrameAnalyzer::new(config.min_hz, config.max_hz);
        Ok(Self {
            config,
            analyzer,
            source,
            observer,
            state: MonitorState::Idle,
            stop: StopHandle::new(),
        })
    }

    /// Replaces the monitor's stop handle, so one created up front (for
    /// example, captured by the observer) controls this monitor.
    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self {
        self.stop = handle;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MonitorState::Running(_))
    }

    /// The analysis of the most recent frame, emitted or not.
    pub fn latest_analysis(&self) -> Option<AnalysisResult> {
        match &self.state {
            MonitorState::Running(session) => session.latest,
            MonitorState::Idle => None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Acquires the audio source and enters the running state.
    ///
    /// Does nothing if the monitor is already running.
    ///
    /// # Errors
    /// * `MonitorError::SourceUnavailable` - the source could not be opened;
    ///   the monitor stays idle
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.is_running() {
            return Ok(());
        }

        let window = self.config.window_size;
        let stream = self.source.acquire(window).map_err(|e| {
            log::error!("Failed to start monitoring: {}", e);
            e
        })?;

        if stream.sample_rate > 0 && window < self.analyzer.min_window(stream.sample_rate) {
            log::warn!(
                "Window of {} samples is too short for {} Hz at {} Hz; no pitch will be reported",
                window,
                self.config.min_hz,
                stream.sample_rate
            );
        }

        self.stop.reset();
        self.state = MonitorState::Running(Session {
            sample_rate: stream.sample_rate,
            frames: stream.frames,
            buffer: vec![0.0; window].into_boxed_slice(),
            last_emit: None,
            latest: None,
        });
        log::info!("Monitoring started at {} Hz", stream.sample_rate);
        Ok(())
    }

    /// Releases the source, returns to idle and emits the final reading.
    ///
    /// Does nothing if the monitor is already idle. A failure to release the
    /// source is logged and does not keep the monitor running.
    pub fn stop(&mut self) {
        let session = match std::mem::replace(&mut self.state, MonitorState::Idle) {
            MonitorState::Running(session) => session,
            MonitorState::Idle => return,
        };
        // Dropping the receiver and buffer before releasing the source.
        drop(session);

        if let Err(e) = self.source.release() {
            log::warn!("Error releasing audio source: {}", e);
        }
        log::info!("Monitoring stopped");
        self.observer.on_reading(PitchReading::stopped());
    }

    /// Starts the monitor if needed and processes frames until it stops.
    ///
    /// Returns when a [`StopHandle`] asks the monitor to stop or when the
    /// source ends its stream; either way the monitor is idle afterwards.
    ///
    /// # Errors
    /// * `MonitorError::SourceUnavailable` - from [`start`](Self::start)
    pub fn run(&mut self) -> Result<(), MonitorError> {
        self.start()?;
        let frames = match &self.state {
            MonitorState::Running(session) => session.frames.clone(),
            MonitorState::Idle => return Ok(()),
        };
        let wake = self.stop.wake_rx.clone();

        while self.is_running() {
            if self.stop.is_requested() {
                self.stop();
                break;
            }
            crossbeam_channel::select! {
                recv(frames) -> msg => match msg {
                    Ok(frame) => {
                        if !self.stop.is_requested() {
                            self.process_frame(&frame);
                        }
                    }
                    Err(_) => {
                        log::info!("Audio stream ended");
                        self.stop();
                    }
                },
                recv(wake) -> _ => {}
            }
        }
        if self.stop.is_requested() {
            self.stop();
        }
        Ok(())
    }

    /// Processes every frame that has already been delivered, without
    /// blocking. Returns the number of frames analysed.
    ///
    /// Honours stop requests and ends the run if the stream has ended.
    pub fn poll(&mut self) -> usize {
        let mut processed = 0;
        loop {
            if self.stop.is_requested() {
                self.stop();
                break;
            }
            let next = match &self.state {
                MonitorState::Running(session) => session.frames.try_recv(),
                MonitorState::Idle => break,
            };
            match next {
                Ok(frame) => {
                    self.process_frame(&frame);
                    processed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Audio stream ended");
                    self.stop();
                    break;
                }
            }
        }
        processed
    }

    /// Analyses one frame and emits a reading if the rate limit allows.
    fn process_frame(&mut self, frame: &AudioFrame) {
        let MonitorState::Running(session) = &mut self.state else {
            return;
        };
        if frame.samples.len() != session.buffer.len() {
            log::warn!(
                "Dropping frame of {} samples; expected {}",
                frame.samples.len(),
                session.buffer.len()
            );
            return;
        }
        if frame.sample_rate != session.sample_rate {
            log::debug!(
                "Frame sample rate {} differs from stream rate {}",
                frame.sample_rate,
                session.sample_rate
            );
        }

        session.buffer.copy_from_slice(&frame.samples);
        let analysis = self.analyzer.analyze(&session.buffer, frame.sample_rate);
        session.latest = Some(analysis);

        if let Some(last) = session.last_emit {
            if frame.timestamp.saturating_sub(last) < self.config.update_interval() {
                return;
            }
        }
        session.last_emit = Some(frame.timestamp);

        let reading = evaluate(&self.config, &analysis);
        self.observer.on_reading(reading);
    }
}

impl<S: AudioSource, O: Observer> Drop for PitchMonitor<S, O> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Applies the gates and maps an accepted frequency to its note.
fn evaluate(config: &MonitorConfig, analysis: &AnalysisResult) -> PitchReading {
    let accepted = analysis.rms >= config.rms_gate
        && analysis.clarity >= config.clarity_gate
        && analysis.frequency_hz > 0.0;
    if accepted {
        let note = tuning::nearest_note(analysis.frequency_hz, config.reference_hz);
        PitchReading::accepted(analysis, note)
    } else {
        PitchReading::rejected(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(frequency_hz: f32, clarity: f32, rms: f32) -> AnalysisResult {
        AnalysisResult { frequency_hz, clarity, rms }
    }

    #[test]
    fn accepted_frame_carries_note() {
        let reading = evaluate(&MonitorConfig::default(), &analysis(440.0, 0.95, 0.3));
        assert_eq!(reading.note_name(), Some("A4"));
        assert_eq!(reading.midi_number(), Some(69));
        assert_eq!(reading.cents_offset(), Some(0.0));
        assert_eq!(reading.frequency_hz, 440.0);
        assert!(reading.is_running);
    }

    #[test]
    fn each_gate_rejects_on_its_own() {
        let config = MonitorConfig::default();
        for rejected in [
            analysis(440.0, 0.95, 0.005),
            analysis(440.0, 0.5, 0.3),
            analysis(0.0, 0.95, 0.3),
        ] {
            let reading = evaluate(&config, &rejected);
            assert_eq!(reading.frequency_hz, 0.0);
            assert_eq!(reading.note, None);
            assert_eq!(reading.clarity, rejected.clarity);
            assert_eq!(reading.rms, rejected.rms);
            assert!(reading.is_running);
        }
    }

    #[test]
    fn gates_are_inclusive() {
        let config = MonitorConfig::default();
        let reading = evaluate(&config, &analysis(440.0, config.clarity_gate, config.rms_gate));
        assert!(reading.note.is_some());
    }

    #[test]
    fn stopped_reading_has_no_pitch() {
        let reading = PitchReading::stopped();
        assert!(!reading.is_running);
        assert_eq!(reading.note_name(), None);
        assert_eq!(reading.midi_number(), None);
        assert_eq!(reading.cents_offset(), None);
    }

    #[test]
    fn stop_handle_reset_clears_pending_requests() {
        let handle = StopHandle::new();
        handle.stop();
        handle.stop();
        assert!(handle.is_requested());
        handle.reset();
        assert!(!handle.is_requested());
        assert!(handle.wake_rx.try_recv().is_err());
    }
}
