use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;
use tone_core::{
    AudioFrame, AudioSource, AudioStream, MonitorConfig, MonitorError, PitchMonitor, PitchReading,
    StopHandle, ToneSource,
};

const SAMPLE_RATE: u32 = 44100;

/// A source that replays a fixed list of frames and counts its lifecycle calls.
#[derive(Default)]
struct ScriptedSource {
    frames: Vec<AudioFrame>,
    keep_open: bool,
    fail_acquire: bool,
    fail_release: bool,
    acquired: usize,
    released: usize,
    held: Option<Sender<AudioFrame>>,
}

impl ScriptedSource {
    fn with_frames(frames: Vec<AudioFrame>) -> Self {
        Self { frames, ..Default::default() }
    }
}

impl AudioSource for ScriptedSource {
    fn acquire(&mut self, _window: usize) -> Result<AudioStream, MonitorError> {
        if self.fail_acquire {
            return Err(MonitorError::SourceUnavailable("permission denied".into()));
        }
        self.acquired += 1;
        let (sender, frames) = crossbeam_channel::unbounded();
        for frame in &self.frames {
            sender.send(frame.clone()).unwrap();
        }
        if self.keep_open {
            self.held = Some(sender);
        }
        Ok(AudioStream { sample_rate: SAMPLE_RATE, frames })
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.released += 1;
        self.held = None;
        if self.fail_release {
            anyhow::bail!("stream already closed");
        }
        Ok(())
    }
}

fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

fn frame(samples: Vec<f32>, millis: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: SAMPLE_RATE,
        timestamp: Duration::from_millis(millis),
    }
}

fn observer() -> (Sender<PitchReading>, Receiver<PitchReading>) {
    crossbeam_channel::unbounded()
}

#[test]
fn a440_is_reported_as_a4() {
    let (tx, rx) = observer();
    let source = ToneSource::new(440.0, 0.5, SAMPLE_RATE).with_frame_count(16);
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    monitor.run().unwrap();
    assert!(!monitor.is_running());

    let readings: Vec<PitchReading> = rx.try_iter().collect();
    let (running, stopped): (Vec<_>, Vec<_>) = readings.iter().partition(|r| r.is_running);
    assert!(!running.is_empty());
    assert_eq!(stopped.len(), 1);
    assert!(!readings.last().unwrap().is_running);

    for reading in running {
        assert_eq!(reading.note_name(), Some("A4"));
        assert_eq!(reading.midi_number(), Some(69));
        let cents = reading.cents_offset().unwrap();
        assert!(cents.abs() < 5.0, "cents {cents}");
        assert!(reading.clarity > 0.9, "clarity {}", reading.clarity);
        assert!((reading.frequency_hz - 440.0).abs() < 4.4);
    }
}

#[test]
fn quiet_tone_is_rejected_but_still_running() {
    let (tx, rx) = observer();
    let source = ToneSource::new(440.0, 0.001, SAMPLE_RATE).with_frame_count(4);
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    monitor.run().unwrap();

    let first = rx.try_recv().unwrap();
    assert!(first.is_running);
    assert_eq!(first.frequency_hz, 0.0);
    assert_eq!(first.note_name(), None);
    assert_eq!(first.midi_number(), None);
    assert_eq!(first.cents_offset(), None);
    assert!(first.rms > 0.0 && first.rms < 0.01);
}

#[test]
fn silence_never_errors() {
    let (tx, rx) = observer();
    let frames = (0..5).map(|i| frame(vec![0.0; 2048], i * 40)).collect();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::with_frames(frames), tx).unwrap();

    monitor.run().unwrap();

    let readings: Vec<PitchReading> = rx.try_iter().filter(|r| r.is_running).collect();
    assert_eq!(readings.len(), 5);
    assert!(readings.iter().all(|r| r.frequency_hz == 0.0 && r.clarity == 0.0 && r.note.is_none()));
}

#[test]
fn emissions_are_rate_limited() {
    let (tx, rx) = observer();
    // 200 frames per second for one second, against 30 readings per second.
    let frames = (0..200).map(|i| frame(vec![0.0; 2048], i * 5)).collect();
    let config = MonitorConfig { update_hz: 30.0, ..Default::default() };
    let mut monitor = PitchMonitor::new(config, ScriptedSource::with_frames(frames), tx).unwrap();

    monitor.start().unwrap();
    assert_eq!(monitor.poll(), 200);

    let emitted = rx.try_iter().count();
    assert!(emitted <= 30, "emitted {emitted}");
    assert!(emitted >= 25, "emitted {emitted}");
}

#[test]
fn latest_analysis_tracks_every_frame() {
    let (tx, rx) = observer();
    let frames = vec![
        frame(vec![0.0; 2048], 0),
        frame(sine(440.0, 0.5, 2048), 1),
    ];
    let source = ScriptedSource { frames, keep_open: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    monitor.start().unwrap();
    assert_eq!(monitor.latest_analysis(), None);
    assert_eq!(monitor.poll(), 2);
    assert!(monitor.is_running());

    // Only the first frame was emitted; the second was analysed anyway.
    assert_eq!(rx.try_iter().count(), 1);
    let latest = monitor.latest_analysis().unwrap();
    assert!((latest.frequency_hz - 440.0).abs() < 4.4);

    monitor.stop();
    assert_eq!(monitor.latest_analysis(), None);
}

#[test]
fn near_zero_min_hz_reports_no_pitch() {
    let (tx, rx) = observer();
    let config = MonitorConfig { min_hz: 1e-16, ..MonitorConfig::default() };
    let frames = vec![frame(sine(440.0, 0.5, 2048), 0)];
    let mut monitor = PitchMonitor::new(config, ScriptedSource::with_frames(frames), tx).unwrap();

    monitor.run().unwrap();

    let readings: Vec<PitchReading> = rx.try_iter().collect();
    assert_eq!(readings.len(), 2);
    assert!(readings[0].is_running);
    assert_eq!(readings[0].frequency_hz, 0.0);
    assert!(readings[0].note.is_none());
    assert!(!readings[1].is_running);
}

#[test]
fn start_twice_acquires_once() {
    let (tx, _rx) = observer();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::default(), tx).unwrap();

    monitor.start().unwrap();
    monitor.start().unwrap();

    assert!(monitor.is_running());
    assert_eq!(monitor.source().acquired, 1);
}

#[test]
fn stop_twice_releases_once() {
    let (tx, rx) = observer();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::default(), tx).unwrap();

    monitor.start().unwrap();
    monitor.stop();
    monitor.stop();

    assert!(!monitor.is_running());
    assert_eq!(monitor.source().released, 1);
    let readings: Vec<PitchReading> = rx.try_iter().collect();
    assert_eq!(readings.len(), 1);
    assert!(!readings[0].is_running);
    assert_eq!(readings[0].note, None);
}

#[test]
fn stop_while_idle_is_silent() {
    let (tx, rx) = observer();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::default(), tx).unwrap();

    monitor.stop();

    assert_eq!(monitor.source().released, 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn monitor_can_restart_after_stop() {
    let (tx, rx) = observer();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::default(), tx).unwrap();

    monitor.start().unwrap();
    monitor.stop();
    monitor.start().unwrap();
    monitor.stop();

    assert_eq!(monitor.source().acquired, 2);
    assert_eq!(monitor.source().released, 2);
    assert_eq!(rx.try_iter().filter(|r| !r.is_running).count(), 2);
}

#[test]
fn unavailable_source_leaves_monitor_idle() {
    let (tx, rx) = observer();
    let source = ScriptedSource { fail_acquire: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    let result = monitor.start();

    assert!(matches!(result, Err(MonitorError::SourceUnavailable(_))));
    assert!(!monitor.is_running());
    assert!(matches!(monitor.run(), Err(MonitorError::SourceUnavailable(_))));
    assert!(rx.try_recv().is_err());
}

#[test]
fn invalid_configuration_is_fatal() {
    let (tx, _rx) = observer();
    let config = MonitorConfig { min_hz: 2000.0, max_hz: 50.0, ..Default::default() };
    let result = PitchMonitor::new(config, ScriptedSource::default(), tx);
    assert!(matches!(result, Err(MonitorError::InvalidConfiguration(_))));
}

#[test]
fn release_failure_still_stops() {
    let (tx, rx) = observer();
    let source = ScriptedSource { fail_release: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    monitor.start().unwrap();
    monitor.stop();

    assert!(!monitor.is_running());
    assert!(!rx.try_recv().unwrap().is_running);
}

#[test]
fn stop_from_inside_observer_ends_processing() {
    let (tx, rx) = observer();
    let handle = StopHandle::new();
    let inner = handle.clone();
    let frames = (0..10).map(|i| frame(vec![0.0; 2048], i * 100)).collect();
    let source = ScriptedSource { frames, keep_open: true, ..Default::default() };

    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, move |reading: PitchReading| {
        let running = reading.is_running;
        tx.send(reading).unwrap();
        if running {
            inner.stop();
        }
    })
    .unwrap()
    .with_stop_handle(handle);

    monitor.run().unwrap();

    assert!(!monitor.is_running());
    assert_eq!(monitor.source().released, 1);
    let readings: Vec<PitchReading> = rx.try_iter().collect();
    assert_eq!(readings.len(), 2);
    assert!(readings[0].is_running);
    assert!(!readings[1].is_running);
}

#[test]
fn stop_from_another_thread_wakes_run() {
    let (tx, rx) = observer();
    let source = ScriptedSource { keep_open: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();
    let handle = monitor.stop_handle();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();
    });
    monitor.run().unwrap();
    stopper.join().unwrap();

    assert!(!monitor.is_running());
    assert_eq!(rx.try_iter().filter(|r| !r.is_running).count(), 1);
}

#[test]
fn stale_stop_request_does_not_block_next_start() {
    let (tx, _rx) = observer();
    let source = ScriptedSource { keep_open: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();
    monitor.stop_handle().stop();

    monitor.start().unwrap();
    assert!(monitor.is_running());
    assert_eq!(monitor.poll(), 0);
    assert!(monitor.is_running());
}

#[test]
fn poll_stops_when_stream_ends() {
    let (tx, rx) = observer();
    let frames = (0..3).map(|i| frame(vec![0.0; 2048], i * 50)).collect();
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::with_frames(frames), tx).unwrap();

    monitor.start().unwrap();
    assert_eq!(monitor.poll(), 3);

    assert!(!monitor.is_running());
    let readings: Vec<PitchReading> = rx.try_iter().collect();
    assert_eq!(readings.len(), 4);
    assert!(!readings[3].is_running);
}

#[test]
fn frames_of_the_wrong_size_are_skipped() {
    let (tx, rx) = observer();
    let frames = vec![frame(vec![0.5; 100], 0)];
    let source = ScriptedSource { frames, keep_open: true, ..Default::default() };
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), source, tx).unwrap();

    monitor.start().unwrap();
    monitor.poll();

    assert!(monitor.is_running());
    assert_eq!(monitor.latest_analysis(), None);
    assert!(rx.try_recv().is_err());
}

#[test]
fn readings_serialize_as_flat_records() {
    let (tx, rx) = observer();
    let frames = vec![
        frame(sine(440.0, 0.5, 2048), 0),
        frame(vec![0.0; 2048], 100),
    ];
    let mut monitor = PitchMonitor::new(MonitorConfig::default(), ScriptedSource::with_frames(frames), tx).unwrap();
    monitor.run().unwrap();

    let readings: Vec<PitchReading> = rx.try_iter().collect();
    let accepted = serde_json::to_value(&readings[0]).unwrap();
    assert_eq!(accepted["noteName"], "A4");
    assert_eq!(accepted["midiNumber"], 69);
    assert!(accepted["centsOffset"].is_number());
    assert_eq!(accepted["isRunning"], true);

    let rejected = serde_json::to_value(&readings[1]).unwrap();
    assert!(rejected.get("noteName").is_none());
    assert!(rejected.get("midiNumber").is_none());
    assert_eq!(rejected["frequencyHz"], 0.0);

    assert_eq!(rejected["clarity"], 0.0);
    assert_eq!(rejected["rms"], 0.0);

    let stopped = serde_json::to_value(&readings[2]).unwrap();
    assert_eq!(stopped, serde_json::json!({ "isRunning": false }));
}

#[test]
fn config_loads_from_partial_json() {
    let config: MonitorConfig = serde_json::from_str(r#"{ "minHz": 80, "clarityGate": 0.9 }"#).unwrap();
    assert_eq!(config.min_hz, 80.0);
    assert_eq!(config.clarity_gate, 0.9);
    assert_eq!(config.max_hz, 2000.0);
    assert_eq!(config.update_hz, 30.0);
    assert_eq!(config.window_size, 2048);
}
