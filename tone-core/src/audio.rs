//! # Audio Capture Module
//!
//! This module defines the [`AudioSource`] capability the monitor consumes
//! and ships two implementations of it:
//! - [`MicrophoneSource`] captures the default input device through CPAL
//!   (Cross-Platform Audio Library).
//! - [`ToneSource`] synthesizes a sine tone, for dry runs and tests.
//!
//! Both deliver fixed-size frames over a crossbeam channel. Frames are a
//! sliding window over the stream: each one holds the newest `window`
//! samples and a new frame is produced every `hop` samples.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::time::Duration;

use crate::error::MonitorError;

/// Sample rate requested from the input device.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// Default number of new samples between two frames (~11.6ms at 44.1kHz).
pub const DEFAULT_HOP_SIZE: usize = 512;

/// Frames buffered between the capture callback and the monitor.
/// When the monitor falls behind, the oldest frames are dropped.
const FRAME_QUEUE_DEPTH: usize = 8;

/// One window of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Stream position of the newest sample in the window.
    pub timestamp: Duration,
}

/// A live stream handed out by [`AudioSource::acquire`].
#[derive(Debug)]
pub struct AudioStream {
    pub sample_rate: u32,
    /// Frames in delivery order. Disconnects when the source ends.
    pub frames: Receiver<AudioFrame>,
}

/// A provider of mono sample frames.
pub trait AudioSource {
    /// Opens the source and starts delivering frames of `window` samples.
    ///
    /// # Errors
    /// * `MonitorError::SourceUnavailable` - no device, permission denied,
    ///   or no usable stream format
    fn acquire(&mut self, window: usize) -> Result<AudioStream, MonitorError>;

    /// Stops delivery and frees the underlying stream handle.
    fn release(&mut self) -> Result<()>;
}

/// Turns a stream of mono samples into overlapping fixed-size frames.
///
/// Keeps the newest `window` samples in a ring buffer and emits a frame
/// every `hop` samples once the ring has filled up.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    ring: Vec<f32>,
    write_pos: usize,
    hop: usize,
    since_emit: usize,
    samples_seen: u64,
    sample_rate: u32,
}

impl FrameAssembler {
    pub fn new(window: usize, hop: usize, sample_rate: u32) -> Self {
        Self {
            ring: vec![0.0; window.max(1)],
            write_pos: 0,
            hop: hop.max(1),
            since_emit: 0,
            samples_seen: 0,
            sample_rate,
        }
    }

    /// Feeds mono samples, calling `emit` for every completed frame.
    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = f32>,
        F: FnMut(AudioFrame),
    {
        let window = self.ring.len();
        for sample in samples {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % window;
            self.samples_seen += 1;
            self.since_emit += 1;

            if self.samples_seen >= window as u64 && self.since_emit >= self.hop {
                self.since_emit = 0;
                emit(self.snapshot());
            }
        }
    }

    /// Downmixes interleaved samples to mono before feeding them.
    pub fn push_interleaved<F>(&mut self, data: &[f32], channels: usize, emit: F)
    where
        F: FnMut(AudioFrame),
    {
        let channels = channels.max(1);
        let mono = data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32);
        self.push(mono, emit);
    }

    /// Copies the ring into a frame, oldest sample first.
    fn snapshot(&self) -> AudioFrame {
        let mut samples = Vec::with_capacity(self.ring.len());
        samples.extend_from_slice(&self.ring[self.write_pos..]);
        samples.extend_from_slice(&self.ring[..self.write_pos]);
        let timestamp = if self.sample_rate > 0 {
            Duration::from_secs_f64(self.samples_seen as f64 / self.sample_rate as f64)
        } else {
            Duration::ZERO
        };
        AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            timestamp,
        }
    }
}

/// Queues `frame` without blocking, evicting the oldest queued frames
/// when the queue is full so the monitor always sees the newest audio.
fn send_latest(sender: &Sender<AudioFrame>, backlog: &Receiver<AudioFrame>, mut frame: AudioFrame) {
    loop {
        match sender.try_send(frame) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(rejected)) => {
                frame = rejected;
                if backlog.try_recv().is_ok() {
                    log::debug!("Frame queue full; dropping the oldest frame");
                }
            }
        }
    }
}

/// Captures the default input device.
///
/// The capture callback runs on CPAL's audio thread and only assembles
/// frames and hands them to the channel; analysis happens on the monitor's
/// side.
pub struct MicrophoneSource {
    target_rate: u32,
    hop: usize,
    stream: Option<cpal::Stream>,
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self {
            target_rate: TARGET_SAMPLE_RATE,
            hop: DEFAULT_HOP_SIZE,
            stream: None,
        }
    }

    /// Sets the number of new samples between frames.
    pub fn with_hop(mut self, hop: usize) -> Self {
        self.hop = hop.max(1);
        self
    }

    /// Sets the preferred sample rate. The device's closest supported rate
    /// is used if it cannot run at exactly this rate.
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.target_rate = rate;
        self
    }
}

impl AudioSource for MicrophoneSource {
    /// Starts audio capture from the default input device.
    ///
    /// Audio configuration:
    /// - Format: 32-bit float
    /// - Channels: mono preferred, otherwise downmixed
    /// - Sample rate: closest supported to the target (44.1 kHz by default)
    fn acquire(&mut self, window: usize) -> Result<AudioStream, MonitorError> {
        let unavailable = |e: &dyn std::fmt::Display| MonitorError::SourceUnavailable(e.to_string());

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MonitorError::SourceUnavailable("no input device available".into()))?;

        log::info!(
            "Using audio input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let configs = device
            .supported_input_configs()
            .map_err(|e| unavailable(&e))?
            .collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, self.target_rate).ok_or_else(|| {
            MonitorError::SourceUnavailable("no suitable f32 input format found".into())
        })?;

        let rate = self.target_rate.clamp(
            supported_config.min_sample_rate().0,
            supported_config.max_sample_rate().0,
        );
        let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let config: cpal::StreamConfig = config.into();

        log::info!("Selected sample rate: {} Hz, {} channel(s)", sample_rate, channels);

        let (sender, frames) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let backlog = frames.clone();
        let mut assembler = FrameAssembler::new(window, self.hop, sample_rate);
        let err_fn = |err| log::error!("An error occurred on the audio stream: {}", err);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push_interleaved(data, channels, |frame| {
                        send_latest(&sender, &backlog, frame);
                    });
                },
                err_fn,
                None,
            )
            .map_err(|e| unavailable(&e))?;

        stream.play().map_err(|e| unavailable(&e))?;
        self.stream = Some(stream);

        Ok(AudioStream { sample_rate, frames })
    }

    fn release(&mut self) -> Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| anyhow!("audio stream already released"))?;
        // Properly stop the stream before dropping it
        stream.pause()?;
        drop(stream);
        Ok(())
    }
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Mono configurations win over
/// multi-channel ones; among equals the closest sample rate wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() >= 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_rate = c.min_sample_rate().0;
            let max_rate = c.max_sample_rate().0;
            let rate_diff = if (min_rate..=max_rate).contains(&target_rate) {
                0
            } else {
                min_rate.abs_diff(target_rate).min(max_rate.abs_diff(target_rate))
            };
            (c.channels() != 1, rate_diff)
        })
}

/// A synthetic sine tone.
///
/// All frames are generated when the source is acquired and the stream
/// ends after the last one, so a monitor driven by [`run`] returns on its
/// own.
///
/// [`run`]: crate::PitchMonitor::run
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency_hz: f32,
    amplitude: f32,
    sample_rate: u32,
    hop: usize,
    frame_count: usize,
}

impl ToneSource {
    pub fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency_hz,
            amplitude,
            sample_rate,
            hop: DEFAULT_HOP_SIZE,
            frame_count: 64,
        }
    }

    pub fn with_hop(mut self, hop: usize) -> Self {
        self.hop = hop.max(1);
        self
    }

    pub fn with_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }
}

impl AudioSource for ToneSource {
    fn acquire(&mut self, window: usize) -> Result<AudioStream, MonitorError> {
        if self.sample_rate == 0 {
            return Err(MonitorError::SourceUnavailable("tone sample rate must be positive".into()));
        }

        let (sender, frames) = crossbeam_channel::unbounded();
        if self.frame_count > 0 {
            let total = window + (self.frame_count - 1) * self.hop;
            let step = 2.0 * std::f64::consts::PI * self.frequency_hz as f64 / self.sample_rate as f64;
            let amplitude = self.amplitude;
            let tone = (0..total).map(|i| amplitude * (step * i as f64).sin() as f32);

            let mut assembler = FrameAssembler::new(window, self.hop, self.sample_rate);
            assembler.push(tone, |frame| {
                let _ = sender.send(frame);
            });
        }
        log::debug!(
            "Generated {} frames of a {} Hz tone at {} Hz",
            frames.len(),
            self.frequency_hz,
            self.sample_rate
        );

        Ok(AudioStream {
            sample_rate: self.sample_rate,
            frames,
        })
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
