//! # Tone Monitor - command line front end
//!
//! Listens to the default microphone (or a synthetic tone) and prints the
//! detected pitch, nearest note and cents offset as they are emitted.
//!
//! ## Architecture
//! - **Main Thread**: owns the `PitchMonitor` and blocks in `run()`
//! - **Audio Thread**: CPAL's capture callback, feeding frames over a channel
//! - **Timer Thread**: optional, stops the monitor after `--duration`

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tone_core::{AudioSource, MicrophoneSource, MonitorConfig, PitchMonitor, PitchReading, ToneSource};

/// Seconds of synthetic tone generated when no duration is given.
const DEFAULT_TONE_SECONDS: f64 = 2.0;

#[derive(Debug, Parser)]
#[command(name = "tone-monitor", version, about = "Real-time pitch monitor")]
struct Cli {
    /// JSON file with monitor settings (camelCase keys, all optional)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lowest detectable frequency in Hz
    #[arg(long)]
    min_hz: Option<f32>,

    /// Highest detectable frequency in Hz
    #[arg(long)]
    max_hz: Option<f32>,

    /// Minimum RMS level for a reading to carry a note
    #[arg(long)]
    rms_gate: Option<f32>,

    /// Minimum clarity (0 to 1) for a reading to carry a note
    #[arg(long)]
    clarity_gate: Option<f32>,

    /// Readings per second
    #[arg(long)]
    update_hz: Option<f32>,

    /// Frequency of A4 in Hz
    #[arg(long)]
    reference_hz: Option<f32>,

    /// Analysis window in samples
    #[arg(long)]
    window_size: Option<usize>,

    /// New samples between analysed frames
    #[arg(long, default_value_t = tone_core::audio::DEFAULT_HOP_SIZE)]
    hop: usize,

    /// Analyse a synthetic sine at this frequency instead of the microphone
    #[arg(long, value_name = "HZ")]
    tone: Option<f32>,

    /// Amplitude of the synthetic sine
    #[arg(long, default_value_t = 0.5)]
    amplitude: f32,

    /// Sample rate of the synthetic sine
    #[arg(long, default_value_t = tone_core::audio::TARGET_SAMPLE_RATE)]
    sample_rate: u32,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    duration: Option<f64>,

    /// Print each reading as a JSON line
    #[arg(long)]
    json: bool,

    /// Skip readings without a detected note
    #[arg(long)]
    notes_only: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    log::debug!("Monitor configuration: {:?}", config);

    match cli.tone {
        Some(frequency) => {
            let seconds = cli.duration.unwrap_or(DEFAULT_TONE_SECONDS).max(0.0);
            let frame_count = (seconds * cli.sample_rate as f64 / cli.hop.max(1) as f64).ceil() as usize;
            let source = ToneSource::new(frequency, cli.amplitude, cli.sample_rate)
                .with_hop(cli.hop)
                .with_frame_count(frame_count);
            // Stream time, not wall time, bounds a synthetic run.
            run_monitor(config, source, &cli, None)
        }
        None => {
            let source = MicrophoneSource::new().with_hop(cli.hop);
            run_monitor(config, source, &cli, cli.duration)
        }
    }
}

/// Runs a monitor over `source` until it stops, printing every reading.
fn run_monitor<S: AudioSource>(config: MonitorConfig, source: S, cli: &Cli, duration: Option<f64>) -> Result<()> {
    let json = cli.json;
    let notes_only = cli.notes_only;
    let printer = move |reading: PitchReading| {
        if notes_only && reading.is_running && reading.note.is_none() {
            return;
        }
        match format_reading(&reading, json) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to format reading: {}", e),
        }
    };

    let mut monitor = PitchMonitor::new(config, source, printer)?;

    if let Some(seconds) = duration {
        let handle = monitor.stop_handle();
        let seconds = seconds.max(0.0);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(seconds));
            log::debug!("Duration elapsed, stopping");
            handle.stop();
        });
    }

    monitor.run().context("failed to start monitoring")?;
    Ok(())
}

/// Merges defaults, the optional config file and command line overrides.
fn build_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(v) = cli.min_hz {
        config.min_hz = v;
    }
    if let Some(v) = cli.max_hz {
        config.max_hz = v;
    }
    if let Some(v) = cli.rms_gate {
        config.rms_gate = v;
    }
    if let Some(v) = cli.clarity_gate {
        config.clarity_gate = v;
    }
    if let Some(v) = cli.update_hz {
        config.update_hz = v;
    }
    if let Some(v) = cli.reference_hz {
        config.reference_hz = v;
    }
    if let Some(v) = cli.window_size {
        config.window_size = v;
    }

    config.validate()?;
    Ok(config)
}

/// Loads monitor settings from a JSON file.
///
/// Keys that are missing from the file keep their default values.
fn load_config(path: &Path) -> Result<MonitorConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Renders a reading as a JSON line or a human-readable line.
fn format_reading(reading: &PitchReading, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(reading)?);
    }
    if !reading.is_running {
        return Ok("stopped".to_string());
    }
    Ok(match &reading.note {
        Some(note) => format!(
            "{:>8.2} Hz  {:<4} {:+6.1} cents  clarity {:.2}",
            reading.frequency_hz, note.name, note.cents, reading.clarity
        ),
        None => format!(
            "{:>8} Hz  {:<4} {:>6} cents  clarity {:.2}  rms {:.4}",
            "--", "--", "--", reading.clarity, reading.rms
        ),
    })
}
