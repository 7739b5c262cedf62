//! # Pitch Detection Module
//!
//! Autocorrelation pitch estimator for a single window of mono samples.
//!
//! ## Features
//! - DC removal and RMS measurement with a hard silence floor
//! - Center clipping to suppress formant bias
//! - First-peak selection past the initial autocorrelation valley
//! - Parabolic interpolation for sub-sample accuracy
//!
//! A frame with no usable pitch is not an error: silence, a window that is
//! too short for the requested band, a missing periodicity peak and an
//! out-of-band estimate all produce a zeroed [`AnalysisResult`].

/// Signals whose RMS falls below this are treated as silence, regardless
/// of any gate the caller applies later.
pub const SILENCE_RMS: f32 = 1e-4;

/// Samples quieter than this fraction of the peak magnitude are zeroed.
const CLIP_RATIO: f32 = 0.5;

/// A candidate peak is chosen when it reaches this fraction of the
/// strongest candidate. Picks the fundamental period over its multiples.
const KEY_MAXIMUM_RATIO: f32 = 0.9;

/// Smallest lag ever searched.
const MIN_LAG_FLOOR: usize = 2;

/// Outcome of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalysisResult {
    /// Estimated fundamental frequency in Hz, or 0 if none was found.
    pub frequency_hz: f32,
    /// Periodicity strength (0.0 to 1.0).
    pub clarity: f32,
    /// RMS of the DC-free input.
    pub rms: f32,
}

impl AnalysisResult {
    /// A "no pitch" result that still reports the measured energy.
    fn unpitched(rms: f32) -> Self {
        Self { frequency_hz: 0.0, clarity: 0.0, rms }
    }

    /// True if the analyzer produced a frequency estimate.
    pub fn has_pitch(&self) -> bool {
        self.frequency_hz > 0.0
    }
}

/// Autocorrelation analyzer with reusable scratch buffers.
///
/// Holds the detection band plus the centered signal, correlation and
/// peak buffers, which are overwritten on every call so that steady-state
/// analysis does not allocate.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    min_hz: f32,
    max_hz: f32,
    centered: Vec<f32>,
    correlation: Vec<f32>,
    peaks: Vec<(usize, f32)>,
}

impl FrameAnalyzer {
    pub fn new(min_hz: f32, max_hz: f32) -> Self {
        Self {
            min_hz,
            max_hz,
            centered: Vec::new(),
            correlation: Vec::new(),
            peaks: Vec::new(),
        }
    }

    pub fn min_hz(&self) -> f32 {
        self.min_hz
    }

    pub fn max_hz(&self) -> f32 {
        self.max_hz
    }

    /// Smallest window that can hold at least one correlation term for the
    /// lowest frequency of the band at `sample_rate`.
    pub fn min_window(&self, sample_rate: u32) -> usize {
        let (_, max_lag) = lag_bounds(sample_rate, self.min_hz, self.max_hz);
        max_lag.saturating_add(3)
    }

    /// Estimates the pitch of one window of samples.
    ///
    /// # Arguments
    /// * `samples` - Mono time-domain samples
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `AnalysisResult` with `frequency_hz > 0` when a pitch inside the band
    ///   was found, or a zeroed frequency and clarity otherwise
    pub fn analyze(&mut self, samples: &[f32], sample_rate: u32) -> AnalysisResult {
        let n = samples.len();
        if n == 0 || sample_rate == 0 {
            return AnalysisResult::default();
        }

        // --- Step 1: DC removal and RMS ---
        let mean = samples.iter().sum::<f32>() / n as f32;
        self.centered.clear();
        self.centered.extend(samples.iter().map(|&s| s - mean));
        let rms = (self.centered.iter().map(|&s| s * s).sum::<f32>() / n as f32).sqrt();
        if !(rms >= SILENCE_RMS) {
            return AnalysisResult::unpitched(if rms.is_finite() { rms } else { 0.0 });
        }

        // --- Step 2: Lag bounds from the frequency band ---
        let (min_lag, max_lag) = lag_bounds(sample_rate, self.min_hz, self.max_hz);
        // A near-zero min_hz saturates max_lag; no window is long enough then.
        let valid_length = match max_lag.checked_add(2).and_then(|guard| n.checked_sub(guard)) {
            Some(len) if len > 0 => len,
            _ => return AnalysisResult::unpitched(rms),
        };
        if min_lag >= max_lag {
            return AnalysisResult::unpitched(rms);
        }

        // --- Step 3: Center clipping ---
        let clip_level = self.centered.iter().fold(0.0_f32, |peak, &s| peak.max(s.abs())) * CLIP_RATIO;
        for sample in self.centered.iter_mut() {
            if sample.abs() < clip_level {
                *sample = 0.0;
            }
        }

        // --- Step 4: Autocorrelation over the valid range ---
        let signal = &self.centered;
        self.correlation.clear();
        self.correlation.resize(max_lag + 1, 0.0);
        for lag in min_lag..=max_lag {
            self.correlation[lag] = signal[..valid_length]
                .iter()
                .zip(&signal[lag..lag + valid_length])
                .map(|(a, b)| a * b)
                .sum();
        }

        // --- Step 5: First key maximum past the initial valley ---
        let Some(peak_lag) = select_peak(&self.correlation, min_lag, max_lag, &mut self.peaks) else {
            return AnalysisResult::unpitched(rms);
        };

        // --- Step 6: Parabolic interpolation around the peak ---
        let x1 = self.correlation[peak_lag];
        let x0 = if peak_lag > min_lag { self.correlation[peak_lag - 1] } else { x1 };
        let x2 = if peak_lag < max_lag { self.correlation[peak_lag + 1] } else { x1 };
        let denominator = x0 - 2.0 * x1 + x2;
        let delta = if denominator != 0.0 { 0.5 * (x0 - x2) / denominator } else { 0.0 };
        let refined_lag = (peak_lag as f32 + delta).clamp(min_lag as f32, max_lag as f32);

        // --- Step 7: Frequency ---
        let frequency_hz = sample_rate as f32 / refined_lag;

        // --- Step 8: Clarity against the clipped signal's power ---
        let power: f32 = signal[..valid_length].iter().map(|&s| s * s).sum();
        let clarity = if power > 0.0 { (x1 / power).clamp(0.0, 1.0) } else { 0.0 };

        // --- Step 9: Final guard on the band ---
        if !frequency_hz.is_finite() || frequency_hz < self.min_hz || frequency_hz > self.max_hz {
            return AnalysisResult::unpitched(rms);
        }

        AnalysisResult { frequency_hz, clarity, rms }
    }
}

/// Analyzes one window with a throwaway analyzer.
///
/// Convenience form of [`FrameAnalyzer::analyze`] for one-off calls; the
/// monitor keeps a long-lived analyzer instead.
pub fn analyze(samples: &[f32], sample_rate: u32, min_hz: f32, max_hz: f32) -> AnalysisResult {
    FrameAnalyzer::new(min_hz, max_hz).analyze(samples, sample_rate)
}

/// Returns `(min_lag, max_lag)` in samples for a frequency band.
fn lag_bounds(sample_rate: u32, min_hz: f32, max_hz: f32) -> (usize, usize) {
    let sr = sample_rate as f32;
    let max_lag = (sr / min_hz).floor() as usize;
    let min_lag = ((sr / max_hz).floor() as usize).max(MIN_LAG_FLOOR);
    (min_lag, max_lag)
}

/// Picks the periodicity peak from an autocorrelation curve.
///
/// The scan ignores everything up to the first valley, which belongs to
/// the zero-lag peak. If the curve is already rising at `min_lag` the
/// valley lies below the band and the scan starts right away. Each local
/// maximum after that is a candidate; the first one that reaches
/// `KEY_MAXIMUM_RATIO` of the strongest candidate wins.
fn select_peak(
    correlation: &[f32],
    min_lag: usize,
    max_lag: usize,
    candidates: &mut Vec<(usize, f32)>,
) -> Option<usize> {
    candidates.clear();
    let mut passed_valley = false;
    let mut current: Option<(usize, f32)> = None;
    let mut prev = correlation[min_lag];

    for lag in (min_lag + 1)..=max_lag {
        let value = correlation[lag];
        if !passed_valley {
            if value < prev {
                passed_valley = true;
            } else if lag == min_lag + 1 && value > prev {
                passed_valley = true;
                current = Some((lag, value));
            }
        } else if value < prev {
            // The hill ended on the previous lag.
            if let Some(peak) = current.take() {
                candidates.push(peak);
            }
        } else if current.map_or(true, |(_, best)| value > best) {
            current = Some((lag, value));
        }
        prev = value;
    }
    // A hill still rising at max_lag.
    if let Some(peak) = current {
        candidates.push(peak);
    }

    let strongest = candidates.iter().map(|&(_, v)| v).fold(f32::NEG_INFINITY, f32::max);
    if !(strongest > 0.0) {
        return None;
    }
    candidates
        .iter()
        .find(|&&(_, value)| value >= KEY_MAXIMUM_RATIO * strongest)
        .map(|&(lag, _)| lag)
}
