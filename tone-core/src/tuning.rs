//! # Musical Tuning Module
//!
//! Maps frequencies onto the 12-tone equal-tempered scale.
//! Notes are identified by their MIDI number; names use sharps and
//! scientific octave numbering, so MIDI 60 is "C4" and MIDI 69 is "A4".
//!
//! ## Features
//! - Frequency to nearest MIDI note, relative to a configurable A4
//! - MIDI note to exact equal-temperament frequency
//! - MIDI note to name and back
//! - Cent deviation calculations

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;

/// Chromatic note names starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI number of A4, the reference pitch.
pub const A4_MIDI: i32 = 69;

/// Standard concert pitch for A4 in Hz.
pub const CONCERT_A4_HZ: f32 = 440.0;

/// The nearest note to a detected frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteReading {
    /// Note name with octave (e.g., "A4", "C#3")
    #[serde(rename = "noteName")]
    pub name: String,
    /// MIDI note number
    #[serde(rename = "midiNumber")]
    pub midi: i32,
    /// Deviation from the note's exact frequency (positive = sharp)
    #[serde(rename = "centsOffset")]
    pub cents: f32,
}

/// Name lookup for the full MIDI range (0 to 127).
///
/// Built once on first use; maps names like "A4" or "C#-1" back to
/// their MIDI numbers.
static NOTE_MAP: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    (0..=127).map(|midi| (note_name(midi), midi)).collect()
});

/// Rounds a frequency to the nearest MIDI note number.
///
/// # Arguments
/// * `freq` - Frequency in Hz (must be positive)
/// * `reference_hz` - Frequency of A4 in Hz
pub fn midi_from_frequency(freq: f32, reference_hz: f32) -> i32 {
    (A4_MIDI as f32 + 12.0 * (freq / reference_hz).log2()).round() as i32
}

/// Exact equal-temperament frequency of a MIDI note.
pub fn frequency_from_midi(midi: i32, reference_hz: f32) -> f32 {
    reference_hz * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Returns the note name with octave for a MIDI number (e.g., 69 -> "A4").
///
/// The octave changes at C. Numbers below zero keep counting downwards,
/// so -1 is "B-2".
pub fn note_name(midi: i32) -> String {
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}

/// Looks up the MIDI number of a note name within the MIDI range.
///
/// # Returns
/// * `Some(midi)` - for names such as "A4", "C#3" or "C-1"
/// * `None` - for unknown names or notes outside 0 to 127
pub fn midi_from_note_name(name: &str) -> Option<i32> {
    NOTE_MAP.get(name).copied()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Finds the nearest equal-tempered note to a frequency.
///
/// # Arguments
/// * `freq` - Detected frequency in Hz (must be positive)
/// * `reference_hz` - Frequency of A4 in Hz
pub fn nearest_note(freq: f32, reference_hz: f32) -> NoteReading {
    let midi = midi_from_frequency(freq, reference_hz);
    let target_freq = frequency_from_midi(midi, reference_hz);
    NoteReading {
        name: note_name(midi),
        midi,
        cents: cents_deviation(freq, target_freq),
    }
}
