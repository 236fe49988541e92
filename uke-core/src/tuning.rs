//! # Tuning Module
//!
//! Conversions between frequency, MIDI note number, note name and cents,
//! plus the reference table a ukulele tuner works against.
//!
//! ## Features
//! - Equal temperament around A4 = 440 Hz
//! - MIDI quantization and note/octave naming
//! - Cent deviation (positive = sharp, negative = flat)
//! - Standard GCEA reference strings and a chromatic "nearest note" mode

use crate::theory::{NoteName, ParseError, Spelling};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Concert pitch for A4.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

/// Deviation, in cents, within which a string counts as tuned.
pub const IN_TUNE_CENTS: f32 = 5.0;

/// A note derived from a MIDI number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    pub midi: i32,
    /// Sharp spelling of the pitch class.
    pub name: NoteName,
    pub octave: i32,
    /// Equal-tempered frequency in Hz.
    pub frequency: f32,
}

impl NoteInfo {
    /// Scientific pitch label, e.g. "A4" or "C#3".
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// Precomputed notes for the whole MIDI range (0-127).
///
/// Every tuner tick resolves a note, so the table saves a `powf` per frame.
static NOTE_TABLE: Lazy<Vec<NoteInfo>> = Lazy::new(|| (0..128).map(compute_note_info).collect());

/// Rounds a frequency to the nearest MIDI note number.
///
/// `freq` must be positive; the result is quantized to semitones.
pub fn frequency_to_midi(freq: f32) -> i32 {
    (A4_MIDI as f32 + 12.0 * (freq / A4_FREQUENCY).log2()).round() as i32
}

pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Names a MIDI number: pitch class from `midi mod 12`, octave from
/// `floor(midi / 12) - 1` (so MIDI 60 is C4).
pub fn midi_to_note_info(midi: i32) -> NoteInfo {
    match usize::try_from(midi).ok().and_then(|i| NOTE_TABLE.get(i)) {
        Some(info) => *info,
        None => compute_note_info(midi),
    }
}

fn compute_note_info(midi: i32) -> NoteInfo {
    NoteInfo {
        midi,
        name: NoteName::from_pitch_class(midi, Spelling::Sharps),
        octave: midi.div_euclid(12) - 1,
        frequency: midi_to_frequency(midi),
    }
}

/// Finds the closest equal-tempered note to a frequency.
pub fn frequency_to_note_info(freq: f32) -> NoteInfo {
    midi_to_note_info(frequency_to_midi(freq))
}

/// Calculates the deviation of `freq` from `reference` in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_off_from_frequency(freq: f32, reference: f32) -> f32 {
    1200.0 * (freq / reference).log2()
}

pub fn is_in_tune(cents: f32) -> bool {
    cents.abs() <= IN_TUNE_CENTS
}

/// The four strings of a standard (re-entrant) GCEA ukulele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UkuleleString {
    G,
    C,
    E,
    A,
}

impl UkuleleString {
    pub const ALL: [UkuleleString; 4] = [
        UkuleleString::G,
        UkuleleString::C,
        UkuleleString::E,
        UkuleleString::A,
    ];

    pub fn label(self) -> &'static str {
        match self {
            UkuleleString::G => "G4",
            UkuleleString::C => "C4",
            UkuleleString::E => "E4",
            UkuleleString::A => "A4",
        }
    }

    /// Reference frequency of the open string in Hz.
    pub fn frequency(self) -> f32 {
        match self {
            UkuleleString::G => 392.0,
            UkuleleString::C => 261.63,
            UkuleleString::E => 329.63,
            UkuleleString::A => 440.0,
        }
    }

    /// The string whose open pitch is closest (in cents) to `freq`.
    pub fn nearest(freq: f32) -> UkuleleString {
        let mut best = UkuleleString::A;
        let mut best_cents = f32::INFINITY;
        for string in Self::ALL {
            let cents = cents_off_from_frequency(freq, string.frequency()).abs();
            if cents < best_cents {
                best = string;
                best_cents = cents;
            }
        }
        best
    }
}

impl fmt::Display for UkuleleString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for UkuleleString {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_uppercase().as_str() {
            "G" | "G4" => Ok(UkuleleString::G),
            "C" | "C4" => Ok(UkuleleString::C),
            "E" | "E4" => Ok(UkuleleString::E),
            "A" | "A4" => Ok(UkuleleString::A),
            _ => Err(ParseError {
                kind: "ukulele string",
                input: input.to_string(),
            }),
        }
    }
}

/// What the tuner measures a detected frequency against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningTarget {
    /// Whatever equal-tempered note is closest.
    #[default]
    Chromatic,
    /// A fixed open string.
    String(UkuleleString),
}

impl TuningTarget {
    /// Resolves the target for a detected frequency.
    ///
    /// # Returns
    /// * `(label, target_frequency)` - e.g. `("A4", 440.0)`
    pub fn resolve(&self, freq: f32) -> (String, f32) {
        match self {
            TuningTarget::Chromatic => {
                let note = frequency_to_note_info(freq);
                (note.label(), note.frequency)
            }
            TuningTarget::String(string) => (string.label().to_string(), string.frequency()),
        }
    }

    /// Label, target frequency and cent deviation of `freq`.
    pub fn deviation(&self, freq: f32) -> (String, f32, f32) {
        let (label, target) = self.resolve(freq);
        (label, target, cents_off_from_frequency(freq, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_points() {
        assert_eq!(frequency_to_midi(440.0), 69);
        assert_eq!(frequency_to_midi(261.63), 60);
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-3);
        assert!((midi_to_frequency(57) - 220.0).abs() < 1e-3);
        assert!((midi_to_frequency(60) - 261.6256).abs() < 1e-2);
    }

    #[test]
    fn test_note_info_naming() {
        let c4 = midi_to_note_info(60);
        assert_eq!(c4.name, NoteName::C);
        assert_eq!(c4.octave, 4);
        assert_eq!(c4.label(), "C4");

        let a_sharp_3 = midi_to_note_info(58);
        assert_eq!(a_sharp_3.label(), "A#3");

        let b_minus_1 = midi_to_note_info(11);
        assert_eq!(b_minus_1.octave, -1);
    }

    #[test]
    fn test_note_info_outside_table() {
        let low = midi_to_note_info(-1);
        assert_eq!(low.name, NoteName::B);
        assert_eq!(low.octave, -2);

        let high = midi_to_note_info(130);
        assert_eq!(high.name, NoteName::ASharp);
        assert_eq!(high.octave, 9);
        assert_eq!(high, compute_note_info(130));
    }

    #[test]
    fn test_midi_round_trip_stays_within_a_semitone() {
        let mut freq = 20.0_f32;
        while freq < 20_000.0 {
            let back = midi_to_frequency(frequency_to_midi(freq));
            let cents = cents_off_from_frequency(back, freq).abs();
            assert!(cents <= 50.0 + 1e-2, "{freq} Hz came back as {back} Hz ({cents} cents)");
            freq *= 1.037;
        }
    }

    #[test]
    fn test_cents_identities() {
        for freq in [55.0_f32, 196.0, 261.63, 440.0, 1234.5] {
            assert_eq!(cents_off_from_frequency(freq, freq), 0.0);
            assert!((cents_off_from_frequency(2.0 * freq, freq) - 1200.0).abs() < 1e-3);
        }
        assert!(cents_off_from_frequency(445.0, 440.0) > 0.0);
        assert!(cents_off_from_frequency(435.0, 440.0) < 0.0);
    }

    #[test]
    fn test_nearest_string() {
        assert_eq!(UkuleleString::nearest(395.0), UkuleleString::G);
        assert_eq!(UkuleleString::nearest(255.0), UkuleleString::C);
        assert_eq!(UkuleleString::nearest(335.0), UkuleleString::E);
        assert_eq!(UkuleleString::nearest(450.0), UkuleleString::A);
    }

    #[test]
    fn test_tuning_targets() {
        let (label, target, cents) = TuningTarget::Chromatic.deviation(442.0);
        assert_eq!(label, "A4");
        assert!((target - 440.0).abs() < 1e-3);
        assert!(cents > 7.0 && cents < 8.5);
        assert!(!is_in_tune(cents));

        let (label, _, cents) = TuningTarget::String(UkuleleString::E).deviation(330.0);
        assert_eq!(label, "E4");
        assert!(is_in_tune(cents));
    }

    #[test]
    fn test_parse_string_names() {
        assert_eq!("g".parse::<UkuleleString>(), Ok(UkuleleString::G));
        assert_eq!("A4".parse::<UkuleleString>(), Ok(UkuleleString::A));
        assert!("D".parse::<UkuleleString>().is_err());
    }
}
