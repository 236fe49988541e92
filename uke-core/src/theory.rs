//! # Music Theory Module
//!
//! Pitch-class arithmetic and the small amount of harmony the studio needs:
//! note spellings, transposition, scales, chords with ukulele voicings, and
//! a fretboard map. Everything here is pure and allocation-light.
//!
//! ## Features
//! - All seventeen common note spellings, parsed leniently from user input
//! - Independent sharp/flat spelling tables over pitch classes 0-11
//! - Scale and chord note sets built from interval tables
//! - Ukulele chord shapes transposed from C and kept in low position

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A note name irrespective of octave, keeping its spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "Db")]
    DFlat,
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "Eb")]
    EFlat,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "Gb")]
    GFlat,
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "Ab")]
    AFlat,
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "Bb")]
    BFlat,
    B,
}

/// Which enharmonic spelling to use when turning a pitch class into a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spelling {
    #[default]
    Sharps,
    Flats,
}

pub const CHROMATIC_SHARPS: [NoteName; 12] = [
    NoteName::C,
    NoteName::CSharp,
    NoteName::D,
    NoteName::DSharp,
    NoteName::E,
    NoteName::F,
    NoteName::FSharp,
    NoteName::G,
    NoteName::GSharp,
    NoteName::A,
    NoteName::ASharp,
    NoteName::B,
];

pub const CHROMATIC_FLATS: [NoteName; 12] = [
    NoteName::C,
    NoteName::DFlat,
    NoteName::D,
    NoteName::EFlat,
    NoteName::E,
    NoteName::F,
    NoteName::GFlat,
    NoteName::G,
    NoteName::AFlat,
    NoteName::A,
    NoteName::BFlat,
    NoteName::B,
];

/// Failure to read a theory term typed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind}: {input:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub input: String,
}

impl ParseError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

impl NoteName {
    /// The integer 0-11 this name denotes (C = 0).
    pub fn pitch_class(self) -> u8 {
        match self {
            NoteName::C => 0,
            NoteName::CSharp | NoteName::DFlat => 1,
            NoteName::D => 2,
            NoteName::DSharp | NoteName::EFlat => 3,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::FSharp | NoteName::GFlat => 6,
            NoteName::G => 7,
            NoteName::GSharp | NoteName::AFlat => 8,
            NoteName::A => 9,
            NoteName::ASharp | NoteName::BFlat => 10,
            NoteName::B => 11,
        }
    }

    /// Spells any integer as a pitch class, wrapping negatives.
    pub fn from_pitch_class(pc: i32, spelling: Spelling) -> Self {
        let idx = pc.rem_euclid(12) as usize;
        match spelling {
            Spelling::Sharps => CHROMATIC_SHARPS[idx],
            Spelling::Flats => CHROMATIC_FLATS[idx],
        }
    }

    pub fn transpose(self, semitones: i32, spelling: Spelling) -> Self {
        Self::from_pitch_class(self.pitch_class() as i32 + semitones, spelling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::CSharp => "C#",
            NoteName::DFlat => "Db",
            NoteName::D => "D",
            NoteName::DSharp => "D#",
            NoteName::EFlat => "Eb",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F#",
            NoteName::GFlat => "Gb",
            NoteName::G => "G",
            NoteName::GSharp => "G#",
            NoteName::AFlat => "Ab",
            NoteName::A => "A",
            NoteName::ASharp => "A#",
            NoteName::BFlat => "Bb",
            NoteName::B => "B",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteName {
    type Err = ParseError;

    /// Accepts any case, surrounding whitespace and the `♯`/`♭` glyphs.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input
            .trim()
            .replace('♯', "#")
            .replace('♭', "b")
            .to_ascii_uppercase();
        let note = match s.as_str() {
            "C" => NoteName::C,
            "C#" => NoteName::CSharp,
            "DB" => NoteName::DFlat,
            "D" => NoteName::D,
            "D#" => NoteName::DSharp,
            "EB" => NoteName::EFlat,
            "E" => NoteName::E,
            "F" => NoteName::F,
            "F#" => NoteName::FSharp,
            "GB" => NoteName::GFlat,
            "G" => NoteName::G,
            "G#" => NoteName::GSharp,
            "AB" => NoteName::AFlat,
            "A" => NoteName::A,
            "A#" => NoteName::ASharp,
            "BB" => NoteName::BFlat,
            "B" => NoteName::B,
            _ => return Err(ParseError::new("note name", input)),
        };
        Ok(note)
    }
}

/// Semitones going up from `from` to reach `to`, in 0-11.
pub fn pc_distance_up(from: u8, to: u8) -> u8 {
    (to as i32 - from as i32).rem_euclid(12) as u8
}

// --- Scales ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    Major,
    Minor,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
}

impl ScaleType {
    pub const ALL: [ScaleType; 5] = [
        ScaleType::Major,
        ScaleType::Minor,
        ScaleType::PentatonicMajor,
        ScaleType::PentatonicMinor,
        ScaleType::Blues,
    ];

    pub fn intervals(self) -> &'static [i32] {
        match self {
            ScaleType::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleType::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleType::PentatonicMajor => &[0, 2, 4, 7, 9],
            ScaleType::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleType::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    pub fn spelling(self) -> Spelling {
        match self {
            ScaleType::Major | ScaleType::PentatonicMajor => Spelling::Sharps,
            ScaleType::Minor | ScaleType::PentatonicMinor | ScaleType::Blues => Spelling::Flats,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScaleType::Major => "Major (Ionian)",
            ScaleType::Minor => "Natural minor (Aeolian)",
            ScaleType::PentatonicMajor => "Major pentatonic",
            ScaleType::PentatonicMinor => "Minor pentatonic",
            ScaleType::Blues => "Blues",
        }
    }
}

impl FromStr for ScaleType {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "major" | "ionian" => Ok(ScaleType::Major),
            "minor" | "aeolian" => Ok(ScaleType::Minor),
            "pentatonic_major" => Ok(ScaleType::PentatonicMajor),
            "pentatonic_minor" => Ok(ScaleType::PentatonicMinor),
            "blues" => Ok(ScaleType::Blues),
            _ => Err(ParseError::new("scale type", input)),
        }
    }
}

pub fn scale_notes(root: NoteName, scale: ScaleType) -> Vec<NoteName> {
    let root_pc = root.pitch_class() as i32;
    scale
        .intervals()
        .iter()
        .map(|&i| NoteName::from_pitch_class(root_pc + i, scale.spelling()))
        .collect()
}

// --- Chords ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    #[serde(rename = "maj")]
    Major,
    #[serde(rename = "min")]
    Minor,
    #[serde(rename = "dim")]
    Diminished,
    #[serde(rename = "aug")]
    Augmented,
    #[serde(rename = "sus2")]
    Sus2,
    #[serde(rename = "sus4")]
    Sus4,
    #[serde(rename = "6")]
    Sixth,
    #[serde(rename = "7")]
    Dominant7,
    #[serde(rename = "maj7")]
    Major7,
    #[serde(rename = "m7")]
    Minor7,
    #[serde(rename = "9")]
    Dominant9,
    #[serde(rename = "m9")]
    Minor9,
    #[serde(rename = "11")]
    Eleventh,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 13] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::Sus2,
        ChordQuality::Sus4,
        ChordQuality::Sixth,
        ChordQuality::Dominant7,
        ChordQuality::Major7,
        ChordQuality::Minor7,
        ChordQuality::Dominant9,
        ChordQuality::Minor9,
        ChordQuality::Eleventh,
    ];

    pub fn intervals(self) -> &'static [i32] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::Sus2 => &[0, 2, 7],
            ChordQuality::Sus4 => &[0, 5, 7],
            ChordQuality::Sixth => &[0, 4, 7, 9],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::Dominant9 => &[0, 4, 7, 10, 14],
            ChordQuality::Minor9 => &[0, 3, 7, 10, 14],
            ChordQuality::Eleventh => &[0, 4, 7, 10, 14, 17],
        }
    }

    pub fn spelling(self) -> Spelling {
        match self {
            ChordQuality::Major
            | ChordQuality::Augmented
            | ChordQuality::Sus2
            | ChordQuality::Sus4
            | ChordQuality::Sixth
            | ChordQuality::Major7 => Spelling::Sharps,
            _ => Spelling::Flats,
        }
    }

    /// Suffix appended to the root in chord symbols ("" for major).
    pub fn symbol(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "+",
            ChordQuality::Sus2 => "sus2",
            ChordQuality::Sus4 => "sus4",
            ChordQuality::Sixth => "6",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::Dominant9 => "9",
            ChordQuality::Minor9 => "m9",
            ChordQuality::Eleventh => "11",
        }
    }

    /// Frets per string [G, C, E, A] of the C-rooted shape; -1 mutes.
    ///
    /// Four strings cannot hold the full 9 and 11 stacks, so those are
    /// common partial voicings.
    fn base_shape_in_c(self) -> [i8; 4] {
        match self {
            ChordQuality::Major => [0, 0, 0, 3],
            ChordQuality::Minor => [0, 3, 3, 3],
            ChordQuality::Diminished => [2, 3, 2, 3],
            ChordQuality::Augmented => [1, 0, 0, 3],
            ChordQuality::Sus2 => [0, 2, 3, 3],
            ChordQuality::Sus4 => [0, 0, 1, 3],
            ChordQuality::Sixth => [0, 0, 0, 0],
            ChordQuality::Dominant7 => [0, 0, 0, 1],
            ChordQuality::Major7 => [0, 0, 0, 2],
            ChordQuality::Minor7 => [3, 3, 3, 3],
            ChordQuality::Dominant9 => [0, 2, 0, 1],
            ChordQuality::Minor9 => [3, 3, 3, 5],
            ChordQuality::Eleventh => [0, 0, 1, 1],
        }
    }
}

impl FromStr for ChordQuality {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let quality = match input.trim() {
            "" | "maj" | "major" => ChordQuality::Major,
            "m" | "min" | "minor" => ChordQuality::Minor,
            "dim" => ChordQuality::Diminished,
            "aug" | "+" => ChordQuality::Augmented,
            "sus2" => ChordQuality::Sus2,
            "sus4" | "sus" => ChordQuality::Sus4,
            "6" => ChordQuality::Sixth,
            "7" => ChordQuality::Dominant7,
            "maj7" => ChordQuality::Major7,
            "m7" | "min7" => ChordQuality::Minor7,
            "9" => ChordQuality::Dominant9,
            "m9" | "min9" => ChordQuality::Minor9,
            "11" => ChordQuality::Eleventh,
            _ => return Err(ParseError::new("chord quality", input)),
        };
        Ok(quality)
    }
}

/// The distinct notes of a chord, root first.
pub fn chord_notes(root: NoteName, quality: ChordQuality) -> Vec<NoteName> {
    let root_pc = root.pitch_class() as i32;
    let mut seen = [false; 12];
    let mut notes = Vec::with_capacity(quality.intervals().len());
    for &interval in quality.intervals() {
        let pc = (root_pc + interval).rem_euclid(12);
        if !seen[pc as usize] {
            seen[pc as usize] = true;
            notes.push(NoteName::from_pitch_class(pc, quality.spelling()));
        }
    }
    notes
}

/// A fingering on a GCEA ukulele.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UkuleleVoicing {
    /// Fret per string [G, C, E, A]; -1 means muted.
    pub frets: [i8; 4],
    pub label: String,
}

pub fn chord_voicings(root: NoteName, quality: ChordQuality) -> Vec<UkuleleVoicing> {
    let semitones = pc_distance_up(NoteName::C.pitch_class(), root.pitch_class()) as i8;
    let transposed = quality
        .base_shape_in_c()
        .map(|f| if f >= 0 { f + semitones } else { -1 });
    vec![UkuleleVoicing {
        frets: normalize_to_low_position(transposed),
        label: format!("{}{}", root, quality.symbol()),
    }]
}

/// Moves a shape down an octave when its lowest played fret is above 4.
fn normalize_to_low_position(frets: [i8; 4]) -> [i8; 4] {
    let lowest = frets.iter().copied().filter(|&f| f >= 0).min().unwrap_or(0);
    if lowest <= 4 {
        return frets;
    }
    let shifted = frets.map(|f| if f >= 0 { f - 12 } else { -1 });
    // Shifting is only valid when every played fret stays on the neck.
    if frets.iter().zip(shifted.iter()).all(|(&f, &s)| f < 0 || s >= 0) {
        shifted
    } else {
        frets
    }
}

// --- Fretboard ---

/// Open-string notes from the top (G) string down to the A string.
pub type UkuleleTuning = [NoteName; 4];

pub const STANDARD_UKULELE_TUNING: UkuleleTuning = [NoteName::G, NoteName::C, NoteName::E, NoteName::A];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FretboardCell {
    /// 0..3, G string first.
    pub string_index: usize,
    pub fret: u8,
    pub note: NoteName,
    pub pitch_class: u8,
}

/// Every (string, fret) cell from the nut up to `frets` inclusive.
pub fn build_fretboard(tuning: &UkuleleTuning, frets: u8, spelling: Spelling) -> Vec<FretboardCell> {
    let mut cells = Vec::with_capacity(tuning.len() * (frets as usize + 1));
    for (string_index, open) in tuning.iter().enumerate() {
        for fret in 0..=frets {
            let note = open.transpose(fret as i32, spelling);
            cells.push(FretboardCell {
                string_index,
                fret,
                note,
                pitch_class: note.pitch_class(),
            });
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_names_leniently() {
        assert_eq!("c".parse::<NoteName>(), Ok(NoteName::C));
        assert_eq!(" eb ".parse::<NoteName>(), Ok(NoteName::EFlat));
        assert_eq!("Bb".parse::<NoteName>(), Ok(NoteName::BFlat));
        assert_eq!("F♯".parse::<NoteName>(), Ok(NoteName::FSharp));
        assert_eq!("A♭".parse::<NoteName>(), Ok(NoteName::AFlat));
        assert!("H".parse::<NoteName>().is_err());
        assert!("Cb".parse::<NoteName>().is_err());
    }

    #[test]
    fn test_enharmonics_share_pitch_class() {
        assert_eq!(NoteName::CSharp.pitch_class(), NoteName::DFlat.pitch_class());
        assert_eq!(NoteName::ASharp.pitch_class(), 10);
        assert_eq!(NoteName::B.pitch_class(), 11);
    }

    #[test]
    fn test_spelling_tables_round_trip() {
        for pc in 0..12 {
            assert_eq!(NoteName::from_pitch_class(pc, Spelling::Sharps).pitch_class() as i32, pc);
            assert_eq!(NoteName::from_pitch_class(pc, Spelling::Flats).pitch_class() as i32, pc);
        }
        assert_eq!(NoteName::from_pitch_class(-1, Spelling::Flats), NoteName::B);
        assert_eq!(NoteName::from_pitch_class(13, Spelling::Flats), NoteName::DFlat);
    }

    #[test]
    fn test_transpose_wraps_and_respells() {
        assert_eq!(NoteName::A.transpose(3, Spelling::Sharps), NoteName::C);
        assert_eq!(NoteName::C.transpose(-2, Spelling::Flats), NoteName::BFlat);
        assert_eq!(NoteName::C.transpose(-2, Spelling::Sharps), NoteName::ASharp);
    }

    #[test]
    fn test_pc_distance_up() {
        assert_eq!(pc_distance_up(0, 7), 7);
        assert_eq!(pc_distance_up(9, 0), 3);
        assert_eq!(pc_distance_up(4, 4), 0);
    }

    #[test]
    fn test_scale_notes() {
        assert_eq!(
            scale_notes(NoteName::C, ScaleType::Major),
            vec![
                NoteName::C,
                NoteName::D,
                NoteName::E,
                NoteName::F,
                NoteName::G,
                NoteName::A,
                NoteName::B
            ]
        );
        assert_eq!(
            scale_notes(NoteName::A, ScaleType::Blues),
            vec![
                NoteName::A,
                NoteName::C,
                NoteName::D,
                NoteName::EFlat,
                NoteName::E,
                NoteName::G
            ]
        );
    }

    #[test]
    fn test_chord_notes_deduplicate_extensions() {
        assert_eq!(
            chord_notes(NoteName::G, ChordQuality::Dominant7),
            vec![NoteName::G, NoteName::B, NoteName::D, NoteName::F]
        );
        // 9 and 11 land on pitch classes 2 and 5 above C, distinct from the triad.
        let eleventh = chord_notes(NoteName::C, ChordQuality::Eleventh);
        assert_eq!(eleventh.len(), 6);
        assert_eq!(eleventh[4], NoteName::D);
        assert_eq!(eleventh[5], NoteName::F);
    }

    #[test]
    fn test_chord_voicings_transpose_from_c() {
        let c = chord_voicings(NoteName::C, ChordQuality::Major);
        assert_eq!(c[0].frets, [0, 0, 0, 3]);
        assert_eq!(c[0].label, "C");

        let d = chord_voicings(NoteName::D, ChordQuality::Major);
        assert_eq!(d[0].frets, [2, 2, 2, 5]);

        let am = chord_voicings(NoteName::A, ChordQuality::Minor);
        assert_eq!(am[0].label, "Am");
        assert_eq!(am[0].frets, [9, 12, 12, 12]);
    }

    #[test]
    fn test_high_shapes_drop_an_octave_only_when_possible() {
        assert_eq!(normalize_to_low_position([14, 13, 14, 15]), [2, 1, 2, 3]);
        assert_eq!(normalize_to_low_position([5, 12, 12, 12]), [5, 12, 12, 12]);
        assert_eq!(normalize_to_low_position([-1, 14, 14, 14]), [-1, 2, 2, 2]);
    }

    #[test]
    fn test_build_fretboard() {
        let cells = build_fretboard(&STANDARD_UKULELE_TUNING, 12, Spelling::Sharps);
        assert_eq!(cells.len(), 4 * 13);

        let a_string_fifth = cells
            .iter()
            .find(|c| c.string_index == 3 && c.fret == 5)
            .unwrap();
        assert_eq!(a_string_fifth.note, NoteName::D);
        assert_eq!(a_string_fifth.pitch_class, 2);

        let g_string_octave = cells
            .iter()
            .find(|c| c.string_index == 0 && c.fret == 12)
            .unwrap();
        assert_eq!(g_string_octave.note, NoteName::G);
    }

    #[test]
    fn test_parse_scale_and_chord_terms() {
        assert_eq!("pentatonic-minor".parse::<ScaleType>(), Ok(ScaleType::PentatonicMinor));
        assert_eq!("m7".parse::<ChordQuality>(), Ok(ChordQuality::Minor7));
        let err = "lydian".parse::<ScaleType>().unwrap_err();
        assert_eq!(err.to_string(), "unrecognized scale type: \"lydian\"");
    }
}
