//! Terminal rendering for tuner readings and schedules.

use uke_core::engine::Sound;
use uke_core::theory::{FretboardCell, NoteName};
use uke_core::tuning::{IN_TUNE_CENTS, is_in_tune};

/// Half-width of the cents gauge, in characters.
const GAUGE_HALF_WIDTH: i32 = 10;
/// Cents represented by the full half-width.
const GAUGE_RANGE_CENTS: f32 = 50.0;

/// A needle on a ±50 cent scale, `|` marking the target.
pub fn gauge(cents: f32) -> String {
    let clamped = cents.clamp(-GAUGE_RANGE_CENTS, GAUGE_RANGE_CENTS);
    let offset = (clamped / GAUGE_RANGE_CENTS * GAUGE_HALF_WIDTH as f32).round() as i32;
    (-GAUGE_HALF_WIDTH..=GAUGE_HALF_WIDTH)
        .map(|i| match i {
            _ if i == offset => '*',
            0 => '|',
            _ => '-',
        })
        .collect()
}

pub fn tuner_line(label: &str, frequency: f32, cents: f32, probability: f32) -> String {
    let verdict = if is_in_tune(cents) {
        "in tune".to_string()
    } else if cents < 0.0 {
        format!("flat (tighten, within ±{IN_TUNE_CENTS} to pass)")
    } else {
        format!("sharp (loosen, within ±{IN_TUNE_CENTS} to pass)")
    };
    format!(
        "{label:>4} {frequency:>8.2} Hz {cents:>+6.1} ct [{}] p={probability:.2} {verdict}",
        gauge(cents)
    )
}

pub fn sound_line(when: f64, sound: &Sound) -> String {
    match sound {
        Sound::Click { accent: true, volume } => format!("{when:>8.3}s  CLICK  vol {volume:.2}"),
        Sound::Click { accent: false, volume } => format!("{when:>8.3}s  click  vol {volume:.2}"),
        Sound::Tone {
            frequency,
            duration,
            volume,
        } => format!("{when:>8.3}s  tone {frequency:>7.2} Hz for {:.0} ms vol {volume:.2}", duration * 1000.0),
    }
}

/// Chord frets as the usual `GCEA` string, `x` for a muted string.
pub fn frets_line(frets: &[i8; 4]) -> String {
    frets
        .iter()
        .map(|&f| if f < 0 { "x".to_string() } else { f.to_string() })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One row per string, A on top as on a tab, marking notes of `notes`.
pub fn fretboard_rows(cells: &[FretboardCell], notes: &[NoteName]) -> Vec<String> {
    let pitch_classes: Vec<u8> = notes.iter().map(|n| n.pitch_class()).collect();
    let strings = cells.iter().map(|c| c.string_index).max().map_or(0, |m| m + 1);

    (0..strings)
        .rev()
        .map(|string| {
            let row: Vec<String> = cells
                .iter()
                .filter(|c| c.string_index == string)
                .map(|c| {
                    if pitch_classes.contains(&c.pitch_class) {
                        format!("{:^4}", c.note.as_str())
                    } else {
                        " -- ".to_string()
                    }
                })
                .collect();
            row.join("|")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uke_core::theory::{STANDARD_UKULELE_TUNING, Spelling, build_fretboard};

    #[test]
    fn test_gauge_needle_position() {
        assert_eq!(gauge(0.0), "----------*----------");
        assert_eq!(gauge(-50.0), "*---------|----------");
        assert_eq!(gauge(200.0), "----------|---------*");
        assert_eq!(gauge(10.0).find('*'), Some(12));
    }

    #[test]
    fn test_tuner_line_verdicts() {
        assert!(tuner_line("A4", 440.0, 1.0, 0.95).ends_with("in tune"));
        assert!(tuner_line("A4", 430.0, -39.8, 0.95).contains("flat"));
        assert!(tuner_line("G4", 400.0, 35.0, 0.95).contains("sharp"));
    }

    #[test]
    fn test_frets_line() {
        assert_eq!(frets_line(&[0, 0, 0, 3]), "0 0 0 3");
        assert_eq!(frets_line(&[-1, 2, 2, 2]), "x 2 2 2");
    }

    #[test]
    fn test_fretboard_rows_mark_scale_notes() {
        let cells = build_fretboard(&STANDARD_UKULELE_TUNING, 2, Spelling::Sharps);
        let rows = fretboard_rows(&cells, &[NoteName::A, NoteName::C]);
        assert_eq!(rows.len(), 4);
        // Top row is the A string: A, A#, B.
        assert!(rows[0].starts_with(" A  | -- "));
        // Bottom row is the G string: G, G#, A.
        assert!(rows[3].ends_with(" A  "));
    }
}
