//! # uke - ukulele studio in the terminal
//!
//! Tuner, metronome and step sequencer on the default audio devices, plus
//! chord and scale lookups.
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` (or `debug`) to
//! see device and scheduler activity.

mod config;
mod display;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uke_core::audio::CpalCapture;
use uke_core::engine::AudioEngine;
use uke_core::metronome::Metronome;
use uke_core::output::CpalOutput;
use uke_core::sequencer::Sequencer;
use uke_core::theory::{
    ChordQuality, NoteName, STANDARD_UKULELE_TUNING, ScaleType, build_fretboard, chord_notes, chord_voicings,
    scale_notes,
};
use uke_core::tracker::PitchTracker;
use uke_core::tuning::{TuningTarget, UkuleleString};
use uke_core::{StudioConfig, engine::ManualEngine};

/// How often the tuner prints at most, so the terminal stays readable.
const TUNER_PRINT_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Parser)]
#[command(name = "uke")]
#[command(author, version, about = "Ukulele practice studio", long_about = None)]
struct Cli {
    /// JSON studio configuration; missing fields use defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on the microphone and show the detected pitch
    Tune {
        /// Tune against one open string (G, C, E or A) instead of the nearest note
        #[arg(short, long)]
        string: Option<UkuleleString>,

        /// How long to listen
        #[arg(long, default_value = "30")]
        seconds: f64,
    },

    /// Play a click track
    Metronome {
        /// Tempo, 30-240
        #[arg(short, long)]
        bpm: Option<f64>,

        /// Beats per bar, 1-12
        #[arg(long)]
        beats: Option<f64>,

        /// Click volume, 0.0-1.0
        #[arg(long)]
        volume: Option<f32>,

        /// How long to play
        #[arg(long, default_value = "10")]
        seconds: f64,

        /// Print the schedule instead of opening an audio device
        #[arg(long)]
        dry_run: bool,
    },

    /// Loop the default groove over the notes of a scale
    Sequence {
        #[arg(short, long, default_value = "C")]
        root: NoteName,

        /// major, minor, pentatonic_major, pentatonic_minor or blues
        #[arg(short, long, default_value = "major")]
        scale: ScaleType,

        /// Tempo, 40-220
        #[arg(short, long)]
        bpm: Option<f64>,

        #[arg(long)]
        volume: Option<f32>,

        #[arg(long, default_value = "10")]
        seconds: f64,

        /// Print the schedule instead of opening an audio device
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the notes and a ukulele shape for a chord
    Chord {
        #[arg(short, long, default_value = "C")]
        root: NoteName,

        /// maj, min, dim, aug, sus2, sus4, 6, 7, maj7, m7, 9, m9 or 11
        #[arg(short, long, default_value = "maj")]
        quality: ChordQuality,
    },

    /// Show the notes of a scale across the fretboard
    Scale {
        #[arg(short, long, default_value = "C")]
        root: NoteName,

        #[arg(short, long, default_value = "major")]
        scale: ScaleType,

        /// Highest fret shown
        #[arg(long, default_value = "12")]
        frets: u8,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Tune { string, seconds } => tune(&config, string, seconds),
        Commands::Metronome {
            bpm,
            beats,
            volume,
            seconds,
            dry_run,
        } => metronome(&config, bpm, beats, volume, seconds, dry_run),
        Commands::Sequence {
            root,
            scale,
            bpm,
            volume,
            seconds,
            dry_run,
        } => sequence(&config, root, scale, bpm, volume, seconds, dry_run),
        Commands::Chord { root, quality } => {
            chord(root, quality);
            Ok(())
        }
        Commands::Scale { root, scale, frets } => {
            scale_view(root, scale, frets);
            Ok(())
        }
    }
}

fn tune(config: &StudioConfig, string: Option<UkuleleString>, seconds: f64) -> Result<()> {
    let target = string.map_or(TuningTarget::Chromatic, TuningTarget::String);
    let mut tracker = PitchTracker::new(CpalCapture, config.tracker);
    let readings = tracker.subscribe();
    tracker.start().context("starting the microphone")?;

    match string {
        Some(string) => println!("Tuning the {string} string ({:.2} Hz). Play it now.", string.frequency()),
        None => println!("Chromatic tuner. Play any string."),
    }

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut last_print: Option<Instant> = None;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(reading) = readings.recv_timeout(remaining) else {
            break;
        };
        let Some(frequency) = reading.frequency else {
            continue;
        };
        if last_print.is_some_and(|at| at.elapsed() < TUNER_PRINT_INTERVAL) {
            continue;
        }
        last_print = Some(Instant::now());
        let (label, _, cents) = target.deviation(frequency);
        println!("{}", display::tuner_line(&label, frequency, cents, reading.probability));
    }

    tracker.stop();
    Ok(())
}

fn metronome(
    config: &StudioConfig,
    bpm: Option<f64>,
    beats: Option<f64>,
    volume: Option<f32>,
    seconds: f64,
    dry_run: bool,
) -> Result<()> {
    let (engine, output) = open_engine(dry_run)?;
    let mut metronome = Metronome::new(engine, config.metronome, config.scheduler);
    if let Some(bpm) = bpm {
        metronome.set_bpm(bpm);
    }
    if let Some(beats) = beats {
        metronome.set_beats_per_bar(beats);
    }
    if let Some(volume) = volume {
        metronome.set_volume(volume);
    }
    let settings = metronome.settings();
    println!("{} bpm, {} beats per bar", settings.bpm, settings.beats_per_bar);

    if dry_run {
        for (when, sound) in metronome.simulate(seconds) {
            println!("{}", display::sound_line(when, &sound));
        }
        return Ok(());
    }

    let ticks = metronome.subscribe();
    metronome.start();
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while let Ok(tick) = ticks.recv_deadline(deadline) {
        let marks: String = (0..tick.beats_per_bar)
            .map(|i| if i == tick.beat_index { 'O' } else { '.' })
            .collect();
        println!("{marks}  {}/{}", tick.beat_index + 1, tick.beats_per_bar);
    }
    metronome.stop();
    drop(output);
    Ok(())
}

fn sequence(
    config: &StudioConfig,
    root: NoteName,
    scale: ScaleType,
    bpm: Option<f64>,
    volume: Option<f32>,
    seconds: f64,
    dry_run: bool,
) -> Result<()> {
    let notes = scale_notes(root, scale);
    let (engine, output) = open_engine(dry_run)?;
    let mut sequencer = Sequencer::new(engine, config.sequencer, config.scheduler, &notes, root);
    if let Some(bpm) = bpm {
        sequencer.set_bpm(bpm);
    }
    if let Some(volume) = volume {
        sequencer.set_volume(volume);
    }

    let pattern: Vec<String> = sequencer
        .steps()
        .iter()
        .map(|step| if step.on { step.note.to_string() } else { "-".to_string() })
        .collect();
    println!("{} {} at {} bpm: {}", root, scale.label(), sequencer.settings().bpm, pattern.join(" "));

    if dry_run {
        for (when, sound) in sequencer.simulate(seconds) {
            println!("{}", display::sound_line(when, &sound));
        }
        return Ok(());
    }

    let playheads = sequencer.subscribe();
    sequencer.start();
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while let Ok(event) = playheads.recv_deadline(deadline) {
        match event.note {
            Some(note) => println!("{:>2} {note}", event.step + 1),
            None => println!("{:>2}", event.step + 1),
        }
    }
    sequencer.stop();
    drop(output);
    Ok(())
}

/// The engine the schedulers run against, and the stream keeping it alive.
fn open_engine(dry_run: bool) -> Result<(Arc<dyn AudioEngine>, Option<CpalOutput>)> {
    if dry_run {
        return Ok((Arc::new(ManualEngine::new()), None));
    }
    let output = CpalOutput::open().context("opening the audio output")?;
    Ok((Arc::new(output.engine()), Some(output)))
}

fn chord(root: NoteName, quality: ChordQuality) {
    let notes: Vec<String> = chord_notes(root, quality).iter().map(ToString::to_string).collect();
    println!("{}{}: {}", root, quality.symbol(), notes.join(" "));
    for voicing in chord_voicings(root, quality) {
        println!("  {:<8} G C E A: {}", voicing.label, display::frets_line(&voicing.frets));
    }
}

fn scale_view(root: NoteName, scale: ScaleType, frets: u8) {
    let notes = scale_notes(root, scale);
    let names: Vec<String> = notes.iter().map(ToString::to_string).collect();
    println!("{} {}: {}", root, scale.label(), names.join(" "));

    let cells = build_fretboard(&STANDARD_UKULELE_TUNING, frets, scale.spelling());
    let labels = ["A", "E", "C", "G"];
    for (label, row) in labels.iter().zip(display::fretboard_rows(&cells, &notes)) {
        println!("{label} |{row}|");
    }
}
