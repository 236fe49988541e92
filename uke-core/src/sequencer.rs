//! Step sequencer: one bar of 16th notes over a set of note names.
//!
//! Each step is either silent or plays its note as a short tone in the
//! reference octave. Steps, tempo and volume are read at every scheduled
//! step, so edits take effect the next time the playhead reaches them.

use crate::engine::{AudioEngine, Sound};
use crate::lock;
use crate::metronome::clamp_volume;
use crate::notify::Subscribers;
use crate::scheduler::{LookaheadConfig, LookaheadScheduler, SchedulePolicy, SchedulerEvent, TransportStatus, round_clamped};
use crate::theory::{NoteName, pc_distance_up};
use crate::tuning::midi_to_frequency;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_BPM: u32 = 40;
pub const MAX_BPM: u32 = 220;

/// Longest tone a step may play, in seconds.
const MAX_NOTE_SECONDS: f64 = 0.18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerSettings {
    /// Steps per loop; 16 is one bar of 16th notes.
    pub steps: usize,
    /// Quarter-note tempo, 40 to 220.
    pub bpm: u32,
    pub volume: f32,
    /// Octave every step note is played in (4 puts C on middle C).
    pub reference_octave: i32,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            steps: 16,
            bpm: 110,
            volume: 0.65,
            reference_octave: 4,
        }
    }
}

impl SequencerSettings {
    pub fn clamped(self) -> Self {
        Self {
            steps: self.steps.max(1),
            bpm: self.bpm.clamp(MIN_BPM, MAX_BPM),
            volume: clamp_volume(self.volume),
            reference_octave: self.reference_octave,
        }
    }

    /// Seconds per 16th-note step.
    pub fn step_period(&self) -> f64 {
        60.0 / f64::from(self.bpm.max(30)) / 4.0
    }

    /// Tone length for one step, kept short enough not to overlap the next.
    pub fn note_duration(&self) -> f64 {
        MAX_NOTE_SECONDS.min(self.step_period() * 0.9)
    }

    /// Frequency of `note` in the reference octave.
    pub fn note_frequency(&self, note: NoteName) -> f32 {
        let midi = 12 * (self.reference_octave + 1) + i32::from(note.pitch_class());
        midi_to_frequency(midi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub on: bool,
    pub note: NoteName,
}

/// A partial update to a [`Step`]; `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepPatch {
    pub on: Option<bool>,
    pub note: Option<NoteName>,
}

impl StepPatch {
    pub fn toggle(on: bool) -> Self {
        Self { on: Some(on), note: None }
    }

    pub fn note(note: NoteName) -> Self {
        Self { on: None, note: Some(note) }
    }

    fn apply(self, step: &mut Step) {
        if let Some(on) = self.on {
            step.on = on;
        }
        if let Some(note) = self.note {
            step.note = note;
        }
    }
}

/// The playhead reaching a step, published for step indicators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayheadEvent {
    /// Step index in `0..steps`.
    pub step: usize,
    pub when: f64,
    /// The note sounded, if the step was on.
    pub note: Option<NoteName>,
}

/// Removes repeated names keeping first occurrences; an empty set becomes
/// the root alone.
fn normalize_note_set(notes: &[NoteName], root: NoteName) -> Vec<NoteName> {
    let mut unique: Vec<NoteName> = Vec::with_capacity(notes.len());
    for &note in notes {
        if !unique.contains(&note) {
            unique.push(note);
        }
    }
    if unique.is_empty() {
        unique.push(root);
    }
    unique
}

/// The default groove: every third 16th of each group of four is silent,
/// notes cycle upward from the root.
pub fn default_steps(count: usize, note_set: &[NoteName], root: NoteName) -> Vec<Step> {
    let root_pc = root.pitch_class();
    let mut ordered = normalize_note_set(note_set, root);
    ordered.sort_by_key(|note| pc_distance_up(root_pc, note.pitch_class()));

    (0..count)
        .map(|i| Step {
            on: i % 4 != 2,
            note: ordered[i % ordered.len()],
        })
        .collect()
}

struct SequencerPolicy {
    settings: SequencerSettings,
    note_set: Vec<NoteName>,
    root: NoteName,
    steps: Vec<Step>,
    playhead: usize,
    subscribers: Subscribers<PlayheadEvent>,
}

impl SequencerPolicy {
    fn new(settings: SequencerSettings, note_set: &[NoteName], root: NoteName) -> Self {
        let mut policy = Self {
            settings: settings.clamped(),
            note_set: Vec::new(),
            root,
            steps: Vec::new(),
            playhead: 0,
            subscribers: Subscribers::new(),
        };
        policy.set_note_set(note_set, root);
        policy
    }

    fn set_note_set(&mut self, notes: &[NoteName], root: NoteName) {
        self.note_set = normalize_note_set(notes, root);
        self.root = root;
        self.init_steps();
    }

    fn init_steps(&mut self) {
        self.steps = default_steps(self.settings.steps, &self.note_set, self.root);
    }
}

impl SchedulePolicy for SequencerPolicy {
    fn period(&self) -> f64 {
        self.settings.step_period()
    }

    fn on_start(&mut self) {
        self.playhead = 0;
    }

    fn on_stop(&mut self) {
        self.playhead = 0;
    }

    fn on_event(&mut self, event: SchedulerEvent, engine: &dyn AudioEngine) {
        if self.steps.is_empty() {
            return;
        }
        let index = (event.index % self.steps.len() as u64) as usize;
        let step = self.steps[index];

        let note = if step.on {
            engine.schedule(
                event.when,
                Sound::Tone {
                    frequency: self.settings.note_frequency(step.note),
                    duration: self.settings.note_duration() as f32,
                    volume: self.settings.volume,
                },
            );
            Some(step.note)
        } else {
            None
        };

        debug!("[SEQUENCER] Step {} at {:.3}s: {:?}", index, event.when, note);
        self.playhead = index;
        self.subscribers.publish(&PlayheadEvent {
            step: index,
            when: event.when,
            note,
        });
    }
}

pub struct Sequencer {
    scheduler: LookaheadScheduler<SequencerPolicy>,
}

impl Sequencer {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        settings: SequencerSettings,
        config: LookaheadConfig,
        note_set: &[NoteName],
        root: NoteName,
    ) -> Self {
        Self {
            scheduler: LookaheadScheduler::new(engine, SequencerPolicy::new(settings, note_set, root), config),
        }
    }

    /// Replaces the active notes and resets the pattern to the default groove.
    pub fn set_note_set(&self, notes: &[NoteName], root: NoteName) {
        lock(self.scheduler.policy()).set_note_set(notes, root);
    }

    pub fn note_set(&self) -> Vec<NoteName> {
        lock(self.scheduler.policy()).note_set.clone()
    }

    pub fn init_steps(&self) {
        lock(self.scheduler.policy()).init_steps();
    }

    pub fn steps(&self) -> Vec<Step> {
        lock(self.scheduler.policy()).steps.clone()
    }

    /// Edits one step. Out-of-range indices are ignored.
    pub fn set_step(&self, index: usize, patch: StepPatch) {
        let mut policy = lock(self.scheduler.policy());
        match policy.steps.get_mut(index) {
            Some(step) => patch.apply(step),
            None => warn!("[SEQUENCER] Ignoring edit of step {} (pattern has {})", index, policy.steps.len()),
        }
    }

    /// Rounded and clamped to 40..=220.
    pub fn set_bpm(&self, bpm: f64) {
        lock(self.scheduler.policy()).settings.bpm = round_clamped(bpm, MIN_BPM, MAX_BPM);
    }

    pub fn set_volume(&self, volume: f32) {
        lock(self.scheduler.policy()).settings.volume = clamp_volume(volume);
    }

    pub fn settings(&self) -> SequencerSettings {
        lock(self.scheduler.policy()).settings
    }

    pub fn start(&mut self) {
        if self.scheduler.is_running() {
            return;
        }
        info!("[SEQUENCER] Starting at {} bpm", self.settings().bpm);
        self.scheduler.start();
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn toggle(&mut self) -> TransportStatus {
        match self.status() {
            TransportStatus::Running => self.stop(),
            TransportStatus::Stopped => self.start(),
        }
        self.status()
    }

    pub fn status(&self) -> TransportStatus {
        self.scheduler.status()
    }

    /// The tones the next `seconds` of playback would schedule, computed
    /// offline without touching a device.
    pub fn simulate(&self, seconds: f64) -> Vec<(f64, Sound)> {
        self.scheduler.simulate(seconds)
    }

    /// Step most recently scheduled; 0 while stopped.
    pub fn playhead(&self) -> usize {
        lock(self.scheduler.policy()).playhead
    }

    pub fn subscribe(&self) -> Receiver<PlayheadEvent> {
        lock(self.scheduler.policy()).subscribers.subscribe()
    }
}
