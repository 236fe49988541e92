//! Metronome: an accented click on the first beat of every bar.
//!
//! A thin [`SchedulePolicy`] over the lookahead loop. Tempo, meter and volume
//! may be changed while running; each change applies from the next beat.

use crate::engine::{AudioEngine, Sound};
use crate::lock;
use crate::notify::Subscribers;
use crate::scheduler::{LookaheadConfig, LookaheadScheduler, SchedulePolicy, SchedulerEvent, TransportStatus, round_clamped};
use crossbeam_channel::Receiver;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_BPM: u32 = 30;
pub const MAX_BPM: u32 = 240;
pub const MAX_BEATS_PER_BAR: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    /// Beats per minute, 30 to 240.
    pub bpm: u32,
    /// 1 to 12.
    pub beats_per_bar: u32,
    /// Click gain, 0 to 1.
    pub volume: f32,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            bpm: 80,
            beats_per_bar: 4,
            volume: 0.7,
        }
    }
}

impl MetronomeSettings {
    /// The same settings forced into their valid ranges.
    pub fn clamped(self) -> Self {
        Self {
            bpm: self.bpm.clamp(MIN_BPM, MAX_BPM),
            beats_per_bar: self.beats_per_bar.clamp(1, MAX_BEATS_PER_BAR),
            volume: clamp_volume(self.volume),
        }
    }

    /// Seconds per beat.
    pub fn period(&self) -> f64 {
        60.0 / f64::from(self.bpm.max(1))
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) }
}

/// One scheduled beat, published for beat indicators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetronomeTick {
    /// `0..beats_per_bar`; 0 is the accented downbeat.
    pub beat_index: u32,
    pub beats_per_bar: u32,
    /// Audio clock time the click sounds at.
    pub when: f64,
}

struct MetronomePolicy {
    settings: MetronomeSettings,
    current_beat: u32,
    last_tick: Option<MetronomeTick>,
    subscribers: Subscribers<MetronomeTick>,
}

impl MetronomePolicy {
    fn new(settings: MetronomeSettings) -> Self {
        Self {
            settings: settings.clamped(),
            current_beat: 0,
            last_tick: None,
            subscribers: Subscribers::new(),
        }
    }
}

impl SchedulePolicy for MetronomePolicy {
    fn period(&self) -> f64 {
        self.settings.period()
    }

    fn on_start(&mut self) {
        self.current_beat = 0;
    }

    fn on_stop(&mut self) {
        self.current_beat = 0;
        self.last_tick = None;
    }

    fn on_event(&mut self, event: SchedulerEvent, engine: &dyn AudioEngine) {
        let beats_per_bar = self.settings.beats_per_bar.max(1);
        let beat_index = self.current_beat;

        engine.schedule(
            event.when,
            Sound::Click {
                accent: beat_index == 0,
                volume: self.settings.volume,
            },
        );

        let tick = MetronomeTick {
            beat_index,
            beats_per_bar,
            when: event.when,
        };
        debug!("[METRONOME] Beat {}/{} at {:.3}s", beat_index + 1, beats_per_bar, event.when);
        self.last_tick = Some(tick);
        self.subscribers.publish(&tick);
        self.current_beat = (beat_index + 1) % beats_per_bar;
    }
}

pub struct Metronome {
    scheduler: LookaheadScheduler<MetronomePolicy>,
}

impl Metronome {
    pub fn new(engine: Arc<dyn AudioEngine>, settings: MetronomeSettings, config: LookaheadConfig) -> Self {
        Self {
            scheduler: LookaheadScheduler::new(engine, MetronomePolicy::new(settings), config),
        }
    }

    /// Starts clicking 50 ms from now on the accented downbeat.
    pub fn start(&mut self) {
        if self.scheduler.is_running() {
            return;
        }
        let settings = self.settings();
        info!(
            "[METRONOME] Starting at {} bpm, {} beats per bar",
            settings.bpm, settings.beats_per_bar
        );
        self.scheduler.start();
    }

    /// Stops scheduling; clicks already handed to the engine still sound.
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

    /// The clicks the next `seconds` of playback would schedule, computed
    /// offline without touching a device.
    pub fn simulate(&self, seconds: f64) -> Vec<(f64, Sound)> {
        self.scheduler.simulate(seconds)
    }

    /// Rounded and clamped to 30..=240.
    pub fn set_bpm(&self, bpm: f64) {
        lock(self.scheduler.policy()).settings.bpm = round_clamped(bpm, MIN_BPM, MAX_BPM);
    }

    /// Rounded and clamped to 1..=12; the beat counter wraps into the new bar.
    pub fn set_beats_per_bar(&self, beats_per_bar: f64) {
        let mut policy = lock(self.scheduler.policy());
        let beats = round_clamped(beats_per_bar, 1, MAX_BEATS_PER_BAR);
        policy.settings.beats_per_bar = beats;
        policy.current_beat %= beats;
    }

    pub fn set_volume(&self, volume: f32) {
        lock(self.scheduler.policy()).settings.volume = clamp_volume(volume);
    }

    pub fn settings(&self) -> MetronomeSettings {
        lock(self.scheduler.policy()).settings
    }

    /// The most recently scheduled beat; `None` while stopped.
    pub fn last_tick(&self) -> Option<MetronomeTick> {
        lock(self.scheduler.policy()).last_tick
    }

    /// Receives every beat scheduled from now on.
    pub fn subscribe(&self) -> Receiver<MetronomeTick> {
        lock(self.scheduler.policy()).subscribers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualEngine;
    use crate::scheduler::Lookahead;
    use std::time::Duration;

    fn drive(policy: &mut MetronomePolicy, engine: &ManualEngine, seconds: f64) {
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        policy.on_start();
        lookahead.start(engine.current_time());
        let polls = (seconds / 0.025) as usize;
        for _ in 0..polls {
            lookahead.poll(engine.current_time(), policy, engine);
            engine.advance(0.025);
        }
    }

    #[test]
    fn test_settings_clamped() {
        let settings = MetronomeSettings {
            bpm: 500,
            beats_per_bar: 0,
            volume: 1.5,
        }
        .clamped();
        assert_eq!(settings.bpm, 240);
        assert_eq!(settings.beats_per_bar, 1);
        assert_eq!(settings.volume, 1.0);
        assert!((MetronomeSettings::default().period() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_120_bpm_ticks_every_half_second_with_accents() {
        let engine = ManualEngine::new();
        let mut policy = MetronomePolicy::new(MetronomeSettings {
            bpm: 120,
            ..MetronomeSettings::default()
        });
        let ticks = policy.subscribers.subscribe();

        drive(&mut policy, &engine, 3.0);

        let ticks: Vec<MetronomeTick> = ticks.try_iter().collect();
        assert!(ticks.len() >= 6);
        for pair in ticks.windows(2) {
            assert!((pair[1].when - pair[0].when - 0.5).abs() < 1e-9);
        }
        let beats: Vec<u32> = ticks.iter().take(6).map(|t| t.beat_index).collect();
        assert_eq!(beats, vec![0, 1, 2, 3, 0, 1]);

        let accents: Vec<bool> = engine
            .scheduled()
            .iter()
            .take(6)
            .map(|(_, sound)| matches!(sound, Sound::Click { accent: true, .. }))
            .collect();
        assert_eq!(accents, vec![true, false, false, false, true, false]);
        assert_eq!(policy.last_tick, ticks.last().copied());
    }

    #[test]
    fn test_volume_reaches_the_click() {
        let engine = ManualEngine::new();
        let mut policy = MetronomePolicy::new(MetronomeSettings {
            volume: 0.25,
            ..MetronomeSettings::default()
        });
        drive(&mut policy, &engine, 0.1);
        match engine.scheduled().first() {
            Some((_, Sound::Click { volume, .. })) => assert_eq!(*volume, 0.25),
            other => panic!("expected a click, got {:?}", other),
        }
    }

    #[test]
    fn test_setters_clamp_and_wrap_beat() {
        let engine = Arc::new(ManualEngine::new());
        let metronome = Metronome::new(engine, MetronomeSettings::default(), LookaheadConfig::default());

        metronome.set_bpm(12.0);
        assert_eq!(metronome.settings().bpm, 30);
        metronome.set_bpm(99.6);
        assert_eq!(metronome.settings().bpm, 100);
        metronome.set_volume(-2.0);
        assert_eq!(metronome.settings().volume, 0.0);

        lock(metronome.scheduler.policy()).current_beat = 3;
        metronome.set_beats_per_bar(3.0);
        assert_eq!(metronome.settings().beats_per_bar, 3);
        assert_eq!(lock(metronome.scheduler.policy()).current_beat, 0);
        metronome.set_beats_per_bar(40.0);
        assert_eq!(metronome.settings().beats_per_bar, 12);
    }

    #[test]
    fn test_meter_change_applies_from_next_beat() {
        let engine = ManualEngine::new();
        let mut policy = MetronomePolicy::new(MetronomeSettings {
            bpm: 240,
            ..MetronomeSettings::default()
        });
        let ticks = policy.subscribers.subscribe();
        let mut lookahead = Lookahead::new(LookaheadConfig::default());
        policy.on_start();
        lookahead.start(0.0);

        // Emits beats 0 and 1 (0.05 s and 0.30 s fall inside the first two horizons).
        lookahead.poll(0.0, &mut policy, &engine);
        engine.set_time(0.2);
        lookahead.poll(0.2, &mut policy, &engine);
        policy.settings.beats_per_bar = 2;
        policy.current_beat %= 2;
        engine.set_time(0.9);
        lookahead.poll(0.9, &mut policy, &engine);

        let beats: Vec<u32> = ticks.try_iter().map(|t| t.beat_index).collect();
        assert_eq!(&beats[..2], &[0, 1]);
        assert!(beats[2..].iter().all(|&b| b < 2));
        assert_eq!(beats[2], 0);
    }

    #[test]
    fn test_simulate_offline() {
        let metronome = Metronome::new(
            Arc::new(ManualEngine::new()),
            MetronomeSettings {
                bpm: 60,
                beats_per_bar: 3,
                volume: 0.5,
            },
            LookaheadConfig::default(),
        );
        let clicks = metronome.simulate(4.0);
        let accents: Vec<bool> = clicks
            .iter()
            .map(|(_, sound)| matches!(sound, Sound::Click { accent: true, .. }))
            .collect();
        assert_eq!(accents, vec![true, false, false, true]);
        assert!(metronome.last_tick().is_none());
    }

    #[test]
    fn test_threaded_start_stop_toggle() {
        let engine = Arc::new(ManualEngine::new());
        let mut metronome = Metronome::new(engine.clone(), MetronomeSettings::default(), LookaheadConfig::default());
        let ticks = metronome.subscribe();

        assert_eq!(metronome.toggle(), TransportStatus::Running);
        std::thread::sleep(Duration::from_millis(80));
        assert!(metronome.last_tick().is_some());

        assert_eq!(metronome.toggle(), TransportStatus::Stopped);
        assert!(metronome.last_tick().is_none());
        metronome.stop();

        let first = ticks.try_recv().ok();
        assert_eq!(first.map(|t| t.beat_index), Some(0));
        assert!(engine.scheduled().len() >= 1);
    }
}
