//! The audio engine boundary used by the schedulers.
//!
//! An engine exposes a monotonic, sample-accurate clock and accepts sounds
//! stamped with a future clock time; it takes care of starting them exactly
//! then. Times already in the past start immediately.

use crate::lock;
use std::sync::Mutex;

/// A sound the schedulers can ask for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sound {
    /// A short woodblock-like metronome click.
    Click { accent: bool, volume: f32 },
    /// A pitched note of fixed length.
    Tone {
        frequency: f32,
        /// Seconds.
        duration: f32,
        volume: f32,
    },
}

pub trait AudioEngine: Send + Sync {
    /// Current audio clock time in seconds.
    fn current_time(&self) -> f64;

    /// Plays `sound` at clock time `when`, or immediately if `when` has
    /// already passed.
    fn schedule(&self, when: f64, sound: Sound);
}

/// An engine whose clock only moves when told to, recording what it was
/// asked to play.
///
/// Used for offline dry runs and for driving schedulers deterministically.
#[derive(Debug, Default)]
pub struct ManualEngine {
    time: Mutex<f64>,
    scheduled: Mutex<Vec<(f64, Sound)>>,
}

impl ManualEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, seconds: f64) {
        *lock(&self.time) = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *lock(&self.time) += seconds;
    }

    /// Everything scheduled so far, as `(start_time, sound)`.
    pub fn scheduled(&self) -> Vec<(f64, Sound)> {
        lock(&self.scheduled).clone()
    }

    pub fn take_scheduled(&self) -> Vec<(f64, Sound)> {
        std::mem::take(&mut *lock(&self.scheduled))
    }
}

impl AudioEngine for ManualEngine {
    fn current_time(&self) -> f64 {
        *lock(&self.time)
    }

    fn schedule(&self, when: f64, sound: Sound) {
        let start = when.max(self.current_time());
        lock(&self.scheduled).push((start, sound));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let engine = ManualEngine::new();
        assert_eq!(engine.current_time(), 0.0);
        engine.advance(0.25);
        engine.advance(0.25);
        assert!((engine.current_time() - 0.5).abs() < 1e-12);
        engine.set_time(3.0);
        assert_eq!(engine.current_time(), 3.0);
    }

    #[test]
    fn test_past_sounds_start_now() {
        let engine = ManualEngine::new();
        engine.set_time(2.0);
        let click = Sound::Click { accent: true, volume: 1.0 };

        engine.schedule(1.5, click);
        engine.schedule(2.5, click);

        assert_eq!(engine.take_scheduled(), vec![(2.0, click), (2.5, click)]);
        assert!(engine.scheduled().is_empty());
    }
}
