// uke-core/src/lib.rs

//! The core logic for the ukulele practice studio.
//! This crate is responsible for pitch detection, note math and the
//! lookahead-scheduled metronome and step sequencer. It is completely
//! headless and contains no UI code.

pub mod audio;
pub mod engine;
pub mod error;
pub mod metronome;
pub mod notify;
pub mod output;
pub mod pitch;
pub mod scheduler;
pub mod sequencer;
pub mod theory;
pub mod tracker;
pub mod tuning;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

pub use error::{DeviceError, DeviceResult};

/// Every tunable knob of the studio, grouped by component.
///
/// Loaded from JSON by the front-end; any missing section or field falls
/// back to its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Options for the live pitch tracker (frame size, gates, YIN band).
    pub tracker: tracker::TrackerOptions,
    /// Initial metronome parameters.
    pub metronome: metronome::MetronomeSettings,
    /// Initial sequencer parameters.
    pub sequencer: sequencer::SequencerSettings,
    /// Polling cadence and horizon shared by both schedulers.
    pub scheduler: scheduler::LookaheadConfig,
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// The cells guarded here hold plain parameters, so a poisoned lock never
/// leaves them in a state worse than "last written value".
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let json = r#"{ "metronome": { "bpm": 132 }, "tracker": { "min_rms": 0.02 } }"#;
        let config: StudioConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.metronome.bpm, 132);
        assert_eq!(config.metronome.beats_per_bar, 4);
        assert!((config.tracker.min_rms - 0.02).abs() < f32::EPSILON);
        assert_eq!(config.tracker.frame_size, 4096);
        assert_eq!(config.sequencer, sequencer::SequencerSettings::default());
        assert_eq!(config.scheduler, scheduler::LookaheadConfig::default());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: StudioConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StudioConfig::default());
    }
}
