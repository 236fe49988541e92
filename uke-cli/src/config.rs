//! Loading the studio configuration file.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use uke_core::StudioConfig;

/// Reads a JSON [`StudioConfig`]; with no path, every default applies.
///
/// Missing sections and fields fall back to their defaults, so a file only
/// needs the values it changes.
pub fn load_config(path: Option<&Path>) -> Result<StudioConfig> {
    let Some(path) = path else {
        return Ok(StudioConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let config: StudioConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    log::info!("[CONFIG] Loaded {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_no_path_gives_defaults() {
        assert_eq!(load_config(None).unwrap(), StudioConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "metronome": {{ "bpm": 96 }}, "tracker": {{ "yin": {{ "min_frequency": 90.0 }} }} }}"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.metronome.bpm, 96);
        assert_eq!(config.metronome.beats_per_bar, 4);
        assert_eq!(config.tracker.yin.min_frequency, 90.0);
        assert_eq!(config.tracker.yin.max_frequency, 600.0);
        assert_eq!(config.sequencer, StudioConfig::default().sequencer);
    }

    #[test]
    fn test_bad_files_report_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.json"));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        let err = load_config(Some(&bad)).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
    }
}
