//! YAML settings I/O
//!
//! Standalone hosts keep [`AudioSettings`] in a YAML file. Loading never
//! fails: a missing or broken file yields defaults.

use std::path::Path;

use anyhow::{Context, Result};

use super::settings::AudioSettings;

/// Load settings from a YAML file
///
/// If the file doesn't exist, returns defaults.
/// If the file exists but is invalid, logs a warning and returns defaults.
/// Keys missing from the file take their default values.
pub fn load_settings(path: &Path) -> AudioSettings {
    log::info!("load_settings: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_settings: Settings file doesn't exist, using defaults");
        return AudioSettings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<AudioSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("load_settings: Failed to parse settings: {}, using defaults", e);
                AudioSettings::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_settings: Failed to read settings file: {}, using defaults",
                e
            );
            AudioSettings::default()
        }
    }
}

/// Save settings to a YAML file, creating parent directories
pub fn save_settings(settings: &AudioSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(settings).context("Failed to serialize settings to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write settings file: {:?}", path))?;

    log::info!("save_settings: Settings saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let settings = load_settings(Path::new("/nonexistent/path/pacer.yaml"));
        assert_eq!(settings, AudioSettings::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pacer.yaml");

        let settings = AudioSettings {
            sampling_rate: 48000,
            time_stretch_enabled: false,
            ..Default::default()
        };
        save_settings(&settings, &path).unwrap();

        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pacer.yaml");
        std::fs::write(&path, "swap_channels: true\nsecondary_buffer_size: 512\n").unwrap();

        let settings = load_settings(&path);
        assert!(settings.swap_channels);
        assert_eq!(settings.secondary_buffer_size, 512);
        assert_eq!(settings.device_buffer_count, AudioSettings::default().device_buffer_count);
    }

    #[test]
    fn test_invalid_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pacer.yaml");
        std::fs::write(&path, "secondary_buffer_size: [not, a, number]").unwrap();

        assert_eq!(load_settings(&path), AudioSettings::default());
    }
}
