//! Standard location of the settings file

use std::path::PathBuf;

/// Default settings file path
///
/// Returns: `{config_dir}/pacer/audio.yaml`, falling back to the working
/// directory when the platform has no config directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pacer")
        .join("audio.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_path_ends_with_filename() {
        let path = default_settings_path();
        assert!(path.ends_with("pacer/audio.yaml"));
    }
}
