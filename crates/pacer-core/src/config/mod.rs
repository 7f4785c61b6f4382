//! Pipeline configuration
//!
//! Settings are plain key/value pairs owned by the host. The pipeline reads
//! them through the [`SettingsSource`] capability on every initialize, so a
//! re-initialization picks up changes. [`AudioSettings`] is the typed view,
//! and can also be kept in a YAML file for standalone use.
//!
//! # Usage
//!
//! ```ignore
//! use pacer_core::config::{load_settings, default_settings_path, MapSettings};
//!
//! let settings: AudioSettings = load_settings(&default_settings_path());
//! let source = MapSettings::from_settings(&settings);
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_settings, save_settings};
pub use paths::default_settings_path;
pub use settings::{
    keys, AudioSettings, MapSettings, SettingsSource, DEFAULT_DEVICE_BUFFER_COUNT,
    DEFAULT_FREQUENCY, DEFAULT_PRIMARY_BUFFER_SIZE, DEFAULT_SECONDARY_BUFFER_SIZE,
    DEFAULT_TARGET_SECONDARY_BUFFERS,
};
