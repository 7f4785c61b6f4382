//! Typed settings and the host settings capability

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Game frequency used until the core reports one
pub const DEFAULT_FREQUENCY: u32 = 33600;

/// Primary (decode) buffer size in frames
pub const DEFAULT_PRIMARY_BUFFER_SIZE: u32 = 16384;

/// Size of one device buffer in frames
pub const DEFAULT_SECONDARY_BUFFER_SIZE: u32 = 256;

/// Device buffers the adaptive consumer aims to keep queued
pub const DEFAULT_TARGET_SECONDARY_BUFFERS: u32 = 20;

/// Device buffer slots
pub const DEFAULT_DEVICE_BUFFER_COUNT: u32 = 100;

/// Host-side setting keys
pub mod keys {
    pub const DEFAULT_FREQUENCY: &str = "DEFAULT_FREQUENCY";
    pub const SWAP_CHANNELS: &str = "SWAP_CHANNELS";
    pub const PRIMARY_BUFFER_SIZE: &str = "PRIMARY_BUFFER_SIZE";
    pub const SECONDARY_BUFFER_SIZE: &str = "SECONDARY_BUFFER_SIZE";
    pub const SECONDARY_BUFFER_NBR: &str = "SECONDARY_BUFFER_NBR";
    pub const SAMPLING_RATE: &str = "SAMPLING_RATE";
    pub const TIME_STRETCH_ENABLED: &str = "TIME_STRETCH_ENABLED";
    pub const DEVICE_BUFFER_COUNT: &str = "DEVICE_BUFFER_COUNT";
}

/// Key/value settings capability provided by the host
///
/// Values are read once per (re-)initialization.
pub trait SettingsSource: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;

    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Register a default; existing values are kept
    fn set_default_int(&self, key: &str, value: i64, help: &str);

    /// Register a default; existing values are kept
    fn set_default_bool(&self, key: &str, value: bool, help: &str);
}

/// Everything the pipeline reads from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Game frequency used when the core has not reported one
    pub default_frequency: u32,
    /// Keep the emulator's native channel order instead of normalizing to L/R
    pub swap_channels: bool,
    /// Largest accepted chunk, in frames
    pub primary_buffer_size: u32,
    /// Frames per device buffer
    pub secondary_buffer_size: u32,
    /// Device buffers the adaptive consumer aims to keep queued
    pub target_secondary_buffers: u32,
    /// Output sample rate, 0 = derive from the game frequency
    pub sampling_rate: u32,
    /// Adaptive time stretching (otherwise fixed tempo)
    pub time_stretch_enabled: bool,
    /// Device buffer slots
    pub device_buffer_count: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            default_frequency: DEFAULT_FREQUENCY,
            swap_channels: false,
            primary_buffer_size: DEFAULT_PRIMARY_BUFFER_SIZE,
            secondary_buffer_size: DEFAULT_SECONDARY_BUFFER_SIZE,
            target_secondary_buffers: DEFAULT_TARGET_SECONDARY_BUFFERS,
            sampling_rate: 0,
            time_stretch_enabled: true,
            device_buffer_count: DEFAULT_DEVICE_BUFFER_COUNT,
        }
    }
}

impl AudioSettings {
    /// Register every key's default with the host
    pub fn register_defaults(source: &dyn SettingsSource) {
        let d = Self::default();
        source.set_default_int(
            keys::DEFAULT_FREQUENCY,
            d.default_frequency as i64,
            "Frequency which is used if the game doesn't set one",
        );
        source.set_default_bool(keys::SWAP_CHANNELS, d.swap_channels, "Swaps left and right channels");
        source.set_default_int(
            keys::PRIMARY_BUFFER_SIZE,
            d.primary_buffer_size as i64,
            "Size of primary buffer in frames; larger chunks are dropped",
        );
        source.set_default_int(
            keys::SECONDARY_BUFFER_SIZE,
            d.secondary_buffer_size as i64,
            "Size of one device buffer in frames",
        );
        source.set_default_int(
            keys::SECONDARY_BUFFER_NBR,
            d.target_secondary_buffers as i64,
            "Number of device buffers to keep queued",
        );
        source.set_default_int(
            keys::SAMPLING_RATE,
            d.sampling_rate as i64,
            "Output sampling rate (0=derive from game, 16000, 24000, 32000, 44100, 48000)",
        );
        source.set_default_bool(
            keys::TIME_STRETCH_ENABLED,
            d.time_stretch_enabled,
            "Enable adaptive time stretching to prevent crackling",
        );
        source.set_default_int(
            keys::DEVICE_BUFFER_COUNT,
            d.device_buffer_count as i64,
            "Number of device buffer slots",
        );
    }

    /// Read settings from the host, falling back to defaults per key
    ///
    /// Sizes are clamped to at least 1 so a bad value cannot produce an
    /// empty buffer pool.
    pub fn from_source(source: &dyn SettingsSource) -> Self {
        let d = Self::default();
        let int = |key: &str, fallback: u32| -> u32 {
            source
                .get_int(key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(fallback)
        };
        let flag = |key: &str, fallback: bool| source.get_bool(key).unwrap_or(fallback);

        Self {
            default_frequency: int(keys::DEFAULT_FREQUENCY, d.default_frequency),
            swap_channels: flag(keys::SWAP_CHANNELS, d.swap_channels),
            primary_buffer_size: int(keys::PRIMARY_BUFFER_SIZE, d.primary_buffer_size).max(1),
            secondary_buffer_size: int(keys::SECONDARY_BUFFER_SIZE, d.secondary_buffer_size)
                .max(1),
            target_secondary_buffers: int(keys::SECONDARY_BUFFER_NBR, d.target_secondary_buffers),
            sampling_rate: int(keys::SAMPLING_RATE, d.sampling_rate),
            time_stretch_enabled: flag(keys::TIME_STRETCH_ENABLED, d.time_stretch_enabled),
            device_buffer_count: int(keys::DEVICE_BUFFER_COUNT, d.device_buffer_count).max(1),
        }
    }

    /// Largest accepted chunk in bytes
    pub fn primary_buffer_bytes(&self) -> usize {
        self.primary_buffer_size as usize * crate::types::BYTES_PER_FRAME
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Bool(bool),
}

/// In-memory [`SettingsSource`]
///
/// Used by standalone hosts (the simulator) and in tests.
#[derive(Debug, Default)]
pub struct MapSettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every key from a typed settings value
    pub fn from_settings(settings: &AudioSettings) -> Self {
        let map = Self::new();
        map.set_int(keys::DEFAULT_FREQUENCY, settings.default_frequency as i64);
        map.set_bool(keys::SWAP_CHANNELS, settings.swap_channels);
        map.set_int(keys::PRIMARY_BUFFER_SIZE, settings.primary_buffer_size as i64);
        map.set_int(keys::SECONDARY_BUFFER_SIZE, settings.secondary_buffer_size as i64);
        map.set_int(keys::SECONDARY_BUFFER_NBR, settings.target_secondary_buffers as i64);
        map.set_int(keys::SAMPLING_RATE, settings.sampling_rate as i64);
        map.set_bool(keys::TIME_STRETCH_ENABLED, settings.time_stretch_enabled);
        map.set_int(keys::DEVICE_BUFFER_COUNT, settings.device_buffer_count as i64);
        map
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.write(key, Value::Int(value), true);
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.write(key, Value::Bool(value), true);
    }

    fn write(&self, key: &str, value: Value, overwrite: bool) {
        let mut values = match self.values.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if overwrite || !values.contains_key(key) {
            values.insert(key.to_string(), value);
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        let values = match self.values.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.get(key).cloned()
    }
}

impl SettingsSource for MapSettings {
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.read(key)? {
            Value::Int(v) => Some(v),
            Value::Bool(b) => Some(b as i64),
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.read(key)? {
            Value::Bool(b) => Some(b),
            Value::Int(v) => Some(v != 0),
        }
    }

    fn set_default_int(&self, key: &str, value: i64, _help: &str) {
        self.write(key, Value::Int(value), false);
    }

    fn set_default_bool(&self, key: &str, value: bool, _help: &str) {
        self.write(key, Value::Bool(value), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_yields_defaults() {
        let source = MapSettings::new();
        assert_eq!(AudioSettings::from_source(&source), AudioSettings::default());
    }

    #[test]
    fn test_register_defaults_keeps_existing_values() {
        let source = MapSettings::new();
        source.set_int(keys::SECONDARY_BUFFER_SIZE, 512);
        AudioSettings::register_defaults(&source);

        assert_eq!(source.get_int(keys::SECONDARY_BUFFER_SIZE), Some(512));
        assert_eq!(source.get_int(keys::DEFAULT_FREQUENCY), Some(33600));
        assert_eq!(source.get_bool(keys::TIME_STRETCH_ENABLED), Some(true));
    }

    #[test]
    fn test_from_source_reads_and_sanitizes() {
        let source = MapSettings::new();
        source.set_bool(keys::SWAP_CHANNELS, true);
        source.set_int(keys::SAMPLING_RATE, 48000);
        source.set_int(keys::SECONDARY_BUFFER_SIZE, 0);
        source.set_int(keys::PRIMARY_BUFFER_SIZE, -4);
        source.set_int(keys::TIME_STRETCH_ENABLED, 0);

        let settings = AudioSettings::from_source(&source);
        assert!(settings.swap_channels);
        assert_eq!(settings.sampling_rate, 48000);
        assert_eq!(settings.secondary_buffer_size, 1);
        assert_eq!(settings.primary_buffer_size, DEFAULT_PRIMARY_BUFFER_SIZE);
        assert!(!settings.time_stretch_enabled);
    }

    #[test]
    fn test_map_roundtrip_through_typed_settings() {
        let settings = AudioSettings {
            swap_channels: true,
            target_secondary_buffers: 12,
            device_buffer_count: 64,
            ..Default::default()
        };
        let source = MapSettings::from_settings(&settings);
        assert_eq!(AudioSettings::from_source(&source), settings);
    }

    #[test]
    fn test_primary_buffer_bytes() {
        let settings = AudioSettings::default();
        assert_eq!(settings.primary_buffer_bytes(), 16384 * 4);
    }
}
