//! Host integration capabilities
//!
//! The pipeline depends on its host only through these small interfaces:
//! a speed-limiter query, the playback speed percentage and the emulated
//! system type used to derive a frequency from the DAC rate register.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Slowest accepted playback speed, in percent
pub const MIN_SPEED_PERCENT: u32 = 10;

/// Fastest accepted playback speed, in percent
pub const MAX_SPEED_PERCENT: u32 = 300;

/// Frequencies below this are ignored by `initialize`
pub const MIN_GAME_FREQUENCY: u32 = 4000;

/// Queries answered by the host runtime
pub trait HostServices: Send + Sync {
    /// Whether emulation should be held to real time
    fn speed_limiter_enabled(&self) -> bool;
}

/// Host stand-in with a togglable limiter
#[derive(Debug)]
pub struct StaticHost {
    limiter: AtomicBool,
}

impl StaticHost {
    pub fn new(limiter_enabled: bool) -> Self {
        Self {
            limiter: AtomicBool::new(limiter_enabled),
        }
    }

    pub fn set_speed_limiter(&self, enabled: bool) {
        self.limiter.store(enabled, Ordering::Relaxed);
    }
}

impl Default for StaticHost {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HostServices for StaticHost {
    fn speed_limiter_enabled(&self) -> bool {
        self.limiter.load(Ordering::Relaxed)
    }
}

/// Playback speed shared between the host and the consumer thread
#[derive(Debug)]
pub struct SpeedControl {
    percent: AtomicU32,
}

impl SpeedControl {
    pub fn new() -> Self {
        Self {
            percent: AtomicU32::new(100),
        }
    }

    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Speed as a tempo multiplier
    pub fn factor(&self) -> f64 {
        self.percent() as f64 / 100.0
    }

    /// Store a new speed; values outside 10..=300 are ignored
    pub fn set_percent(&self, percent: u32) -> bool {
        if !(MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT).contains(&percent) {
            log::warn!("Ignoring out-of-range speed factor {}%", percent);
            return false;
        }
        self.percent.store(percent, Ordering::Relaxed);
        true
    }
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Emulated video system, which determines the DAC clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemType {
    #[default]
    Ntsc,
    Pal,
    Mpal,
}

impl SystemType {
    /// Host system code: 0 = NTSC, 1 = PAL, 2 = MPAL; anything else is NTSC
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SystemType::Pal,
            2 => SystemType::Mpal,
            _ => SystemType::Ntsc,
        }
    }

    /// DAC clock divided by the rate register to get the sample rate
    pub fn dac_clock(self) -> u32 {
        match self {
            SystemType::Ntsc => 48_681_812,
            SystemType::Pal => 49_656_530,
            SystemType::Mpal => 48_628_316,
        }
    }
}

/// Game sample rate programmed through the DAC rate register
pub fn frequency_from_dac_rate(system: SystemType, dac_rate: u32) -> u32 {
    system.dac_clock() / dac_rate.saturating_add(1)
}

/// Device rate for a game frequency
///
/// `sampling_rate == 0` derives the rate from the game frequency; an
/// explicit selection must be one of 16000, 24000, 32000, 44100 or 48000,
/// anything else falls back to 32000.
pub fn select_output_frequency(game_frequency: u32, sampling_rate: u32) -> u32 {
    match sampling_rate {
        0 => match game_frequency / 1000 {
            0..=11 => 11025,
            12..=22 => 22050,
            23..=32 => 32000,
            _ => 44100,
        },
        16000 | 24000 | 32000 | 44100 | 48000 => sampling_rate,
        other => {
            log::warn!("Unsupported sampling rate {}Hz, using 32000Hz", other);
            32000
        }
    }
}
