//! Time-stretching capability driven by the consumer
//!
//! The consumer never reimplements stretching. It drives an engine that,
//! given a tempo ratio and a sample-rate ratio, accepts interleaved stereo
//! input and lazily yields output (pull model: `receive_samples` returning 0
//! means "feed me more").
//!
//! - **tempo**: playback speed multiplier, pitch preserved
//! - **rate**: `game_frequency / output_frequency`, converts between clocks

mod signalsmith;

pub use signalsmith::{SignalsmithEngine, SignalsmithEngineFactory};

use crate::error::AudioResult;

/// Tempo/rate transform over interleaved stereo f32 samples
pub trait TimeStretchEngine {
    /// Reset the engine for input at `sample_rate` with `channels` channels
    fn configure(&mut self, sample_rate: u32, channels: u32) -> AudioResult<()>;

    /// Playback speed multiplier (1.0 = unchanged)
    fn set_tempo(&mut self, tempo: f64);

    /// Sample-rate conversion factor (input rate / output rate)
    fn set_rate(&mut self, rate: f64);

    fn tempo(&self) -> f64;

    fn rate(&self) -> f64;

    /// Append interleaved input; `samples.len()` must be a multiple of the channel count
    fn put_samples(&mut self, samples: &[f32]);

    /// Pull up to `max_frames` frames of output into `out`
    ///
    /// Returns the number of frames written; 0 means more input is needed.
    fn receive_samples(&mut self, out: &mut [f32], max_frames: usize) -> usize;

    /// Drop buffered input and output
    fn clear(&mut self);
}

/// Builds engines on the consumer thread
///
/// Engines wrap native state that is not assumed to be `Send`, so the
/// pipeline only ships the factory across threads.
pub trait StretchEngineFactory: Send + Sync {
    fn create(&self) -> AudioResult<Box<dyn TimeStretchEngine>>;
}

impl<F> StretchEngineFactory for F
where
    F: Fn() -> AudioResult<Box<dyn TimeStretchEngine>> + Send + Sync,
{
    fn create(&self) -> AudioResult<Box<dyn TimeStretchEngine>> {
        self()
    }
}

/// Semitone shift that cancels the pitch change of a sample-rate ratio
///
/// Output played `1/rate` times faster raises pitch by the same factor.
pub fn rate_compensation_semitones(rate: f64) -> f64 {
    if rate <= 0.0 || !rate.is_finite() {
        return 0.0;
    }
    12.0 * rate.log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_compensation() {
        assert_eq!(rate_compensation_semitones(1.0), 0.0);
        assert!((rate_compensation_semitones(0.5) + 12.0).abs() < 1e-9);
        assert!((rate_compensation_semitones(2.0) - 12.0).abs() < 1e-9);
        assert_eq!(rate_compensation_semitones(0.0), 0.0);
        assert_eq!(rate_compensation_semitones(f64::NAN), 0.0);
    }
}
