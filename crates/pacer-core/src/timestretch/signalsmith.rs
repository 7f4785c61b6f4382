//! Time-stretching via signalsmith-stretch
//!
//! signalsmith-stretch derives the stretch ratio from the relative sizes of
//! the input and output blocks it is handed. This engine keeps an input FIFO
//! and, for every pull, hands the stretcher `frames × tempo × rate` input
//! frames (with fractional carry) for `frames` output frames. The rate part
//! of the ratio is pitch-compensated with a transpose so sample-rate
//! conversion does not shift pitch.

use signalsmith_stretch::Stretch;

use super::{rate_compensation_semitones, StretchEngineFactory, TimeStretchEngine};
use crate::error::{AudioError, AudioResult};
use crate::types::CHANNELS;

/// Sample rate used until `configure` is called
const PLACEHOLDER_SAMPLE_RATE: u32 = 44100;

/// signalsmith-stretch backed engine
pub struct SignalsmithEngine {
    stretcher: Stretch,
    cheaper: bool,
    channels: u32,
    tempo: f64,
    rate: f64,
    /// Interleaved input not yet handed to the stretcher
    input: Vec<f32>,
    /// Read offset into `input`, in samples
    read_pos: usize,
    /// Input frames owed to the next pull
    fractional_input: f64,
}

impl SignalsmithEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self::build(sample_rate, false)
    }

    /// Reduced-quality preset, noticeably cheaper on CPU
    pub fn new_cheaper(sample_rate: u32) -> Self {
        Self::build(sample_rate, true)
    }

    fn build(sample_rate: u32, cheaper: bool) -> Self {
        Self {
            stretcher: Self::make_stretcher(CHANNELS as u32, sample_rate, cheaper),
            cheaper,
            channels: CHANNELS as u32,
            tempo: 1.0,
            rate: 1.0,
            input: Vec::new(),
            read_pos: 0,
            fractional_input: 0.0,
        }
    }

    fn make_stretcher(channels: u32, sample_rate: u32, cheaper: bool) -> Stretch {
        if cheaper {
            Stretch::preset_cheaper(channels, sample_rate)
        } else {
            Stretch::preset_default(channels, sample_rate)
        }
    }

    /// Input frames queued but not yet consumed
    pub fn buffered_frames(&self) -> usize {
        (self.input.len() - self.read_pos) / self.channels as usize
    }

    /// Input frames consumed per output frame
    fn input_per_output(&self) -> f64 {
        self.tempo * self.rate
    }

    fn compact(&mut self) {
        if self.read_pos > 0 && self.read_pos * 2 >= self.input.len() {
            self.input.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }
}

impl TimeStretchEngine for SignalsmithEngine {
    fn configure(&mut self, sample_rate: u32, channels: u32) -> AudioResult<()> {
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::EngineInit(format!(
                "unsupported format: {}Hz, {} channels",
                sample_rate, channels
            )));
        }

        self.stretcher = Self::make_stretcher(channels, sample_rate, self.cheaper);
        self.channels = channels;
        self.input.clear();
        self.read_pos = 0;
        self.fractional_input = 0.0;
        // Re-apply pitch compensation on the fresh stretcher
        let rate = self.rate;
        self.set_rate(rate);

        log::debug!(
            "Stretch engine configured: {}Hz, {} channels{}",
            sample_rate,
            channels,
            if self.cheaper { " (cheaper preset)" } else { "" }
        );
        Ok(())
    }

    fn set_tempo(&mut self, tempo: f64) {
        if tempo.is_finite() && tempo > 0.0 {
            self.tempo = tempo;
        }
    }

    fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
            self.stretcher
                .set_transpose_factor_semitones(rate_compensation_semitones(rate) as f32, None);
        }
    }

    fn tempo(&self) -> f64 {
        self.tempo
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn put_samples(&mut self, samples: &[f32]) {
        self.compact();
        self.input.extend_from_slice(samples);
    }

    fn receive_samples(&mut self, out: &mut [f32], max_frames: usize) -> usize {
        let channels = self.channels as usize;
        let frames = max_frames.min(out.len() / channels);
        if frames == 0 {
            return 0;
        }

        let wanted = self.fractional_input + frames as f64 * self.input_per_output();
        let input_frames = wanted.floor() as usize;
        if input_frames == 0 || input_frames > self.buffered_frames() {
            return 0;
        }
        self.fractional_input = wanted - input_frames as f64;

        let start = self.read_pos;
        let end = start + input_frames * channels;
        let output = &mut out[..frames * channels];
        output.fill(0.0);
        self.stretcher.process(&self.input[start..end], output);
        self.read_pos = end;

        frames
    }

    fn clear(&mut self) {
        self.stretcher.reset();
        self.input.clear();
        self.read_pos = 0;
        self.fractional_input = 0.0;
    }
}

/// Factory for the consumer thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalsmithEngineFactory {
    /// Use the cheaper preset
    pub cheaper: bool,
}

impl StretchEngineFactory for SignalsmithEngineFactory {
    fn create(&self) -> AudioResult<Box<dyn TimeStretchEngine>> {
        let engine = if self.cheaper {
            SignalsmithEngine::new_cheaper(PLACEHOLDER_SAMPLE_RATE)
        } else {
            SignalsmithEngine::new(PLACEHOLDER_SAMPLE_RATE)
        };
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 256;

    fn pull_all(engine: &mut SignalsmithEngine) -> usize {
        let mut out = vec![0.0f32; BLOCK * 2];
        let mut total = 0;
        loop {
            let n = engine.receive_samples(&mut out, BLOCK);
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    fn configured(tempo: f64, rate: f64) -> SignalsmithEngine {
        let mut engine = SignalsmithEngine::new(32000);
        engine.configure(32000, 2).unwrap();
        engine.set_tempo(tempo);
        engine.set_rate(rate);
        engine
    }

    #[test]
    fn test_needs_input_before_output() {
        let mut engine = configured(1.0, 1.0);
        let mut out = vec![0.0f32; BLOCK * 2];
        assert_eq!(engine.receive_samples(&mut out, BLOCK), 0);
    }

    #[test]
    fn test_unity_ratio_preserves_length() {
        let mut engine = configured(1.0, 1.0);
        engine.put_samples(&vec![0.0f32; 4096 * 2]);
        assert_eq!(pull_all(&mut engine), 4096);
        assert_eq!(engine.buffered_frames(), 0);
    }

    #[test]
    fn test_tempo_shortens_output() {
        let mut engine = configured(2.0, 1.0);
        engine.put_samples(&vec![0.0f32; 4096 * 2]);
        assert_eq!(pull_all(&mut engine), 2048);
    }

    #[test]
    fn test_rate_lengthens_output() {
        let mut engine = configured(1.0, 0.5);
        engine.put_samples(&vec![0.0f32; 4096 * 2]);
        assert_eq!(pull_all(&mut engine), 8192);
        assert_eq!(engine.rate(), 0.5);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut engine = configured(1.0, 1.0);
        engine.set_tempo(0.0);
        engine.set_tempo(f64::NAN);
        engine.set_rate(-1.0);
        assert_eq!(engine.tempo(), 1.0);
        assert_eq!(engine.rate(), 1.0);
        assert!(engine.configure(0, 2).is_err());
    }

    #[test]
    fn test_clear_drops_pending_input() {
        let mut engine = configured(1.0, 1.0);
        engine.put_samples(&vec![0.0f32; 1024 * 2]);
        engine.clear();
        assert_eq!(engine.buffered_frames(), 0);
        assert_eq!(pull_all(&mut engine), 0);
    }

    #[test]
    fn test_factory_creates_engine() {
        let factory = SignalsmithEngineFactory { cheaper: true };
        let mut engine = factory.create().unwrap();
        engine.configure(22050, 2).unwrap();
        engine.set_tempo(1.5);
        assert_eq!(engine.tempo(), 1.5);
    }
}
