//! Common types for the pacer pipeline
//!
//! Raw PCM as it leaves the emulation core (16-bit little-endian stereo,
//! right channel first) and the float stereo frames the stretch engine and
//! the device sinks work with.

/// Bytes per emulated PCM frame (16-bit stereo)
pub const BYTES_PER_FRAME: usize = 4;

/// Number of interleaved channels everywhere in the pipeline
pub const CHANNELS: usize = 2;

/// Scale factor from i16 to f32 in [-1.0, 1.0)
const I16_SCALE: f32 = 1.0 / 32768.0;

/// Audio sample type used after normalization
pub type Sample = f32;

/// A single stereo frame
///
/// Uses `#[repr(C)]` so `&[StereoFrame]` can be reinterpreted as interleaved
/// `&[f32]` with bytemuck, which is the layout the stretch engine and the
/// sinks consume.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoFrame {
    pub left: Sample,
    pub right: Sample,
}

impl StereoFrame {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }
}

/// View a frame slice as interleaved samples (zero-copy)
#[inline]
pub fn as_interleaved(frames: &[StereoFrame]) -> &[f32] {
    bytemuck::cast_slice(frames)
}

/// View a mutable frame slice as interleaved samples (zero-copy)
#[inline]
pub fn as_interleaved_mut(frames: &mut [StereoFrame]) -> &mut [f32] {
    bytemuck::cast_slice_mut(frames)
}

/// One burst of raw PCM handed from the producer to the consumer
///
/// Owns its bytes. Created by the producer for every length-changed event,
/// moved through the queue and dropped by the consumer once the engine has
/// been fed.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved 16-bit PCM, 4 bytes per frame
    pub data: Box<[u8]>,
    /// Wall-clock seconds between the pacing origin and chunk creation
    pub time_since_start: f64,
}

impl AudioChunk {
    /// Copy raw PCM into a new chunk
    pub fn new(data: &[u8], time_since_start: f64) -> Self {
        Self {
            data: data.into(),
            time_since_start,
        }
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole stereo frames in the chunk
    #[inline]
    pub fn frames(&self) -> usize {
        self.data.len() / BYTES_PER_FRAME
    }

    /// Seconds of game audio this chunk represents at `game_frequency`
    pub fn game_time(&self, game_frequency: u32) -> f64 {
        if game_frequency == 0 {
            return 0.0;
        }
        self.frames() as f64 / game_frequency as f64
    }
}

/// Decode raw emulator PCM into float stereo frames
///
/// The emulated DAC emits each frame right channel first. Unless
/// `swap_channels` is set the halves are exchanged so the output is L/R;
/// with the flag set the native order is passed through. Trailing bytes
/// that do not form a whole frame are ignored.
///
/// `out` is cleared first; its capacity is reused.
pub fn normalize_into(bytes: &[u8], swap_channels: bool, out: &mut Vec<StereoFrame>) {
    out.clear();
    out.extend(bytes.chunks_exact(BYTES_PER_FRAME).map(|frame| {
        let first = i16::from_le_bytes([frame[0], frame[1]]) as f32 * I16_SCALE;
        let second = i16::from_le_bytes([frame[2], frame[3]]) as f32 * I16_SCALE;
        if swap_channels {
            StereoFrame::new(first, second)
        } else {
            StereoFrame::new(second, first)
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(first: i16, second: i16) -> Vec<u8> {
        let mut bytes = first.to_le_bytes().to_vec();
        bytes.extend_from_slice(&second.to_le_bytes());
        bytes
    }

    #[test]
    fn test_chunk_frames_and_game_time() {
        let chunk = AudioChunk::new(&[0u8; 4 * 441], 0.0);
        assert_eq!(chunk.frames(), 441);
        assert!((chunk.game_time(44100) - 0.01).abs() < 1e-12);
        assert_eq!(chunk.game_time(0), 0.0);
    }

    #[test]
    fn test_normalize_swaps_by_default() {
        let bytes = frame_bytes(16384, -16384);
        let mut out = Vec::new();
        normalize_into(&bytes, false, &mut out);
        assert_eq!(out, vec![StereoFrame::new(-0.5, 0.5)]);
    }

    #[test]
    fn test_normalize_keeps_native_order_when_flagged() {
        let bytes = frame_bytes(16384, -16384);
        let mut out = Vec::new();
        normalize_into(&bytes, true, &mut out);
        assert_eq!(out, vec![StereoFrame::new(0.5, -0.5)]);
    }

    #[test]
    fn test_normalize_ignores_partial_frame() {
        let mut bytes = frame_bytes(1, 2);
        bytes.extend_from_slice(&[7, 7]);
        let mut out = vec![StereoFrame::silence(); 8];
        normalize_into(&bytes, true, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_interleaved_view_layout() {
        let frames = [StereoFrame::new(0.25, -0.25), StereoFrame::new(1.0, 0.0)];
        assert_eq!(as_interleaved(&frames), &[0.25, -0.25, 1.0, 0.0]);
    }
}
