//! Hardware output sinks
//!
//! A sink accepts whole buffers of interleaved stereo f32 from the consumer
//! and plays them in order. Completion is reported asynchronously to the
//! shared [`DeviceQueueTracker`] as the number of buffers still outstanding.
//!
//! ```text
//! ┌──────────────────┐  enqueue(buffer)   ┌─────────────────────┐
//! │ Consumer Thread  │──────────────────►│  Sink (device)      │
//! │ (owns the sink)  │                    │  plays in order     │
//! └────────┬─────────┘                    └──────────┬──────────┘
//!          │ try_reserve()                           │ outstanding count
//!          ▼                                         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │               DeviceQueueTracker (atomics)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sinks are realized on the consumer thread through a [`SinkFactory`]; the
//! sink itself never crosses threads. `stop` is final: once it returns, no
//! further buffer is accepted.

mod cpal_sink;
mod simulated;

pub use cpal_sink::{output_device_names, CpalSinkFactory};
pub use simulated::SimulatedSinkFactory;

use std::sync::Arc;

use crate::device::DeviceQueueTracker;
use crate::error::{AudioResult, SinkError};

/// Format requested from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    /// Requested output sample rate
    pub sample_rate: u32,
    /// Interleaved channels per frame (always 2 for the pipeline)
    pub channels: u16,
    /// Frames per submitted buffer (upper bound)
    pub buffer_frames: usize,
    /// Buffer slots the device holds
    pub buffer_count: usize,
}

/// A realized output device
pub trait AudioSink {
    /// Submit one buffer of interleaved samples
    ///
    /// The buffer may be shorter than `SinkFormat::buffer_frames`. Failure is
    /// never retried by the caller.
    fn enqueue(&mut self, samples: &[f32]) -> Result<(), SinkError>;

    /// Stop playback and refuse further submissions
    fn stop(&mut self);

    /// Sample rate the device actually runs at
    fn sample_rate(&self) -> u32;
}

/// Realizes a sink for a format
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        format: SinkFormat,
        tracker: Arc<DeviceQueueTracker>,
    ) -> AudioResult<Box<dyn AudioSink>>;
}
