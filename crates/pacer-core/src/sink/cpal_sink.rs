//! CPAL output sink
//!
//! Buffers travel between the consumer thread and the CPAL callback through
//! two lock-free rings:
//!
//! ```text
//!                 filled (rtrb SPSC)
//!  Consumer ─────────────────────────────► CPAL callback
//!  Thread   ◄───────────────────────────── (plays buffers in order)
//!                 free (rtrb SPSC)
//! ```
//!
//! Every buffer is allocated up front; the callback never allocates or
//! blocks. When a buffer finishes playing the callback reports the number
//! still outstanding to the tracker.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig, SupportedBufferSize};

use super::{AudioSink, SinkFactory, SinkFormat};
use crate::device::DeviceQueueTracker;
use crate::error::{AudioError, AudioResult, SinkError};

/// Opens sinks on a CPAL output device
#[derive(Debug, Clone, Default)]
pub struct CpalSinkFactory {
    /// Output device name, `None` for the host default
    pub device: Option<String>,
}

impl CpalSinkFactory {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open(
        &self,
        format: SinkFormat,
        tracker: Arc<DeviceQueueTracker>,
    ) -> AudioResult<Box<dyn AudioSink>> {
        let host = cpal::default_host();
        let device = match &self.device {
            Some(name) => find_output_device(&host, name)?,
            None => host.default_output_device().ok_or(AudioError::NoDevice)?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", device_name);

        let stream_config = select_stream_config(&device, &format)?;
        let sample_rate = stream_config.sample_rate.0;
        log::info!(
            "Audio config: {} channels, {}Hz, {:?}, {} buffers of {} frames",
            stream_config.channels,
            sample_rate,
            stream_config.buffer_size,
            format.buffer_count,
            format.buffer_frames
        );

        let (submit, playback) =
            buffer_rings(format.buffer_count, format.buffer_frames, tracker);
        let stream = build_output_stream(&device, &stream_config, playback)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok(Box::new(CpalSink {
            stream: Some(stream),
            submit,
            sample_rate,
            stopped: false,
        }))
    }
}

/// Names of the default host's output devices
pub fn output_device_names() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_output_device(host: &cpal::Host, name: &str) -> AudioResult<cpal::Device> {
    host.output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .find(|d| d.name().ok().as_deref() == Some(name))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

/// Pick an f32 config with enough channels, preferring the requested rate
fn select_stream_config(device: &cpal::Device, format: &SinkFormat) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= format.channels)
        .collect();

    let target = format.sample_rate;
    let config = match supported
        .iter()
        .find(|c| target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0)
    {
        Some(c) => c.clone().with_sample_rate(cpal::SampleRate(target)),
        None => {
            let fallback = supported.first().ok_or_else(|| {
                AudioError::ConfigError("No f32 stereo output configuration".to_string())
            })?;
            let rate = fallback.max_sample_rate();
            log::warn!(
                "Audio device doesn't support {}Hz, falling back to {}Hz",
                target,
                rate.0
            );
            fallback.clone().with_sample_rate(rate)
        }
    };

    let buffer_size = match config.buffer_size() {
        SupportedBufferSize::Range { min, max } => {
            CpalBufferSize::Fixed((format.buffer_frames as u32).clamp(*min, *max))
        }
        SupportedBufferSize::Unknown => CpalBufferSize::Default,
    };

    Ok(StreamConfig {
        channels: config.channels(),
        sample_rate: config.sample_rate(),
        buffer_size,
    })
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut playback: PlaybackState,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                playback.render(data, channels);
            },
            move |err| {
                log::error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Realized CPAL sink, owned by the consumer thread
struct CpalSink {
    stream: Option<Stream>,
    submit: SubmitSide,
    sample_rate: u32,
    stopped: bool,
}

impl AudioSink for CpalSink {
    fn enqueue(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        if self.stopped {
            return Err(SinkError::Stopped);
        }
        self.submit.submit(samples)
    }

    fn stop(&mut self) {
        self.stopped = true;
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Failed to pause output stream: {}", e);
            }
            log::info!("Audio stream stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Consumer-thread end of the buffer rings
struct SubmitSide {
    free: rtrb::Consumer<Vec<f32>>,
    filled: rtrb::Producer<Vec<f32>>,
}

impl SubmitSide {
    fn submit(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        if samples.is_empty() {
            return Err(SinkError::Backend("empty buffer".to_string()));
        }
        let mut buffer = self.free.pop().map_err(|_| SinkError::QueueFull)?;
        buffer.clear();
        buffer.extend_from_slice(samples);
        self.filled.push(buffer).map_err(|_| SinkError::QueueFull)
    }
}

/// Callback end of the buffer rings
struct PlaybackState {
    filled: rtrb::Consumer<Vec<f32>>,
    free: rtrb::Producer<Vec<f32>>,
    current: Option<Vec<f32>>,
    /// Sample offset into `current`
    pos: usize,
    tracker: Arc<DeviceQueueTracker>,
}

impl PlaybackState {
    /// Fill one device period; extra device channels get silence
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let mut completed = false;
        for frame in data.chunks_mut(channels) {
            match self.next_frame(&mut completed) {
                Some((left, right)) => {
                    frame[0] = left;
                    if channels > 1 {
                        frame[1] = right;
                    }
                    for ch in frame.iter_mut().skip(2) {
                        *ch = 0.0;
                    }
                }
                None => frame.fill(0.0),
            }
        }
        if completed {
            self.tracker.on_buffer_complete(self.outstanding());
        }
    }

    fn next_frame(&mut self, completed: &mut bool) -> Option<(f32, f32)> {
        loop {
            if let Some(buffer) = self.current.as_ref() {
                if self.pos + 1 < buffer.len() {
                    let frame = (buffer[self.pos], buffer[self.pos + 1]);
                    self.pos += 2;
                    return Some(frame);
                }
            }
            if let Some(done) = self.current.take() {
                // Cannot overflow: the ring holds every buffer of the pool
                let _ = self.free.push(done);
                *completed = true;
            }
            match self.filled.pop() {
                Ok(next) => {
                    self.current = Some(next);
                    self.pos = 0;
                }
                Err(_) => return None,
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.filled.slots() + usize::from(self.current.is_some())
    }
}

/// Allocate `count` buffers and wire both rings
fn buffer_rings(
    count: usize,
    frames: usize,
    tracker: Arc<DeviceQueueTracker>,
) -> (SubmitSide, PlaybackState) {
    let count = count.max(1);
    let (filled_tx, filled_rx) = rtrb::RingBuffer::new(count);
    let (mut free_tx, free_rx) = rtrb::RingBuffer::new(count);
    for _ in 0..count {
        let _ = free_tx.push(Vec::with_capacity(frames * 2));
    }

    (
        SubmitSide {
            free: free_rx,
            filled: filled_tx,
        },
        PlaybackState {
            filled: filled_rx,
            free: free_tx,
            current: None,
            pos: 0,
            tracker,
        },
    )
}
