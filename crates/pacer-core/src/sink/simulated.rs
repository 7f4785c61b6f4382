//! Clock-driven device without audio hardware
//!
//! A playback thread "plays" each buffer by waiting for its duration on the
//! injected clock, then reports completion like a real device would. Used by
//! the simulator and for headless runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use super::{AudioSink, SinkFactory, SinkFormat};
use crate::device::DeviceQueueTracker;
use crate::error::{AudioError, AudioResult, SinkError};
use crate::pacing::{Clock, SystemClock};

/// Opens simulated sinks
#[derive(Clone)]
pub struct SimulatedSinkFactory {
    clock: Arc<dyn Clock>,
    /// Playback speed relative to the nominal rate (1.0 = exact)
    speed: f64,
}

impl SimulatedSinkFactory {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, speed: 1.0 }
    }

    /// Play faster (> 1.0) or slower (< 1.0) than the nominal rate
    ///
    /// Models a device whose clock drifts from the game's.
    pub fn with_speed(mut self, speed: f64) -> Self {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        }
        self
    }
}

impl Default for SimulatedSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for SimulatedSinkFactory {
    fn open(
        &self,
        format: SinkFormat,
        tracker: Arc<DeviceQueueTracker>,
    ) -> AudioResult<Box<dyn AudioSink>> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(AudioError::ConfigError(format!(
                "unsupported format: {}Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let (tx, rx) = bounded(format.buffer_count.max(1));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        let player = Player {
            rx,
            clock: self.clock.clone(),
            frames_per_second: format.sample_rate as f64 * self.speed,
            channels: format.channels as usize,
            outstanding: outstanding.clone(),
            stopped: stopped.clone(),
            tracker,
        };
        let handle = thread::Builder::new()
            .name("simulated-device".to_string())
            .spawn(move || player.run())
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        log::info!(
            "Simulated device: {}Hz x{:.3}, {} buffers of {} frames",
            format.sample_rate,
            self.speed,
            format.buffer_count,
            format.buffer_frames
        );

        Ok(Box::new(SimulatedSink {
            tx: Some(tx),
            outstanding,
            stopped,
            handle: Some(handle),
            sample_rate: format.sample_rate,
        }))
    }
}

struct SimulatedSink {
    tx: Option<Sender<Vec<f32>>>,
    outstanding: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl AudioSink for SimulatedSink {
    fn enqueue(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Stopped)?;
        if samples.is_empty() {
            return Err(SinkError::Backend("empty buffer".to_string()));
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        match tx.try_send(samples.to_vec()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                match e {
                    TrySendError::Full(_) => Err(SinkError::QueueFull),
                    TrySendError::Disconnected(_) => Err(SinkError::Stopped),
                }
            }
        }
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Simulated device thread panicked");
            }
            log::debug!("Simulated device stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for SimulatedSink {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Player {
    rx: Receiver<Vec<f32>>,
    clock: Arc<dyn Clock>,
    frames_per_second: f64,
    channels: usize,
    outstanding: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    tracker: Arc<DeviceQueueTracker>,
}

impl Player {
    fn run(self) {
        let mut play_until: Option<Instant> = None;

        while let Ok(buffer) = self.rx.recv() {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }

            let frames = buffer.len() / self.channels;
            let duration = Duration::from_secs_f64(frames as f64 / self.frames_per_second);
            // After an underrun playback restarts from now
            let now = self.clock.now();
            let start = match play_until {
                Some(t) if t > now => t,
                _ => now,
            };
            let end = start + duration;
            self.clock.sleep_until(end);
            play_until = Some(end);

            let left = self
                .outstanding
                .fetch_sub(1, Ordering::AcqRel)
                .saturating_sub(1);
            self.tracker.on_buffer_complete(left);
        }
    }
}
