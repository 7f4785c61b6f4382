//! Audio pipeline lifecycle
//!
//! [`AudioPipeline`] is the object a host integration owns. It is created
//! once, initialized for a game frequency (and re-initialized whenever that
//! changes) and fed raw PCM chunks from the emulation thread.
//!
//! ```text
//!             ┌────────────── AudioPipeline ───────────────┐
//! submit ───► │ PacingGovernor → BoundedAudioQueue ──────► │ consumer thread
//! (emulation) │      ▲ stalls producer                     │ (engine + device)
//!             │  SpeedControl, HostServices, settings      │
//!             └────────────────────────────────────────────┘
//! ```
//!
//! Re-initialization tears the whole running part down (consumer joined,
//! device stopped, queue and tracker dropped) and builds it again; nothing
//! is reconfigured in place. Any failure while building leaves the pipeline
//! `Disabled`: submissions become no-ops and the host keeps running silent.

use std::sync::Arc;

use crate::config::{AudioSettings, SettingsSource};
use crate::consumer::{
    spawn_consumer, ConsumerConfig, ConsumerHandle, ConsumerKind, ConsumerShared,
    StretchTuningParams,
};
use crate::device::{DeviceOccupancy, DeviceQueueTracker};
use crate::error::{AudioError, AudioResult};
use crate::host::{
    frequency_from_dac_rate, select_output_frequency, HostServices, SpeedControl, SystemType,
    MIN_GAME_FREQUENCY,
};
use crate::pacing::{Clock, PaceOutcome, PacingGovernor, PacingState, SystemClock};
use crate::queue::BoundedAudioQueue;
use crate::sink::{CpalSinkFactory, SinkFactory};
use crate::timestretch::{SignalsmithEngineFactory, StretchEngineFactory};
use crate::types::AudioChunk;

/// Engine and device implementations the pipeline builds on
#[derive(Clone)]
pub struct PipelineBackends {
    pub engines: Arc<dyn StretchEngineFactory>,
    pub sinks: Arc<dyn SinkFactory>,
}

impl PipelineBackends {
    pub fn new(engines: Arc<dyn StretchEngineFactory>, sinks: Arc<dyn SinkFactory>) -> Self {
        Self { engines, sinks }
    }

    /// signalsmith-stretch on a CPAL device (`None` = default output)
    pub fn signalsmith_cpal(device: Option<String>) -> Self {
        Self::new(
            Arc::new(SignalsmithEngineFactory::default()),
            Arc::new(CpalSinkFactory::new(device)),
        )
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not initialized, or shut down
    Idle,
    Running,
    /// Initialization failed; chunks are ignored until shutdown
    Disabled,
}

/// Game and device sample rates of a running pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequencies {
    pub game: u32,
    /// Rate the device actually runs at
    pub output: u32,
}

struct Running {
    consumer: ConsumerHandle,
    queue: Arc<BoundedAudioQueue>,
    tracker: Arc<DeviceQueueTracker>,
    frequencies: Frequencies,
    kind: ConsumerKind,
}

/// Host-facing audio pipeline
pub struct AudioPipeline<C: Clock = SystemClock> {
    host: Arc<dyn HostServices>,
    settings: Arc<dyn SettingsSource>,
    backends: PipelineBackends,
    tuning: StretchTuningParams,
    speed: Arc<SpeedControl>,
    governor: PacingGovernor<C>,
    state: PipelineState,
    running: Option<Running>,
}

impl AudioPipeline<SystemClock> {
    pub fn new(
        host: Arc<dyn HostServices>,
        settings: Arc<dyn SettingsSource>,
        backends: PipelineBackends,
    ) -> Self {
        Self::with_clock(host, settings, backends, SystemClock)
    }
}

impl<C: Clock> AudioPipeline<C> {
    /// Build an idle pipeline pacing against `clock`
    ///
    /// Registers the default of every setting with the host.
    pub fn with_clock(
        host: Arc<dyn HostServices>,
        settings: Arc<dyn SettingsSource>,
        backends: PipelineBackends,
        clock: C,
    ) -> Self {
        AudioSettings::register_defaults(settings.as_ref());
        Self {
            host,
            settings,
            backends,
            tuning: StretchTuningParams::default(),
            speed: Arc::new(SpeedControl::new()),
            governor: PacingGovernor::with_clock(clock),
            state: PipelineState::Idle,
            running: None,
        }
    }

    /// Override the adaptive controller constants for later initializations
    pub fn set_tuning(&mut self, tuning: StretchTuningParams) {
        self.tuning = tuning;
    }

    /// (Re)build the pipeline for `game_frequency`
    ///
    /// Frequencies below 4000Hz are rejected and leave the pipeline as it
    /// was. A disabled pipeline stays disabled until [`shutdown`](Self::shutdown).
    pub fn initialize(&mut self, game_frequency: u32) -> AudioResult<()> {
        if game_frequency < MIN_GAME_FREQUENCY {
            log::warn!("Ignoring invalid game frequency {}Hz", game_frequency);
            return Err(AudioError::InvalidFrequency(game_frequency));
        }
        if self.state == PipelineState::Disabled {
            log::debug!("Audio pipeline disabled, not initializing");
            return Ok(());
        }

        self.teardown();

        let settings = AudioSettings::from_source(self.settings.as_ref());
        match self.build(game_frequency, &settings) {
            Ok(running) => {
                log::info!(
                    "Audio pipeline running: game {}Hz, output {}Hz, {:?} consumer, {} device buffers of {} frames",
                    running.frequencies.game,
                    running.frequencies.output,
                    running.kind,
                    running.tracker.capacity(),
                    settings.secondary_buffer_size
                );
                self.running = Some(running);
                self.state = PipelineState::Running;
                self.governor.request_reset();
                Ok(())
            }
            Err(e) => {
                log::error!("Audio initialization failed, continuing without sound: {}", e);
                self.state = PipelineState::Disabled;
                Err(e)
            }
        }
    }

    fn build(&self, game_frequency: u32, settings: &AudioSettings) -> AudioResult<Running> {
        let output_frequency = select_output_frequency(game_frequency, settings.sampling_rate);
        let queue = Arc::new(BoundedAudioQueue::new());
        let tracker = Arc::new(DeviceQueueTracker::new(
            settings.device_buffer_count as usize,
        ));
        let kind = ConsumerKind::from_stretch_enabled(settings.time_stretch_enabled);

        let consumer = spawn_consumer(
            ConsumerConfig {
                kind,
                game_frequency,
                output_frequency,
                primary_buffer_size: settings.primary_buffer_size as usize,
                secondary_buffer_size: settings.secondary_buffer_size as usize,
                target_secondary_buffers: settings.target_secondary_buffers,
                swap_channels: settings.swap_channels,
                tuning: self.tuning,
            },
            ConsumerShared {
                queue: queue.clone(),
                tracker: tracker.clone(),
                speed: self.speed.clone(),
            },
            self.backends.engines.clone(),
            self.backends.sinks.clone(),
        )?;

        let frequencies = Frequencies {
            game: game_frequency,
            output: consumer.output_frequency(),
        };
        Ok(Running {
            consumer,
            queue,
            tracker,
            frequencies,
            kind,
        })
    }

    fn teardown(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.consumer.shutdown();
            log::info!(
                "Audio pipeline stopped ({} chunks left in queue)",
                running.queue.len()
            );
        }
    }

    /// Stop everything and return to `Idle`
    pub fn shutdown(&mut self) {
        self.teardown();
        self.state = PipelineState::Idle;
    }

    /// Playback speed in percent; values outside 10..=300 are ignored
    pub fn notify_speed_change(&self, percent: u32) {
        if self.speed.set_percent(percent) {
            log::debug!("Playback speed set to {}%", percent);
        }
    }

    /// Re-initialize at the rate programmed into the DAC
    pub fn dac_rate_changed(&mut self, system: SystemType, dac_rate: u32) -> AudioResult<()> {
        let frequency = frequency_from_dac_rate(system, dac_rate);
        log::debug!("DAC rate {} ({:?}) -> {}Hz", dac_rate, system, frequency);
        self.initialize(frequency)
    }

    /// Queue one chunk of raw PCM and pace the calling thread
    ///
    /// Called on the emulation thread for every audio-length change. Returns
    /// `None` (and drops the data) unless the pipeline is running.
    pub fn submit_chunk(&mut self, pcm: &[u8]) -> Option<PaceOutcome> {
        let running = self.running.as_ref()?;

        let limiter = self.host.speed_limiter_enabled();
        let stamp = self.governor.begin_chunk(self.speed.percent(), limiter);
        if stamp.reset {
            running.tracker.reset_processed();
        }

        let chunk = AudioChunk::new(pcm, stamp.time_since_start);
        let frames = chunk.frames();
        if running.queue.push(chunk).is_err() {
            return None;
        }

        Some(self.governor.pace(&stamp, frames, running.frequencies.game))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn occupancy(&self) -> Option<DeviceOccupancy> {
        self.running.as_ref().map(|r| r.tracker.snapshot())
    }

    /// Chunks waiting for the consumer
    pub fn queue_len(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.queue.len())
    }

    pub fn frequencies(&self) -> Option<Frequencies> {
        self.running.as_ref().map(|r| r.frequencies)
    }

    pub fn consumer_kind(&self) -> Option<ConsumerKind> {
        self.running.as_ref().map(|r| r.kind)
    }

    pub fn speed(&self) -> &Arc<SpeedControl> {
        &self.speed
    }

    pub fn pacing(&self) -> &PacingState {
        self.governor.state()
    }
}

impl<C: Clock> Drop for AudioPipeline<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
