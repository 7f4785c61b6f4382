//! Consumer thread
//!
//! Exactly one consumer drains the chunk queue, feeds the stretch engine and
//! submits its output to the device.
//!
//! ```text
//!  Producer ──push──► BoundedAudioQueue ──try_pop(1s)──► Consumer Thread
//!                                                        │  ChunkProcessor
//!                                                        │   normalize → engine
//!                                                        │   → device buffers
//!                                                        ▼
//!                                          Sink ◄──enqueue── round-robin pool
//! ```
//!
//! The engine and the sink are realized on the consumer thread itself (the
//! device stream may not be `Send`). [`spawn_consumer`] waits until the
//! worker reports that both are ready, or why they are not.

mod adaptive;
mod controller;
mod fixed;
mod processor;
mod window;

pub use adaptive::AdaptiveStretchConsumer;
pub use controller::{
    quantize_tempo, QueueThresholds, StretchController, StretchTuningParams, TempoDecision,
    TempoPhase,
};
pub use fixed::FixedTempoConsumer;
pub use processor::{ChunkProcessor, ProcessOutcome, ProcessorConfig};
pub use window::MovingWindow;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::bounded;

use crate::device::DeviceQueueTracker;
use crate::error::{AudioError, AudioResult};
use crate::host::SpeedControl;
use crate::queue::BoundedAudioQueue;
use crate::sink::{SinkFactory, SinkFormat};
use crate::timestretch::StretchEngineFactory;
use crate::types::{BYTES_PER_FRAME, CHANNELS};

/// How long a consumer blocks on the queue before re-checking shutdown
pub const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Which consumer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    /// Occupancy-driven tempo correction
    Adaptive,
    /// Speed factor only
    FixedTempo,
}

impl ConsumerKind {
    pub fn from_stretch_enabled(enabled: bool) -> Self {
        if enabled {
            ConsumerKind::Adaptive
        } else {
            ConsumerKind::FixedTempo
        }
    }
}

/// Everything a consumer needs to set itself up
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub kind: ConsumerKind,
    pub game_frequency: u32,
    /// Requested device rate; the device may pick another
    pub output_frequency: u32,
    /// Largest accepted chunk, in frames
    pub primary_buffer_size: usize,
    /// Frames per device buffer
    pub secondary_buffer_size: usize,
    pub target_secondary_buffers: u32,
    pub swap_channels: bool,
    pub tuning: StretchTuningParams,
}

/// State shared between the producer side and the consumer thread
#[derive(Clone)]
pub struct ConsumerShared {
    pub queue: Arc<BoundedAudioQueue>,
    pub tracker: Arc<DeviceQueueTracker>,
    pub speed: Arc<SpeedControl>,
}

/// Handle to a running consumer thread
///
/// Dropping it shuts the queue down and joins the thread.
pub struct ConsumerHandle {
    queue: Arc<BoundedAudioQueue>,
    thread: Option<JoinHandle<()>>,
    output_frequency: u32,
}

impl ConsumerHandle {
    /// Rate the device actually runs at
    pub fn output_frequency(&self) -> u32 {
        self.output_frequency
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Request shutdown and wait for the thread to stop the device
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio consumer thread panicked");
            }
        }
    }

    /// Join a worker that failed to start, leaving the queue usable
    fn join_failed(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Worker {
    Adaptive(AdaptiveStretchConsumer),
    Fixed(FixedTempoConsumer),
}

impl Worker {
    fn output_frequency(&self) -> u32 {
        match self {
            Worker::Adaptive(c) => c.processor().output_frequency(),
            Worker::Fixed(c) => c.processor().output_frequency(),
        }
    }

    fn run(self, queue: &BoundedAudioQueue) {
        match self {
            Worker::Adaptive(c) => c.run(queue),
            Worker::Fixed(c) => c.run(queue),
        }
    }
}

/// Realize the engine and the device for a consumer
fn realize(
    config: &ConsumerConfig,
    shared: &ConsumerShared,
    engines: &dyn StretchEngineFactory,
    sinks: &dyn SinkFactory,
) -> AudioResult<Worker> {
    let mut engine = engines.create()?;
    engine.configure(config.game_frequency, CHANNELS as u32)?;

    let capacity = shared.tracker.capacity();
    let sink = sinks.open(
        SinkFormat {
            sample_rate: config.output_frequency,
            channels: CHANNELS as u16,
            buffer_frames: config.secondary_buffer_size,
            buffer_count: capacity,
        },
        shared.tracker.clone(),
    )?;

    let output_frequency = sink.sample_rate();
    engine.set_rate(config.game_frequency as f64 / output_frequency as f64);
    engine.set_tempo(shared.speed.factor());

    let processor = ChunkProcessor::new(
        engine,
        sink,
        shared.tracker.clone(),
        ProcessorConfig {
            primary_buffer_bytes: config.primary_buffer_size * BYTES_PER_FRAME,
            secondary_buffer_frames: config.secondary_buffer_size,
            pool_size: capacity,
            swap_channels: config.swap_channels,
        },
    );

    Ok(match config.kind {
        ConsumerKind::Adaptive => {
            let thresholds = QueueThresholds::derive(
                output_frequency,
                config.secondary_buffer_size,
                config.target_secondary_buffers,
                capacity,
            );
            let controller = StretchController::new(config.tuning, thresholds, capacity);
            Worker::Adaptive(AdaptiveStretchConsumer::new(
                processor,
                controller,
                shared.speed.clone(),
                config.game_frequency,
            ))
        }
        ConsumerKind::FixedTempo => {
            Worker::Fixed(FixedTempoConsumer::new(processor, shared.speed.clone()))
        }
    })
}

/// Start the consumer thread
///
/// Returns once the engine and the device are realized. If either fails the
/// thread has already exited and the error is returned.
pub fn spawn_consumer(
    config: ConsumerConfig,
    shared: ConsumerShared,
    engines: Arc<dyn StretchEngineFactory>,
    sinks: Arc<dyn SinkFactory>,
) -> AudioResult<ConsumerHandle> {
    let (ready_tx, ready_rx) = bounded::<AudioResult<u32>>(1);
    let queue = shared.queue.clone();

    let thread = thread::Builder::new()
        .name("audio-consumer".to_string())
        .spawn(move || {
            let worker = match realize(&config, &shared, engines.as_ref(), sinks.as_ref()) {
                Ok(worker) => worker,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(worker.output_frequency()));
            worker.run(&shared.queue);
        })
        .map_err(|e| AudioError::ConsumerSpawn(e.to_string()))?;

    let ready = ready_rx.recv();
    let mut handle = ConsumerHandle {
        queue,
        thread: Some(thread),
        output_frequency: 0,
    };

    match ready {
        Ok(Ok(output_frequency)) => {
            handle.output_frequency = output_frequency;
            Ok(handle)
        }
        Ok(Err(e)) => {
            handle.join_failed();
            Err(e)
        }
        Err(_) => {
            handle.join_failed();
            Err(AudioError::ConsumerSpawn(
                "consumer exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Test doubles shared by the consumer and pipeline tests
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex, MutexGuard};

    use crate::device::DeviceQueueTracker;
    use crate::error::{AudioError, AudioResult, SinkError};
    use crate::sink::{AudioSink, SinkFactory, SinkFormat};
    use crate::timestretch::TimeStretchEngine;
    use crate::types::AudioChunk;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap()
    }

    /// 16-bit stereo PCM of `frames` frames
    pub fn pcm_chunk(frames: usize, time_since_start: f64) -> AudioChunk {
        let bytes: Vec<u8> = (0..frames)
            .flat_map(|i| {
                let s = (i % 128) as i16 * 64;
                let mut frame = s.to_le_bytes().to_vec();
                frame.extend_from_slice(&(-s).to_le_bytes());
                frame
            })
            .collect();
        AudioChunk::new(&bytes, time_since_start)
    }

    #[derive(Default)]
    struct EngineState {
        tempos: Vec<f64>,
        rates: Vec<f64>,
        configured: Option<(u32, u32)>,
    }

    /// What a [`RecordingEngine`] was told
    #[derive(Clone, Default)]
    pub struct EngineLog(Arc<Mutex<EngineState>>);

    impl EngineLog {
        pub fn tempos(&self) -> Vec<f64> {
            lock(&self.0).tempos.clone()
        }

        pub fn rates(&self) -> Vec<f64> {
            lock(&self.0).rates.clone()
        }

        pub fn configured(&self) -> Option<(u32, u32)> {
            lock(&self.0).configured
        }
    }

    /// Pass-through engine that logs its settings
    pub struct RecordingEngine {
        log: EngineLog,
        pending: Vec<f32>,
        tempo: f64,
        rate: f64,
    }

    impl RecordingEngine {
        pub fn boxed(log: EngineLog) -> Box<dyn TimeStretchEngine> {
            Box::new(Self {
                log,
                pending: Vec::new(),
                tempo: 1.0,
                rate: 1.0,
            })
        }
    }

    impl TimeStretchEngine for RecordingEngine {
        fn configure(&mut self, sample_rate: u32, channels: u32) -> AudioResult<()> {
            lock(&self.log.0).configured = Some((sample_rate, channels));
            Ok(())
        }

        fn set_tempo(&mut self, tempo: f64) {
            self.tempo = tempo;
            lock(&self.log.0).tempos.push(tempo);
        }

        fn set_rate(&mut self, rate: f64) {
            self.rate = rate;
            lock(&self.log.0).rates.push(rate);
        }

        fn tempo(&self) -> f64 {
            self.tempo
        }

        fn rate(&self) -> f64 {
            self.rate
        }

        fn put_samples(&mut self, samples: &[f32]) {
            self.pending.extend_from_slice(samples);
        }

        fn receive_samples(&mut self, out: &mut [f32], max_frames: usize) -> usize {
            let frames = max_frames.min(out.len() / 2).min(self.pending.len() / 2);
            out[..frames * 2].copy_from_slice(&self.pending[..frames * 2]);
            self.pending.drain(..frames * 2);
            frames
        }

        fn clear(&mut self) {
            self.pending.clear();
        }
    }

    #[derive(Default)]
    struct SinkState {
        buffers: Vec<Vec<f32>>,
        failing: bool,
        stopped: bool,
        opened: usize,
    }

    /// What a [`RecordingSink`] received
    #[derive(Clone, Default)]
    pub struct SinkLog(Arc<Mutex<SinkState>>);

    impl SinkLog {
        pub fn buffers(&self) -> Vec<Vec<f32>> {
            lock(&self.0).buffers.clone()
        }

        pub fn set_failing(&self, failing: bool) {
            lock(&self.0).failing = failing;
        }

        pub fn stopped(&self) -> bool {
            lock(&self.0).stopped
        }

        pub fn opened(&self) -> usize {
            lock(&self.0).opened
        }
    }

    /// Device that never plays; buffers stay outstanding
    pub struct RecordingSink {
        log: SinkLog,
        sample_rate: u32,
    }

    impl RecordingSink {
        pub fn boxed(log: SinkLog, sample_rate: u32) -> Box<dyn AudioSink> {
            Box::new(Self { log, sample_rate })
        }
    }

    impl AudioSink for RecordingSink {
        fn enqueue(&mut self, samples: &[f32]) -> Result<(), SinkError> {
            let mut state = lock(&self.log.0);
            if state.stopped {
                return Err(SinkError::Stopped);
            }
            if state.failing {
                return Err(SinkError::Backend("rejected".to_string()));
            }
            state.buffers.push(samples.to_vec());
            Ok(())
        }

        fn stop(&mut self) {
            lock(&self.log.0).stopped = true;
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    /// Opens [`RecordingSink`]s sharing one log
    pub struct RecordingSinkFactory {
        pub log: SinkLog,
        /// Fail `open` instead of realizing a sink
        pub unavailable: bool,
    }

    impl RecordingSinkFactory {
        pub fn new(log: SinkLog) -> Self {
            Self {
                log,
                unavailable: false,
            }
        }
    }

    impl SinkFactory for RecordingSinkFactory {
        fn open(
            &self,
            format: SinkFormat,
            _tracker: Arc<DeviceQueueTracker>,
        ) -> AudioResult<Box<dyn AudioSink>> {
            if self.unavailable {
                return Err(AudioError::NoDevice);
            }
            {
                let mut state = lock(&self.log.0);
                state.opened += 1;
                state.stopped = false;
            }
            Ok(RecordingSink::boxed(self.log.clone(), format.sample_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{pcm_chunk, EngineLog, RecordingEngine, RecordingSinkFactory, SinkLog};
    use super::*;
    use crate::timestretch::TimeStretchEngine;
    use std::time::Instant;

    fn config(kind: ConsumerKind) -> ConsumerConfig {
        ConsumerConfig {
            kind,
            game_frequency: 32000,
            output_frequency: 44100,
            primary_buffer_size: 16384,
            secondary_buffer_size: 256,
            target_secondary_buffers: 20,
            swap_channels: false,
            tuning: StretchTuningParams::default(),
        }
    }

    fn shared() -> ConsumerShared {
        ConsumerShared {
            queue: Arc::new(BoundedAudioQueue::new()),
            tracker: Arc::new(DeviceQueueTracker::new(100)),
            speed: Arc::new(SpeedControl::new()),
        }
    }

    fn engines(log: EngineLog) -> Arc<dyn StretchEngineFactory> {
        Arc::new(move || -> AudioResult<Box<dyn TimeStretchEngine>> {
            Ok(RecordingEngine::boxed(log.clone()))
        })
    }

    #[test]
    fn test_spawn_configures_engine_on_worker() {
        let engine_log = EngineLog::default();
        let sink_log = SinkLog::default();
        let shared = shared();
        shared.speed.set_percent(120);

        let mut handle = spawn_consumer(
            config(ConsumerKind::Adaptive),
            shared.clone(),
            engines(engine_log.clone()),
            Arc::new(RecordingSinkFactory::new(sink_log.clone())),
        )
        .unwrap();

        assert_eq!(handle.output_frequency(), 44100);
        assert_eq!(engine_log.configured(), Some((32000, 2)));
        assert_eq!(engine_log.rates(), vec![32000.0 / 44100.0]);
        assert_eq!(engine_log.tempos(), vec![1.2]);
        assert!(handle.is_running());

        handle.shutdown();
        assert!(sink_log.stopped());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_worker_processes_queued_chunks() {
        let sink_log = SinkLog::default();
        let shared = shared();
        let mut handle = spawn_consumer(
            config(ConsumerKind::FixedTempo),
            shared.clone(),
            engines(EngineLog::default()),
            Arc::new(RecordingSinkFactory::new(sink_log.clone())),
        )
        .unwrap();

        for i in 0..3 {
            shared.queue.push(pcm_chunk(256, i as f64 * 0.008)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while shared.tracker.snapshot().total_processed < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink_log.buffers().len(), 3);
        assert_eq!(shared.tracker.snapshot().total_processed, 3);

        // Shutdown wakes the blocked pop immediately
        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < POP_TIMEOUT);
    }

    #[test]
    fn test_device_failure_reported() {
        let mut sinks = RecordingSinkFactory::new(SinkLog::default());
        sinks.unavailable = true;

        let result = spawn_consumer(
            config(ConsumerKind::Adaptive),
            shared(),
            engines(EngineLog::default()),
            Arc::new(sinks),
        );
        assert!(matches!(result, Err(AudioError::NoDevice)));
    }

    #[test]
    fn test_kind_from_setting() {
        assert_eq!(ConsumerKind::from_stretch_enabled(true), ConsumerKind::Adaptive);
        assert_eq!(ConsumerKind::from_stretch_enabled(false), ConsumerKind::FixedTempo);
    }
}
