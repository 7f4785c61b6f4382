//! Chunk → engine → device path shared by both consumers

use std::sync::Arc;

use crate::device::DeviceQueueTracker;
use crate::sink::AudioSink;
use crate::timestretch::TimeStretchEngine;
use crate::types::{as_interleaved, as_interleaved_mut, normalize_into, AudioChunk, StereoFrame};

/// Buffer sizing and format options of a [`ChunkProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Chunks this long or longer are dropped
    pub primary_buffer_bytes: usize,
    /// Frames per device buffer
    pub secondary_buffer_frames: usize,
    /// Device buffers in the round-robin pool
    pub pool_size: usize,
    pub swap_channels: bool,
}

/// What happened to one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Frames fed to the engine
    pub frames_in: usize,
    /// Frames submitted to the device
    pub frames_out: usize,
    pub buffers_submitted: usize,
    /// Buffers the device rejected
    pub enqueue_errors: usize,
    /// Buffers produced while the device had no free slot
    pub overflow_drops: usize,
    /// The chunk was too long and was discarded unprocessed
    pub rejected: bool,
}

/// Owns the engine, the realized sink and the buffers between them
pub struct ChunkProcessor {
    engine: Box<dyn TimeStretchEngine>,
    sink: Box<dyn AudioSink>,
    tracker: Arc<DeviceQueueTracker>,
    config: ProcessorConfig,
    /// Normalized input of the current chunk
    primary: Vec<StereoFrame>,
    /// Round-robin device buffers
    pool: Vec<Vec<StereoFrame>>,
    next_buffer: usize,
}

impl ChunkProcessor {
    pub fn new(
        engine: Box<dyn TimeStretchEngine>,
        sink: Box<dyn AudioSink>,
        tracker: Arc<DeviceQueueTracker>,
        config: ProcessorConfig,
    ) -> Self {
        let frames = config.secondary_buffer_frames.max(1);
        let pool = (0..config.pool_size.max(1))
            .map(|_| vec![StereoFrame::silence(); frames])
            .collect();

        Self {
            engine,
            sink,
            tracker,
            config,
            primary: Vec::with_capacity(config.primary_buffer_bytes / 4),
            pool,
            next_buffer: 0,
        }
    }

    /// Feed one chunk and push every available output buffer to the device
    ///
    /// Output produced while the device has no free slot is dropped; a
    /// rejected submission is counted and never retried.
    pub fn process(&mut self, chunk: &AudioChunk) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        if chunk.len() >= self.config.primary_buffer_bytes {
            log::warn!(
                "Audio chunk of {} bytes exceeds the primary buffer ({} bytes), dropping it",
                chunk.len(),
                self.config.primary_buffer_bytes
            );
            outcome.rejected = true;
            return outcome;
        }

        normalize_into(&chunk.data, self.config.swap_channels, &mut self.primary);
        outcome.frames_in = self.primary.len();
        self.engine.put_samples(as_interleaved(&self.primary));

        let frames = self.config.secondary_buffer_frames.max(1);
        loop {
            let buffer = &mut self.pool[self.next_buffer];
            let produced = self
                .engine
                .receive_samples(as_interleaved_mut(buffer), frames);
            if produced == 0 {
                break;
            }

            if !self.tracker.try_reserve() {
                self.tracker.record_overflow_drop();
                outcome.overflow_drops += 1;
                continue;
            }

            match self.sink.enqueue(as_interleaved(&buffer[..produced])) {
                Ok(()) => {
                    outcome.buffers_submitted += 1;
                    outcome.frames_out += produced;
                }
                Err(e) => {
                    self.tracker.release();
                    self.tracker.record_enqueue_error();
                    outcome.enqueue_errors += 1;
                    log::debug!("Buffer submission failed: {}", e);
                }
            }
            self.next_buffer = (self.next_buffer + 1) % self.pool.len();
        }

        if outcome.overflow_drops > 0 {
            log::trace!(
                "Device full, dropped {} output buffers",
                outcome.overflow_drops
            );
        }
        outcome
    }

    pub fn set_tempo(&mut self, tempo: f64) {
        self.engine.set_tempo(tempo);
    }

    pub fn engine(&self) -> &dyn TimeStretchEngine {
        self.engine.as_ref()
    }

    pub fn tracker(&self) -> &Arc<DeviceQueueTracker> {
        &self.tracker
    }

    /// Device rate the output is produced for
    pub fn output_frequency(&self) -> u32 {
        self.sink.sample_rate()
    }

    /// Stop the device; nothing is submitted afterwards
    pub fn stop(&mut self) {
        self.sink.stop();
        self.engine.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::{pcm_chunk, EngineLog, RecordingEngine, RecordingSink, SinkLog};

    fn processor(capacity: usize, log: &SinkLog) -> (ChunkProcessor, Arc<DeviceQueueTracker>) {
        let tracker = Arc::new(DeviceQueueTracker::new(capacity));
        let engine = RecordingEngine::boxed(EngineLog::default());
        let sink = RecordingSink::boxed(log.clone(), 32000);
        let config = ProcessorConfig {
            primary_buffer_bytes: 4096 * 4,
            secondary_buffer_frames: 256,
            pool_size: 4,
            swap_channels: false,
        };
        (
            ChunkProcessor::new(engine, sink, tracker.clone(), config),
            tracker,
        )
    }

    #[test]
    fn test_splits_output_into_device_buffers() {
        let log = SinkLog::default();
        let (mut processor, tracker) = processor(16, &log);

        let outcome = processor.process(&pcm_chunk(600, 0.0));
        assert_eq!(outcome.frames_in, 600);
        assert_eq!(outcome.buffers_submitted, 3);
        assert_eq!(outcome.frames_out, 600);

        let sizes: Vec<usize> = log.buffers().iter().map(|b| b.len() / 2).collect();
        assert_eq!(sizes, vec![256, 256, 88]);
        assert_eq!(tracker.in_flight(), 3);
    }

    #[test]
    fn test_full_device_drops_output() {
        let log = SinkLog::default();
        let (mut processor, tracker) = processor(2, &log);

        let outcome = processor.process(&pcm_chunk(1024, 0.0));
        assert_eq!(outcome.buffers_submitted, 2);
        assert_eq!(outcome.overflow_drops, 2);
        assert_eq!(tracker.in_flight(), 2);
        assert_eq!(tracker.snapshot().overflow_drops, 2);
    }

    #[test]
    fn test_rejected_submission_is_counted() {
        let log = SinkLog::default();
        log.set_failing(true);
        let (mut processor, tracker) = processor(16, &log);

        let outcome = processor.process(&pcm_chunk(300, 0.0));
        assert_eq!(outcome.buffers_submitted, 0);
        assert_eq!(outcome.enqueue_errors, 2);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.snapshot().enqueue_errors, 2);
    }

    #[test]
    fn test_oversized_chunk_dropped() {
        let log = SinkLog::default();
        let (mut processor, _) = processor(16, &log);

        let outcome = processor.process(&pcm_chunk(4096, 0.0));
        assert!(outcome.rejected);
        assert_eq!(outcome.frames_in, 0);
        assert!(log.buffers().is_empty());

        // The next chunk is unaffected
        let outcome = processor.process(&pcm_chunk(100, 0.0));
        assert_eq!(outcome.frames_out, 100);
    }

    #[test]
    fn test_channels_normalized_before_engine() {
        let log = SinkLog::default();
        let (mut processor, _) = processor(16, &log);

        // Native order is right channel first
        let mut bytes = 16384i16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-16384i16).to_le_bytes());
        processor.process(&AudioChunk::new(&bytes, 0.0));

        assert_eq!(log.buffers()[0], vec![-0.5, 0.5]);
    }

    #[test]
    fn test_stop_reaches_sink() {
        let log = SinkLog::default();
        let (mut processor, _) = processor(16, &log);
        processor.stop();
        assert!(log.stopped());
        assert_eq!(processor.output_frequency(), 32000);
    }
}
