//! Consumer without occupancy feedback

use std::sync::Arc;

use crate::host::SpeedControl;
use crate::queue::BoundedAudioQueue;
use crate::types::AudioChunk;

use super::processor::{ChunkProcessor, ProcessOutcome};
use super::POP_TIMEOUT;

/// Plays at the configured speed; only rate conversion and speed apply
pub struct FixedTempoConsumer {
    processor: ChunkProcessor,
    speed: Arc<SpeedControl>,
    last_percent: u32,
}

impl FixedTempoConsumer {
    /// The processor's engine must already run at the current speed
    pub fn new(processor: ChunkProcessor, speed: Arc<SpeedControl>) -> Self {
        let last_percent = speed.percent();
        Self {
            processor,
            speed,
            last_percent,
        }
    }

    pub fn run(mut self, queue: &BoundedAudioQueue) {
        log::info!("Fixed-tempo consumer started");

        while !queue.is_shutdown() {
            if let Some(chunk) = queue.try_pop(POP_TIMEOUT) {
                self.process_chunk(&chunk);
            }
        }

        let discarded = queue.drain();
        self.processor.stop();
        log::info!(
            "Fixed-tempo consumer stopped ({} queued chunks discarded)",
            discarded
        );
    }

    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> ProcessOutcome {
        let percent = self.speed.percent();
        if percent != self.last_percent {
            log::debug!("Speed changed {}% -> {}%", self.last_percent, percent);
            self.last_percent = percent;
            self.processor.set_tempo(self.speed.factor());
        }

        let outcome = self.processor.process(chunk);
        self.processor.tracker().note_chunk_processed();
        outcome
    }

    pub fn processor(&self) -> &ChunkProcessor {
        &self.processor
    }
}
