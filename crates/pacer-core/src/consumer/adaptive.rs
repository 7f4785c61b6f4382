//! Consumer that adapts tempo to device occupancy

use std::sync::Arc;

use crate::device::DeviceOccupancy;
use crate::host::SpeedControl;
use crate::queue::BoundedAudioQueue;
use crate::types::AudioChunk;

use super::controller::{StretchController, TempoDecision};
use super::processor::ChunkProcessor;
use super::POP_TIMEOUT;

/// Keeps the device queue inside its healthy range by stretching tempo
pub struct AdaptiveStretchConsumer {
    processor: ChunkProcessor,
    controller: StretchController,
    speed: Arc<SpeedControl>,
    game_frequency: u32,
}

impl AdaptiveStretchConsumer {
    pub fn new(
        processor: ChunkProcessor,
        controller: StretchController,
        speed: Arc<SpeedControl>,
        game_frequency: u32,
    ) -> Self {
        Self {
            processor,
            controller,
            speed,
            game_frequency,
        }
    }

    /// Consume until the queue is shut down, then stop the device
    pub fn run(mut self, queue: &BoundedAudioQueue) {
        log::info!(
            "Adaptive consumer started (thresholds {:?})",
            self.controller.thresholds()
        );

        while !queue.is_shutdown() {
            // Occupancy is sampled before waiting for the next chunk
            let occupancy = self.processor.tracker().snapshot();
            if let Some(chunk) = queue.try_pop(POP_TIMEOUT) {
                self.process_chunk(&chunk, &occupancy);
            }
        }

        let discarded = queue.drain();
        self.processor.stop();
        log::info!(
            "Adaptive consumer stopped ({} queued chunks discarded)",
            discarded
        );
    }

    /// One iteration: decide tempo, process, update the averages
    pub fn process_chunk(&mut self, chunk: &AudioChunk, occupancy: &DeviceOccupancy) -> TempoDecision {
        let decision = self.controller.decide(occupancy, self.speed.factor());
        if decision.changed {
            self.processor.set_tempo(decision.tempo);
        }

        self.processor.process(chunk);
        self.processor.tracker().note_chunk_processed();

        self.controller
            .record_chunk(chunk.time_since_start, chunk.game_time(self.game_frequency));

        log::trace!(
            "level={} phase={:?} base={:.3} adj={:.3} tempo={:.2} feed={:.5} game={:.5} window={}",
            decision.queue_level,
            decision.phase,
            decision.base_ratio,
            decision.adjustment,
            decision.tempo,
            self.controller.average_feed_interval(),
            self.controller.average_game_time(),
            self.controller.window_len()
        );
        decision
    }

    pub fn controller(&self) -> &StretchController {
        &self.controller
    }

    pub fn processor(&self) -> &ChunkProcessor {
        &self.processor
    }
}
