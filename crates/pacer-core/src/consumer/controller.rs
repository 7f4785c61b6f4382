//! Occupancy-driven tempo control
//!
//! The controller compares how much game time each chunk carries with how
//! often chunks actually arrive (`base_ratio`), then biases that ratio by
//! the device queue level:
//!
//! | state    | condition                         | adjustment                              |
//! |----------|-----------------------------------|-----------------------------------------|
//! | warm-up  | `total_processed < capacity`      | speed factor                            |
//! | draining | `level > max` (or draining), !dry | `base + (level-min)/(cap-min) × 0.5`    |
//! | dry      | `level < min`                     | `base - 0.05`                           |
//! | healthy  | otherwise                         | `base`                                  |
//!
//! The adopted tempo is clamped strictly inside `(0.2, 3.0)` and quantized
//! to 4% steps.

use crate::device::DeviceOccupancy;

use super::window::MovingWindow;

/// Tunable constants of the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchTuningParams {
    /// Storage size of the averaging windows
    pub max_window: usize,
    /// Window length at the reference chunk duration
    pub reference_window: usize,
    /// Game time of a typical chunk (one video frame), in seconds
    pub reference_chunk_duration: f64,
    /// Tempo added when the device queue is completely full
    pub max_speed_up_rate: f64,
    /// Tempo removed when the device queue runs dry
    pub slow_rate: f64,
    /// Quantization step of the adopted tempo
    pub tempo_step: f64,
    /// Exclusive lower tempo bound
    pub min_tempo: f64,
    /// Exclusive upper tempo bound
    pub max_tempo: f64,
}

impl Default for StretchTuningParams {
    fn default() -> Self {
        Self {
            max_window: 500,
            reference_window: 50,
            reference_chunk_duration: 0.01666,
            max_speed_up_rate: 0.5,
            slow_rate: 0.05,
            tempo_step: 0.04,
            min_tempo: 0.2,
            max_tempo: 3.0,
        }
    }
}

/// Nominal output rate the buffer targets are expressed in
const REFERENCE_OUTPUT_FREQUENCY: f64 = 33600.0;

/// Nominal device buffer size the targets are expressed in
const REFERENCE_SECONDARY_BUFFER_SIZE: f64 = 256.0;

/// Buffers above the target tolerated before draining
const DRAIN_MARGIN: f64 = 30.0;

/// Slots kept free below the device capacity
const CAPACITY_HEADROOM: usize = 20;

/// Device queue levels bracketing the healthy range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueThresholds {
    /// Below this the device is about to run dry
    pub min: usize,
    /// Above this the backlog is drained
    pub max: usize,
}

impl QueueThresholds {
    /// Scale the target buffer count to the output rate and buffer size
    ///
    /// Targets are expressed for 256-frame buffers at 33600Hz; smaller
    /// buffers or faster output need proportionally more of them.
    pub fn derive(
        output_frequency: u32,
        secondary_buffer_size: usize,
        target_buffers: u32,
        capacity: usize,
    ) -> Self {
        let multiplier = (output_frequency as f64 / REFERENCE_OUTPUT_FREQUENCY)
            * (REFERENCE_SECONDARY_BUFFER_SIZE / secondary_buffer_size.max(1) as f64);
        let limit = capacity.saturating_sub(CAPACITY_HEADROOM);

        let max = (((target_buffers as f64 + DRAIN_MARGIN) * multiplier) as usize).min(limit);
        let min = ((target_buffers as f64 * multiplier) as usize).min(max);
        Self { min, max }
    }
}

/// Which branch produced a tempo decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoPhase {
    WarmUp,
    Draining,
    Dry,
    Healthy,
}

/// Outcome of one controller step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoDecision {
    pub phase: TempoPhase,
    pub queue_level: usize,
    /// Average chunk game time over average feed interval
    pub base_ratio: f64,
    /// Raw adjustment before clamping and quantization
    pub adjustment: f64,
    /// Tempo to run the engine at
    pub tempo: f64,
    /// Tempo differs from the previous decision
    pub changed: bool,
}

/// Clamp into the open tempo interval and round to the step grid
///
/// The result is always a whole number of steps strictly inside
/// `(min_tempo, max_tempo)`: `[0.24, 2.96]` with the defaults. Non-finite
/// input is treated as 1.0.
pub fn quantize_tempo(value: f64, params: &StretchTuningParams) -> f64 {
    let value = if value.is_finite() { value } else { 1.0 };
    let step = params.tempo_step;

    let lowest = ((params.min_tempo / step) + 1e-6).floor() + 1.0;
    let highest = ((params.max_tempo / step) - 1e-6).ceil() - 1.0;
    let steps = (value / step).round().clamp(lowest, highest);

    steps * step
}

/// Tempo controller of the adaptive consumer
#[derive(Debug, Clone)]
pub struct StretchController {
    params: StretchTuningParams,
    thresholds: QueueThresholds,
    capacity: usize,
    feed_intervals: MovingWindow,
    game_times: MovingWindow,
    average_feed_interval: f64,
    average_game_time: f64,
    prev_time_since_start: f64,
    draining: bool,
    tempo: f64,
}

impl StretchController {
    pub fn new(params: StretchTuningParams, thresholds: QueueThresholds, capacity: usize) -> Self {
        Self {
            params,
            thresholds,
            capacity,
            feed_intervals: MovingWindow::new(params.max_window, params.reference_window),
            game_times: MovingWindow::new(params.max_window, params.reference_window),
            average_feed_interval: params.reference_chunk_duration,
            average_game_time: params.reference_chunk_duration,
            prev_time_since_start: 0.0,
            draining: false,
            tempo: 1.0,
        }
    }

    /// Pick the tempo for the chunk about to be processed
    ///
    /// `occupancy` is sampled before the chunk is dequeued. `speed_factor`
    /// only matters during warm-up; afterwards it is already reflected in
    /// how fast chunks arrive.
    pub fn decide(&mut self, occupancy: &DeviceOccupancy, speed_factor: f64) -> TempoDecision {
        let level = occupancy.queue_level();
        let base_ratio = self.base_ratio();

        if occupancy.total_processed < self.capacity as u64 {
            let changed = (speed_factor - self.tempo).abs() > f64::EPSILON;
            self.tempo = speed_factor;
            return TempoDecision {
                phase: TempoPhase::WarmUp,
                queue_level: level,
                base_ratio,
                adjustment: speed_factor,
                tempo: speed_factor,
                changed,
            };
        }

        let ran_dry = level < self.thresholds.min;
        let (phase, adjustment) = if (level > self.thresholds.max || self.draining) && !ran_dry {
            if !self.draining {
                log::debug!("Device queue at {}, draining backlog", level);
            }
            self.draining = true;
            let span = self.capacity.saturating_sub(self.thresholds.min).max(1) as f64;
            let excess = level.saturating_sub(self.thresholds.min) as f64;
            (
                TempoPhase::Draining,
                base_ratio + excess / span * self.params.max_speed_up_rate,
            )
        } else if ran_dry {
            if self.draining {
                log::debug!("Device queue at {}, drain finished", level);
            }
            self.draining = false;
            (TempoPhase::Dry, base_ratio - self.params.slow_rate)
        } else {
            (TempoPhase::Healthy, base_ratio)
        };

        let tempo = quantize_tempo(adjustment, &self.params);
        let changed = (tempo - self.tempo).abs() > 1e-9;
        self.tempo = tempo;

        TempoDecision {
            phase,
            queue_level: level,
            base_ratio,
            adjustment,
            tempo,
            changed,
        }
    }

    /// Record the arrival of a processed chunk
    ///
    /// `time_since_start` is the chunk's stamp; a stamp earlier than the
    /// previous one means the pacing origin was reset, and no feed interval
    /// is recorded for it.
    pub fn record_chunk(&mut self, time_since_start: f64, game_time: f64) {
        let interval = time_since_start - self.prev_time_since_start;
        self.prev_time_since_start = time_since_start;

        if interval >= 0.0 {
            self.feed_intervals.push(interval);
        }
        self.game_times.push(game_time);

        if let Some(avg) = self.feed_intervals.average() {
            self.average_feed_interval = avg;
        }
        if let Some(avg) = self.game_times.average() {
            self.average_game_time = avg;
        }

        // Keep roughly the same wall-clock horizon whatever the chunk size
        if self.average_game_time > 0.0 {
            let len = self.params.reference_window as f64 * self.params.reference_chunk_duration
                / self.average_game_time;
            let len = len.min(self.params.max_window as f64) as usize;
            self.feed_intervals.set_len(len);
            self.game_times.set_len(len);
        }
    }

    /// Game time per chunk over the real interval between chunks, 1.0 if undefined
    pub fn base_ratio(&self) -> f64 {
        let ratio = self.average_game_time / self.average_feed_interval;
        if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        }
    }

    pub fn average_feed_interval(&self) -> f64 {
        self.average_feed_interval
    }

    pub fn average_game_time(&self) -> f64 {
        self.average_game_time
    }

    pub fn window_len(&self) -> usize {
        self.game_times.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Tempo of the latest decision
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn thresholds(&self) -> QueueThresholds {
        self.thresholds
    }

    pub fn params(&self) -> &StretchTuningParams {
        &self.params
    }
}
