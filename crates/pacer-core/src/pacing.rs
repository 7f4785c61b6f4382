//! Producer-side pacing
//!
//! The emulation thread produces audio in bursts at whatever speed the core
//! happens to run. When the host's speed limiter is on, `PacingGovernor`
//! stalls the producer after every chunk so that emulated game time tracks
//! wall-clock time:
//!
//! ```text
//! game_time   = total_samples / game_frequency / speed
//! sleep       = game_time - wall_time_since_origin
//!
//!   sleep < -5s  or  sleep > 0.5s/speed   → origin is stale, reset on next chunk
//!   sleep < -0.1s                         → forgive 0.1s of catch-up debt
//!   0 < sleep < 0.5s/speed                → stall for `sleep`
//! ```
//!
//! Stalls use a coarse sleep by default and switch to spinning once the
//! producer has been behind schedule for a run of chunks (the OS sleep
//! granularity is then too coarse for the buffer durations involved).

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Drift below which the pacing origin is considered stale (seconds)
pub const RESET_DRIFT: f64 = -5.0;

/// Drift below which catch-up debt is forgiven (seconds)
pub const RUNAWAY_DRIFT: f64 = -0.1;

/// Longest stall worth honouring at 100% speed (seconds)
pub const MAX_SLEEP: f64 = 0.5;

/// Consecutive observations needed to switch wait mode
pub const WAIT_MODE_HYSTERESIS: u32 = 30;

/// Time source and waiting primitives
///
/// Injected so pacing can be driven by a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Block the calling thread until `deadline` (coarse, scheduler-driven)
    fn sleep_until(&self, deadline: Instant);

    /// Spin until `deadline` (precise, burns CPU)
    fn spin_until(&self, deadline: Instant);
}

/// Monotonic system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }

    fn spin_until(&self, deadline: Instant) {
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep_until(&self, deadline: Instant) {
        (**self).sleep_until(deadline)
    }

    fn spin_until(&self, deadline: Instant) {
        (**self).spin_until(deadline)
    }
}

/// How the governor stalls, with the hysteresis streak that guards leaving
/// the current mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Sleep until the deadline; counts consecutive chunks with no slack
    Coarse { negative_streak: u32 },
    /// Spin until the deadline; counts consecutive chunks with slack
    Precise { positive_streak: u32 },
}

impl Default for WaitMode {
    fn default() -> Self {
        WaitMode::Coarse { negative_streak: 0 }
    }
}

impl WaitMode {
    pub fn is_precise(&self) -> bool {
        matches!(self, WaitMode::Precise { .. })
    }

    /// Advance the state machine with one observation of `sleep_needed`
    fn observe(self, sleep_needed: f64) -> Self {
        match self {
            WaitMode::Coarse { negative_streak } => {
                let streak = if sleep_needed <= 0.0 {
                    negative_streak + 1
                } else {
                    0
                };
                if streak >= WAIT_MODE_HYSTERESIS {
                    log::debug!("Pacing: switching to precise (spin) waits");
                    WaitMode::Precise { positive_streak: 0 }
                } else {
                    WaitMode::Coarse {
                        negative_streak: streak,
                    }
                }
            }
            WaitMode::Precise { positive_streak } => {
                let streak = if sleep_needed > 0.0 {
                    positive_streak + 1
                } else {
                    0
                };
                if streak >= WAIT_MODE_HYSTERESIS {
                    log::debug!("Pacing: switching back to coarse waits");
                    WaitMode::Coarse { negative_streak: 0 }
                } else {
                    WaitMode::Precise {
                        positive_streak: streak,
                    }
                }
            }
        }
    }
}

/// Per-run pacing state
#[derive(Debug, Clone, Default)]
pub struct PacingState {
    total_elapsed_samples: u64,
    game_start_time: Option<Instant>,
    last_speed_percent: u32,
    last_limiter_enabled: bool,
    reset_pending: bool,
    mode: WaitMode,
}

impl PacingState {
    pub fn total_elapsed_samples(&self) -> u64 {
        self.total_elapsed_samples
    }

    /// Wall-clock origin of the current run (None before the first chunk)
    pub fn game_start_time(&self) -> Option<Instant> {
        self.game_start_time
    }

    pub fn mode(&self) -> WaitMode {
        self.mode
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }
}

/// Timestamp handed to a new chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkStamp {
    /// Seconds between the pacing origin and this chunk
    pub time_since_start: f64,
    /// Wall-clock instant the chunk was stamped
    pub started_at: Instant,
    /// The pacing origin was reset for this chunk
    pub reset: bool,
}

/// What `pace` did with the producer thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaceAction {
    /// Speed limiter off; emulation runs free
    Unthrottled,
    /// Stalled the producer
    Waited { duration: Duration, precise: bool },
    /// Nothing to wait for (behind schedule, or no usable frequency)
    Skipped,
    /// Drift out of bounds; the origin is reset with the next chunk
    ResetScheduled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceOutcome {
    /// Game time minus wall time, in seconds (0 when unthrottled)
    pub sleep_needed: f64,
    pub action: PaceAction,
}

/// Wall-clock governor for the emulation thread
pub struct PacingGovernor<C: Clock = SystemClock> {
    clock: C,
    state: PacingState,
}

impl PacingGovernor<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PacingGovernor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> PacingGovernor<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            state: PacingState::default(),
        }
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Force an origin reset with the next chunk
    pub fn request_reset(&mut self) {
        self.state.reset_pending = true;
    }

    /// Stamp a new chunk, resetting the origin when required
    ///
    /// The origin is reset on the first chunk, on any change of speed or
    /// limiter state, and after `pace` flagged out-of-bounds drift.
    pub fn begin_chunk(&mut self, speed_percent: u32, limiter_enabled: bool) -> ChunkStamp {
        let now = self.clock.now();
        let state = &mut self.state;

        let origin = match state.game_start_time {
            Some(origin)
                if !state.reset_pending
                    && state.last_speed_percent == speed_percent
                    && state.last_limiter_enabled == limiter_enabled =>
            {
                Some(origin)
            }
            _ => None,
        };

        match origin {
            Some(origin) => ChunkStamp {
                time_since_start: now.saturating_duration_since(origin).as_secs_f64(),
                started_at: now,
                reset: false,
            },
            None => {
                log::debug!(
                    "Pacing origin reset (speed {}%, limiter {})",
                    speed_percent,
                    if limiter_enabled { "on" } else { "off" }
                );
                state.game_start_time = Some(now);
                state.total_elapsed_samples = 0;
                state.reset_pending = false;
                state.last_speed_percent = speed_percent;
                state.last_limiter_enabled = limiter_enabled;
                ChunkStamp {
                    time_since_start: 0.0,
                    started_at: now,
                    reset: true,
                }
            }
        }
    }

    /// Account for `frames` of game audio and stall the caller if ahead
    ///
    /// Call once per chunk, after it has been queued.
    pub fn pace(&mut self, stamp: &ChunkStamp, frames: usize, game_frequency: u32) -> PaceOutcome {
        let state = &mut self.state;
        state.total_elapsed_samples += frames as u64;

        if !state.last_limiter_enabled {
            return PaceOutcome {
                sleep_needed: 0.0,
                action: PaceAction::Unthrottled,
            };
        }

        if game_frequency == 0 || state.last_speed_percent == 0 {
            return PaceOutcome {
                sleep_needed: 0.0,
                action: PaceAction::Skipped,
            };
        }

        let speed = state.last_speed_percent as f64 / 100.0;
        let total_elapsed_game_time =
            state.total_elapsed_samples as f64 / game_frequency as f64 / speed;
        let sleep_needed = total_elapsed_game_time - stamp.time_since_start;
        let max_sleep = MAX_SLEEP / speed;

        if sleep_needed < RESET_DRIFT || sleep_needed > max_sleep {
            state.reset_pending = true;
        }

        // Never let the game get far behind, or it would burst to catch up
        if sleep_needed < RUNAWAY_DRIFT {
            if let Some(origin) = state.game_start_time.as_mut() {
                *origin += Duration::from_secs_f64(-RUNAWAY_DRIFT);
            }
        }

        state.mode = state.mode.observe(sleep_needed);

        if sleep_needed > 0.0 && sleep_needed < max_sleep {
            let duration = Duration::from_secs_f64(sleep_needed);
            let deadline = stamp.started_at + duration;
            let precise = state.mode.is_precise();
            if precise {
                self.clock.spin_until(deadline);
            } else {
                self.clock.sleep_until(deadline);
            }
            return PaceOutcome {
                sleep_needed,
                action: PaceAction::Waited { duration, precise },
            };
        }

        let action = if state.reset_pending {
            PaceAction::ResetScheduled
        } else {
            PaceAction::Skipped
        };
        PaceOutcome {
            sleep_needed,
            action,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Clock that only moves when told to; waiting jumps straight to the deadline
    pub(crate) struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
        pub sleeps: AtomicUsize,
        pub spins: AtomicUsize,
    }

    impl ManualClock {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: AtomicUsize::new(0),
                spins: AtomicUsize::new(0),
            })
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }

        fn jump_to(&self, deadline: Instant) {
            let mut offset = self.offset.lock().unwrap();
            let target = deadline.saturating_duration_since(self.base);
            if target > *offset {
                *offset = target;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn sleep_until(&self, deadline: Instant) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            self.jump_to(deadline);
        }

        fn spin_until(&self, deadline: Instant) {
            self.spins.fetch_add(1, Ordering::SeqCst);
            self.jump_to(deadline);
        }
    }

    const FREQ: u32 = 32000;
    const FRAMES: usize = 533;

    fn chunk_seconds() -> f64 {
        FRAMES as f64 / FREQ as f64
    }

    #[test]
    fn test_first_chunk_resets_origin() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        let stamp = governor.begin_chunk(100, true);
        assert!(stamp.reset);
        assert_eq!(stamp.time_since_start, 0.0);
        assert_eq!(governor.state().game_start_time(), Some(clock.now()));
    }

    #[test]
    fn test_wall_clock_converges_to_game_time() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        for i in 0..300 {
            let stamp = governor.begin_chunk(100, true);
            assert_eq!(stamp.reset, i == 0);

            // Emulation work between stamping and pacing
            clock.advance(Duration::from_millis(2));
            let outcome = governor.pace(&stamp, FRAMES, FREQ);
            assert!(matches!(outcome.action, PaceAction::Waited { precise: false, .. }));

            let origin = governor.state().game_start_time().unwrap();
            let wall = clock.now().duration_since(origin).as_secs_f64();
            let game = governor.state().total_elapsed_samples() as f64 / FREQ as f64;
            assert!((game - wall).abs() < 1e-6, "drift {} at chunk {}", game - wall, i);
        }
        assert_eq!(clock.spins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_speed_factor_shortens_game_time() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        let stamp = governor.begin_chunk(200, true);
        let outcome = governor.pace(&stamp, FRAMES, FREQ);
        assert!((outcome.sleep_needed - chunk_seconds() / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_schedules_reset_instead_of_stalling() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        for _ in 0..20 {
            let stamp = governor.begin_chunk(100, true);
            governor.pace(&stamp, FRAMES, FREQ);
        }

        // Emulator paused
        clock.advance(Duration::from_secs(6));
        let before = clock.now();
        let stamp = governor.begin_chunk(100, true);
        assert!(!stamp.reset);
        let outcome = governor.pace(&stamp, FRAMES, FREQ);
        assert!(outcome.sleep_needed < RESET_DRIFT);
        assert_eq!(outcome.action, PaceAction::ResetScheduled);
        assert_eq!(clock.now(), before);

        let stamp = governor.begin_chunk(100, true);
        assert!(stamp.reset);
        assert_eq!(stamp.time_since_start, 0.0);
        assert_eq!(governor.state().total_elapsed_samples(), 0);
        assert_eq!(governor.state().game_start_time(), Some(clock.now()));

        let outcome = governor.pace(&stamp, FRAMES, FREQ);
        assert!(matches!(outcome.action, PaceAction::Waited { .. }));
        assert!(outcome.sleep_needed <= chunk_seconds() + 1e-9);
    }

    #[test]
    fn test_oversized_sleep_is_not_waited_on() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        let stamp = governor.begin_chunk(100, true);
        // One second of audio in a single chunk
        let outcome = governor.pace(&stamp, FREQ as usize, FREQ);
        assert_eq!(outcome.action, PaceAction::ResetScheduled);
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
        assert!(governor.state().reset_pending());
    }

    #[test]
    fn test_runaway_guard_forgives_debt() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        let stamp = governor.begin_chunk(100, true);
        governor.pace(&stamp, FRAMES, FREQ);
        let origin = governor.state().game_start_time().unwrap();

        clock.advance(Duration::from_millis(500));
        let stamp = governor.begin_chunk(100, true);
        let outcome = governor.pace(&stamp, FRAMES, FREQ);
        assert!(outcome.sleep_needed < RUNAWAY_DRIFT);
        assert_eq!(outcome.action, PaceAction::Skipped);

        let moved = governor.state().game_start_time().unwrap() - origin;
        assert_eq!(moved, Duration::from_millis(100));
    }

    #[test]
    fn test_speed_and_limiter_changes_force_reset() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        governor.begin_chunk(100, true);
        clock.advance(Duration::from_millis(5));
        assert!(!governor.begin_chunk(100, true).reset);
        assert!(governor.begin_chunk(150, true).reset);
        assert!(!governor.begin_chunk(150, true).reset);
        assert!(governor.begin_chunk(150, false).reset);
    }

    #[test]
    fn test_limiter_off_runs_unthrottled() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());

        for _ in 0..100 {
            let stamp = governor.begin_chunk(100, false);
            let outcome = governor.pace(&stamp, FRAMES, FREQ);
            assert_eq!(outcome.action, PaceAction::Unthrottled);
        }
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
        assert_eq!(governor.state().total_elapsed_samples(), 100 * FRAMES as u64);
        assert_eq!(governor.state().mode(), WaitMode::default());
    }

    #[test]
    fn test_busy_wait_hysteresis() {
        let clock = ManualClock::new();
        let mut governor = PacingGovernor::with_clock(clock.clone());
        let chunk = Duration::from_secs_f64(chunk_seconds());

        let stamp = governor.begin_chunk(100, true);
        governor.pace(&stamp, FRAMES, FREQ);

        // Producer slower than real time: no slack, streak builds up
        for i in 1..WAIT_MODE_HYSTERESIS {
            clock.advance(chunk * 2);
            let stamp = governor.begin_chunk(100, true);
            let outcome = governor.pace(&stamp, FRAMES, FREQ);
            assert!(outcome.sleep_needed <= 0.0);
            assert_eq!(
                governor.state().mode(),
                WaitMode::Coarse { negative_streak: i }
            );
        }
        clock.advance(chunk * 2);
        let stamp = governor.begin_chunk(100, true);
        governor.pace(&stamp, FRAMES, FREQ);
        assert!(governor.state().mode().is_precise());

        // Producer fast again: waits now spin until slack has persisted
        let mut precise_waits = 0;
        for _ in 0..200 {
            let stamp = governor.begin_chunk(100, true);
            let outcome = governor.pace(&stamp, FRAMES, FREQ);
            if let PaceAction::Waited { precise: true, .. } = outcome.action {
                precise_waits += 1;
            }
            if !governor.state().mode().is_precise() {
                break;
            }
        }
        assert_eq!(precise_waits, WAIT_MODE_HYSTERESIS - 1);
        assert!(!governor.state().mode().is_precise());
        assert_eq!(
            clock.spins.load(Ordering::SeqCst),
            WAIT_MODE_HYSTERESIS as usize - 1
        );
    }

    #[test]
    fn test_mode_streak_resets_on_opposite_observation() {
        let mode = WaitMode::Coarse { negative_streak: 29 }.observe(0.01);
        assert_eq!(mode, WaitMode::Coarse { negative_streak: 0 });
        let mode = WaitMode::Precise { positive_streak: 29 }.observe(-0.01);
        assert_eq!(mode, WaitMode::Precise { positive_streak: 0 });
    }
}
