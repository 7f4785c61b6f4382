//! Device buffer-queue occupancy
//!
//! The audio device consumes a fixed number of buffer slots. The consumer
//! thread reserves a slot for every submission; the device's completion
//! notification (running on a context this crate does not own, possibly a
//! real-time callback) reports how many submitted buffers are still
//! outstanding. Everything here is atomic so neither side ever blocks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time view of the device queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceOccupancy {
    /// Buffers submitted and not yet played
    pub in_flight: usize,
    /// Number of device buffer slots
    pub capacity: usize,
    /// Chunks processed since the last pacing reset (drives warm-up)
    pub total_processed: u64,
    /// Submissions the device rejected
    pub enqueue_errors: u64,
    /// Engine output discarded because every slot was busy
    pub overflow_drops: u64,
}

impl DeviceOccupancy {
    /// Buffers queued on the device awaiting playback
    #[inline]
    pub fn queue_level(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn has_room(&self) -> bool {
        self.in_flight < self.capacity
    }
}

/// Lock-free tracker shared by the consumer and the device callback
///
/// Invariant: `0 <= in_flight <= capacity` under any interleaving of
/// reservations and completions.
#[derive(Debug)]
pub struct DeviceQueueTracker {
    capacity: usize,
    in_flight: AtomicUsize,
    total_processed: AtomicU64,
    enqueue_errors: AtomicU64,
    overflow_drops: AtomicU64,
}

impl DeviceQueueTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_flight: AtomicUsize::new(0),
            total_processed: AtomicU64::new(0),
            enqueue_errors: AtomicU64::new(0),
            overflow_drops: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    #[inline]
    pub fn queue_level(&self) -> usize {
        self.in_flight()
    }

    #[inline]
    pub fn has_room(&self) -> bool {
        self.in_flight() < self.capacity
    }

    /// Claim a device slot for a submission
    ///
    /// Returns false (and changes nothing) when every slot is occupied.
    pub fn try_reserve(&self) -> bool {
        let capacity = self.capacity;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Give back a slot whose submission failed
    pub fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Completion notification from the device
    ///
    /// `outstanding` is the device's own count of buffers still queued.
    /// Safe to call from a real-time callback.
    pub fn on_buffer_complete(&self, outstanding: usize) {
        self.in_flight
            .store(outstanding.min(self.capacity), Ordering::Release);
    }

    pub fn record_enqueue_error(&self) {
        self.enqueue_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_drop(&self) {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_chunk_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Restart the warm-up count (called on every pacing reset)
    pub fn reset_processed(&self) {
        self.total_processed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceOccupancy {
        DeviceOccupancy {
            in_flight: self.in_flight(),
            capacity: self.capacity,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            enqueue_errors: self.enqueue_errors.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
        }
    }
}
