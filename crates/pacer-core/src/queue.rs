//! Producer → consumer hand-off
//!
//! `BoundedAudioQueue` is the only place the emulation thread and the
//! consumer thread meet. The producer side never blocks; backpressure comes
//! from the pacing governor instead. The consumer blocks with a timeout so
//! it keeps observing shutdown requests.
//!
//! ```text
//! ┌──────────────────┐   push() (never blocks)   ┌─────────────────────┐
//! │ Emulation thread │──────────────────────────►│  unbounded channel  │
//! └──────────────────┘                           └──────────┬──────────┘
//!                                                           │ try_pop(timeout)
//!                        shutdown() drops the wake sender   ▼
//!                       ───────────────────────►  ┌─────────────────────┐
//!                                                 │   Consumer thread   │
//!                                                 └─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::types::AudioChunk;

/// Thread-safe FIFO of timestamped PCM chunks
///
/// Capacity is unbounded; a producer that outruns the consumer grows memory
/// rather than losing audio. Insertion order is consumption order.
pub struct BoundedAudioQueue {
    chunk_tx: Sender<AudioChunk>,
    chunk_rx: Receiver<AudioChunk>,
    /// Dropped on shutdown so a blocked `try_pop` wakes immediately
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
    shutdown: AtomicBool,
}

impl BoundedAudioQueue {
    pub fn new() -> Self {
        let (chunk_tx, chunk_rx) = channel::unbounded();
        let (wake_tx, wake_rx) = channel::bounded(0);

        Self {
            chunk_tx,
            chunk_rx,
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Append a chunk (non-blocking)
    ///
    /// Returns the chunk back once shutdown has begun.
    pub fn push(&self, chunk: AudioChunk) -> Result<(), AudioChunk> {
        if self.is_shutdown() {
            return Err(chunk);
        }
        self.chunk_tx.send(chunk).map_err(|e| e.into_inner())
    }

    /// Take the oldest chunk, waiting up to `timeout`
    ///
    /// `None` on timeout or once shutdown is requested. A timeout is normal
    /// idle behaviour, not an error.
    pub fn try_pop(&self, timeout: Duration) -> Option<AudioChunk> {
        if self.is_shutdown() {
            return None;
        }

        crossbeam::select! {
            recv(self.chunk_rx) -> chunk => chunk.ok(),
            recv(self.wake_rx) -> _ => None,
            default(timeout) => None,
        }
    }

    /// Number of chunks waiting
    pub fn len(&self) -> usize {
        self.chunk_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_rx.is_empty()
    }

    /// Stop accepting pushes and wake the consumer (idempotent)
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut wake = match self.wake_tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        wake.take();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Discard everything still queued, returning how many chunks were dropped
    pub fn drain(&self) -> usize {
        self.chunk_rx.try_iter().count()
    }
}

impl Default for BoundedAudioQueue {
    fn default() -> Self {
        Self::new()
    }
}
