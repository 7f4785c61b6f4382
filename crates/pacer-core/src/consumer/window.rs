//! Moving average over a runtime-adjustable window

/// Ring buffer averaging the most recent `len` samples
///
/// Storage is allocated once at `capacity`; the logical length can change
/// every iteration without losing history. Growing the window brings older
/// samples back into the average as long as they are still stored.
#[derive(Debug, Clone)]
pub struct MovingWindow {
    values: Box<[f64]>,
    /// Next write position
    head: usize,
    /// Stored samples, up to capacity
    count: usize,
    len: usize,
}

impl MovingWindow {
    pub fn new(capacity: usize, len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            count: 0,
            len: len.clamp(1, capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        let capacity = self.values.len();
        self.values[self.head] = value;
        self.head = (self.head + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    /// Mean of the valid part of the window, `None` before the first push
    pub fn average(&self) -> Option<f64> {
        let n = self.count.min(self.len);
        if n == 0 {
            return None;
        }
        let capacity = self.values.len();
        let sum: f64 = (1..=n)
            .map(|back| self.values[(self.head + capacity - back) % capacity])
            .sum();
        Some(sum / n as f64)
    }

    /// Change the logical length, clamped to `1..=capacity`
    pub fn set_len(&mut self, len: usize) {
        self.len = len.clamp(1, self.values.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Whether a full window of samples has been recorded
    pub fn is_filled(&self) -> bool {
        self.count >= self.len
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}
