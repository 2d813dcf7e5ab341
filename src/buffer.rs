//! Rolling interval buffer
//!
//! A bounded FIFO window of recent interval samples. Appending is O(1)
//! amortized; the oldest sample is evicted on overflow. The buffer accepts
//! any interval value — bounds validation belongs to the device-parsing
//! collaborator upstream.

use crate::types::IntervalSample;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default buffer capacity in samples
pub const DEFAULT_BUFFER_CAPACITY: usize = 24;

/// Bounded rolling window of interval samples
#[derive(Debug, Clone)]
pub struct IntervalBuffer {
    samples: VecDeque<IntervalSample>,
    capacity: usize,
}

impl Default for IntervalBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl IntervalBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest if at capacity
    pub fn append(&mut self, sample: IntervalSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Read-only ordered view of the buffered samples (oldest first)
    pub fn snapshot(&self) -> Vec<IntervalSample> {
        self.samples.iter().copied().collect()
    }

    /// Interval values only, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value_ms as f64).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean interval over the buffer (ms); None when empty
    pub fn mean_interval_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value_ms as f64).sum();
        Some(sum / self.samples.len() as f64)
    }
}

/// Mutex-guarded buffer for hosts whose acquisition callback runs on a
/// different execution context than the tick driver. Guarantees append and
/// snapshot never interleave.
#[derive(Debug, Clone, Default)]
pub struct SharedIntervalBuffer {
    inner: Arc<Mutex<IntervalBuffer>>,
}

impl SharedIntervalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IntervalBuffer::new(capacity))),
        }
    }

    pub fn append(&self, sample: IntervalSample) {
        let mut buf = self.inner.lock().expect("interval buffer poisoned");
        buf.append(sample);
    }

    pub fn snapshot(&self) -> Vec<IntervalSample> {
        let buf = self.inner.lock().expect("interval buffer poisoned");
        buf.snapshot()
    }

    pub fn len(&self) -> usize {
        let buf = self.inner.lock().expect("interval buffer poisoned");
        buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
