//! Per-player, time-indexed input log

use std::collections::VecDeque;

use parking_lot::Mutex;

/// One directional input as recorded by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSample {
    /// Match clock, milliseconds
    pub timestamp: u64,
    /// -1, 0 or 1
    pub direction: i8,
}

impl InputSample {
    pub fn new(timestamp: u64, direction: i8) -> Self {
        Self {
            timestamp,
            direction,
        }
    }
}

/// Reasons a sample is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("direction {0} is outside -1..=1")]
    InvalidDirection(i8),

    #[error("timestamp {timestamp} precedes the last accepted sample at {last}")]
    OutOfOrder { timestamp: u64, last: u64 },

    #[error("timestamp {timestamp} falls in a window already simulated up to {consumed}")]
    Stale { timestamp: u64, consumed: u64 },

    #[error("input history is full")]
    Full,
}

/// Default retention, comfortably more than a few ticks
pub const DEFAULT_RETENTION_MS: u64 = 500;
/// Hard cap on buffered samples per player
pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Default)]
struct HistoryInner {
    samples: VecDeque<InputSample>,
    /// Start of the most recently requested window; nothing after it is evicted
    window_start: u64,
    /// End of the furthest requested window
    consumed_until: u64,
}

/// Append log shared between the transport (producer) and the match tick (consumer).
///
/// Ranges are returned as owned copies, so later appends never affect them.
#[derive(Debug)]
pub struct InputHistory {
    inner: Mutex<HistoryInner>,
    retention_ms: u64,
    capacity: usize,
}

impl InputHistory {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RETENTION_MS, DEFAULT_CAPACITY)
    }

    pub fn with_limits(retention_ms: u64, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryInner::default()),
            retention_ms,
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, sample: InputSample) -> Result<(), InputError> {
        if !(-1..=1).contains(&sample.direction) {
            return Err(InputError::InvalidDirection(sample.direction));
        }

        let mut inner = self.inner.lock();

        if sample.timestamp <= inner.consumed_until {
            return Err(InputError::Stale {
                timestamp: sample.timestamp,
                consumed: inner.consumed_until,
            });
        }
        if let Some(last) = inner.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(InputError::OutOfOrder {
                    timestamp: sample.timestamp,
                    last: last.timestamp,
                });
            }
        }

        while let Some(front) = inner.samples.front() {
            let expired = sample.timestamp.saturating_sub(front.timestamp) > self.retention_ms;
            let over_capacity = inner.samples.len() >= self.capacity;
            if front.timestamp <= inner.window_start && (expired || over_capacity) {
                inner.samples.pop_front();
            } else {
                break;
            }
        }

        if inner.samples.len() >= self.capacity {
            return Err(InputError::Full);
        }

        inner.samples.push_back(sample);
        Ok(())
    }

    /// Samples with `from_exclusive < timestamp <= to_inclusive`, oldest first
    pub fn range(&self, from_exclusive: u64, to_inclusive: u64) -> Vec<InputSample> {
        let mut inner = self.inner.lock();
        inner.window_start = inner.window_start.max(from_exclusive);
        inner.consumed_until = inner.consumed_until.max(to_inclusive);

        if to_inclusive <= from_exclusive {
            return Vec::new();
        }

        let start = inner
            .samples
            .partition_point(|s| s.timestamp <= from_exclusive);
        let end = inner.samples.partition_point(|s| s.timestamp <= to_inclusive);
        inner.samples.range(start..end).copied().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().samples.clear();
    }
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new()
    }
}
