//! Sliding window of call outcomes
//!
//! Bounded by count (last N calls) and optionally by age (last T).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    failed: bool,
}

/// Rolling record of the most recent call outcomes
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    max_age: Option<Duration>,
    samples: VecDeque<Sample>,
}

impl SlidingWindow {
    /// Creates a window keeping at most `capacity` samples, each at most `max_age` old
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_age,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Records one outcome observed at `now`
    pub fn record(&mut self, failed: bool, now: Instant) {
        self.evict_expired(now);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at: now, failed });
    }

    /// Drops samples older than the configured maximum age
    pub fn evict_expired(&mut self, now: Instant) {
        let Some(max_age) = self.max_age else {
            return;
        };
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evicts expired samples, then returns the failure rate as of `now`
    ///
    /// An idle window ages out on read as well as on write.
    pub fn failure_rate_at(&mut self, now: Instant) -> f64 {
        self.evict_expired(now);
        self.failure_rate()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.samples.iter().filter(|s| s.failed).count()
    }

    /// Fraction of failed samples, 0.0 for an empty window
    pub fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.failures() as f64 / self.samples.len() as f64
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
