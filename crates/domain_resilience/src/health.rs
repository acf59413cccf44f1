//! Health records and bounded probe history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::AdapterId;

/// Outcome of one health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub adapter_id: AdapterId,
    pub timestamp: DateTime<Utc>,
    /// Probe latency; zero when the probe was rejected by an open circuit
    pub latency_ms: u64,
    pub success: bool,
    /// Failures in a row including this one; zero on success
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthRecord {
    pub fn success(adapter_id: AdapterId, latency_ms: u64) -> Self {
        Self {
            adapter_id,
            timestamp: Utc::now(),
            latency_ms,
            success: true,
            consecutive_failures: 0,
            error: None,
        }
    }

    pub fn failure(
        adapter_id: AdapterId,
        latency_ms: u64,
        consecutive_failures: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            adapter_id,
            timestamp: Utc::now(),
            latency_ms,
            success: false,
            consecutive_failures,
            error: Some(error.into()),
        }
    }
}

/// Fixed-capacity ring buffer of health records
///
/// Records are never mutated once pushed; the oldest is evicted when full.
#[derive(Debug, Clone)]
pub struct HealthHistory {
    capacity: usize,
    records: VecDeque<HealthRecord>,
}

impl HealthHistory {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: HealthRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Iterates oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HealthRecord> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&HealthRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of successful probes in the buffer, `None` when empty
    pub fn success_rate(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let successes = self.records.iter().filter(|r| r.success).count();
        Some(successes as f64 / self.records.len() as f64)
    }

    /// Mean latency of successful probes, `None` if there are none
    pub fn average_latency_ms(&self) -> Option<f64> {
        let (sum, count) = self
            .records
            .iter()
            .filter(|r| r.success)
            .fold((0u64, 0u64), |(sum, count), r| (sum + r.latency_ms, count + 1));
        (count > 0).then(|| sum as f64 / count as f64)
    }

    pub fn to_vec(&self) -> Vec<HealthRecord> {
        self.records.iter().cloned().collect()
    }
}

impl Default for HealthHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> AdapterId {
        AdapterId::from("crm-a")
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = HealthHistory::new(3);
        for latency in 1..=5 {
            history.push(HealthRecord::success(id(), latency));
        }

        let latencies: Vec<u64> = history.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![3, 4, 5]);
        assert_eq!(history.latest().map(|r| r.latency_ms), Some(5));
    }

    #[test]
    fn test_success_rate_and_latency() {
        let mut history = HealthHistory::default();
        assert_eq!(history.success_rate(), None);

        history.push(HealthRecord::success(id(), 10));
        history.push(HealthRecord::success(id(), 30));
        history.push(HealthRecord::failure(id(), 5_000, 1, "timed out"));
        history.push(HealthRecord::failure(id(), 0, 2, "circuit open"));

        assert_eq!(history.success_rate(), Some(0.5));
        // failed probes do not skew latency
        assert_eq!(history.average_latency_ms(), Some(20.0));
    }

    #[test]
    fn test_failure_record_serializes_error() {
        let record = HealthRecord::failure(id(), 12, 3, "connection refused");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["adapter_id"], "crm-a");
        assert_eq!(json["consecutive_failures"], 3);
        assert_eq!(json["error"], "connection refused");
    }
}
