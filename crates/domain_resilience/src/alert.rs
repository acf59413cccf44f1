//! Degradation alerts and the sinks that receive them

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use core_kernel::{AdapterId, AlertId};

use crate::circuit_breaker::CircuitState;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Scales severity with the failure streak relative to `threshold`
    ///
    /// An open circuit is at least `Medium`.
    pub fn assess(consecutive_failures: u32, threshold: u32, circuit_state: CircuitState) -> Self {
        let threshold = threshold.max(1);
        let by_streak = if consecutive_failures < threshold {
            Severity::Low
        } else if consecutive_failures < threshold.saturating_mul(2) {
            Severity::Medium
        } else if consecutive_failures < threshold.saturating_mul(4) {
            Severity::High
        } else {
            Severity::Critical
        };

        if circuit_state == CircuitState::Open {
            by_streak.max(Severity::Medium)
        } else {
            by_streak
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// An adapter is failing probes or its circuit is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDegraded {
    pub alert_id: AlertId,
    pub adapter_id: AdapterId,
    pub severity: Severity,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl AdapterDegraded {
    pub fn new(
        adapter_id: AdapterId,
        consecutive_failures: u32,
        threshold: u32,
        circuit_state: CircuitState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: AlertId::new_v7(),
            severity: Severity::assess(consecutive_failures, threshold, circuit_state),
            adapter_id,
            consecutive_failures,
            circuit_state,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Destination for degradation alerts (logging, paging, chat)
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: AdapterDegraded);
}

/// Writes alerts to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn emit(&self, alert: AdapterDegraded) {
        match alert.severity {
            Severity::Low | Severity::Medium => warn!(
                alert_id = %alert.alert_id,
                adapter_id = %alert.adapter_id,
                severity = %alert.severity,
                consecutive_failures = alert.consecutive_failures,
                circuit_state = %alert.circuit_state,
                "Adapter degraded: {}",
                alert.message
            ),
            Severity::High | Severity::Critical => error!(
                alert_id = %alert.alert_id,
                adapter_id = %alert.adapter_id,
                severity = %alert.severity,
                consecutive_failures = alert.consecutive_failures,
                circuit_state = %alert.circuit_state,
                "Adapter degraded: {}",
                alert.message
            ),
        }
    }
}
