//! Breaker transition events
//!
//! Every state transition is published on a broadcast channel. The health
//! monitor consumes them to alert on circuits opening; anything else may
//! subscribe for observability.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use core_kernel::AdapterId;

use crate::circuit_breaker::CircuitState;

/// A circuit breaker changed state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerEvent {
    pub adapter_id: AdapterId,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Failure rate of the sliding window at the time of the transition
    pub failure_rate: f64,
    pub at: DateTime<Utc>,
}

/// Broadcast channel shared by the breakers of one registry
#[derive(Debug, Clone)]
pub struct BreakerEvents {
    sender: broadcast::Sender<BreakerEvent>,
}

impl BreakerEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; having no subscribers is not an error
    pub fn publish(&self, event: BreakerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for BreakerEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
