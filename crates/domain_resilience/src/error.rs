//! Resilience errors
//!
//! `CircuitOpenError` is routine: it tells the caller to try another adapter
//! or wait. `BreakerError` is what a guarded call returns.

use std::time::Duration;

use thiserror::Error;

use core_kernel::{AdapterError, AdapterId};

/// A call was rejected without reaching the provider
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Circuit open for adapter '{adapter_id}': retry in {}ms", .retry_in.as_millis())]
pub struct CircuitOpenError {
    pub adapter_id: AdapterId,
    /// Time until the breaker admits a trial call; zero while a trial is in flight
    pub retry_in: Duration,
}

/// Outcome of a call guarded by a circuit breaker
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BreakerError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl BreakerError {
    /// Returns true if the call was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen(_))
    }

    /// Returns the adapter error if the provider was actually called
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            BreakerError::Adapter(error) => Some(error),
            BreakerError::CircuitOpen(_) => None,
        }
    }
}

/// Errors from the health monitor's public operations
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Adapter '{0}' is not registered for health monitoring")]
    UnknownAdapter(AdapterId),
}
