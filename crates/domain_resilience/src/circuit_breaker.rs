//! Circuit Breaker
//!
//! One breaker guards one adapter. It is the only writer of that adapter's
//! [`CircuitState`].
//!
//! ```text
//!            failure rate >= threshold
//!            (with >= minimum_calls samples)
//!   ┌────────┐ ─────────────────────────► ┌────────┐
//!   │ Closed │                            │  Open  │ ◄──┐
//!   └────────┘ ◄───────┐                  └────────┘    │ trial failed
//!                      │ trial succeeded       │        │ (cooldown backs off)
//!                      │                       │ cooldown elapsed
//!                      │                  ┌──────────┐  │
//!                      └───────────────── │ HalfOpen │ ─┘
//!                                         └──────────┘
//! ```
//!
//! Admission is decided synchronously under a mutex, so an open circuit
//! rejects before the operation future is even created. In half-open state
//! exactly one trial is admitted; everything arriving before it settles is
//! rejected and does not count as another trial.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use core_kernel::{AdapterError, AdapterId};

use crate::error::{BreakerError, CircuitOpenError};
use crate::events::{BreakerEvent, BreakerEvents};
use crate::window::SlidingWindow;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// One trial call decides between Closed and Open
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_bounds"))]
pub struct CircuitBreakerConfig {
    /// Number of most recent calls kept in the sliding window
    #[validate(range(min = 1, max = 10000))]
    pub window_size: usize,

    /// Samples required before the failure rate is acted on
    #[validate(range(min = 1))]
    pub minimum_calls: usize,

    /// Failure rate (0.0..=1.0) at or above which the circuit opens
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_rate_threshold: f64,

    /// Optional age bound on samples, in milliseconds
    pub window_duration_ms: Option<u64>,

    /// Time the circuit stays open before admitting a trial
    #[validate(range(min = 1))]
    pub cooldown_ms: u64,

    /// Factor applied to the cooldown after each failed trial
    #[validate(range(min = 1.0))]
    pub backoff_multiplier: f64,

    /// Upper bound for the backed-off cooldown
    #[validate(range(min = 1))]
    pub max_cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 0.5,
            window_duration_ms: None,
            cooldown_ms: 30_000,
            backoff_multiplier: 2.0,
            max_cooldown_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    pub fn window_duration(&self) -> Option<Duration> {
        self.window_duration_ms.map(Duration::from_millis)
    }
}

fn validate_bounds(config: &CircuitBreakerConfig) -> Result<(), ValidationError> {
    if config.minimum_calls > config.window_size {
        return Err(ValidationError::new("minimum_calls_exceeds_window_size"));
    }
    if config.max_cooldown_ms < config.cooldown_ms {
        return Err(ValidationError::new("max_cooldown_below_cooldown"));
    }
    Ok(())
}

/// Point-in-time view of a breaker, for metrics endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub adapter_id: AdapterId,
    pub state: CircuitState,
    pub failure_rate: f64,
    pub window_samples: usize,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub cooldown_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

/// Per-adapter circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    adapter_id: AdapterId,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    events: BreakerEvents,
}

impl CircuitBreaker {
    /// Creates a breaker with its own private event channel
    pub fn new(adapter_id: AdapterId, config: CircuitBreakerConfig) -> Self {
        Self::with_events(adapter_id, config, BreakerEvents::default())
    }

    /// Creates a breaker publishing transitions on a shared channel
    pub fn with_events(
        adapter_id: AdapterId,
        config: CircuitBreakerConfig,
        events: BreakerEvents,
    ) -> Self {
        let inner = BreakerInner {
            state: CircuitState::Closed,
            window: SlidingWindow::new(config.window_size, config.window_duration()),
            opened_at: None,
            cooldown: config.cooldown(),
            trial_in_flight: false,
        };

        Self {
            adapter_id,
            config,
            inner: Mutex::new(inner),
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            events,
        }
    }

    pub fn adapter_id(&self) -> &AdapterId {
        &self.adapter_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn events(&self) -> &BreakerEvents {
        &self.events
    }

    /// Returns the current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `operation` through the breaker
    ///
    /// # Errors
    ///
    /// `BreakerError::CircuitOpen` if the call was rejected (the operation is
    /// never invoked), otherwise the operation's own `AdapterError`.
    ///
    /// # Arguments
    ///
    /// * `operation` - Invoked at most once, only when the call is admitted
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(
            result
                .as_ref()
                .err()
                .is_some_and(AdapterError::counts_as_failure),
        );
        result.map_err(BreakerError::Adapter)
    }

    /// Runs `operation` through the breaker, failing it as `Transient` after `timeout`
    ///
    /// A timed out call is recorded as a failure.
    ///
    /// # Errors
    ///
    /// As [`CircuitBreaker::call`], plus a `Transient` adapter error when the
    /// operation does not finish within `timeout`.
    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.call(|| async move {
            match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::timeout(timeout)),
            }
        })
        .await
    }

    /// Decides whether a call may proceed
    ///
    /// The returned permit must be settled with the call's outcome. Dropping
    /// it unsettled (the call was cancelled) counts as a failure.
    ///
    /// # Errors
    ///
    /// `CircuitOpenError` while the circuit is open and the cooldown has not
    /// elapsed, or while a half-open trial is already outstanding.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= inner.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                } else {
                    let retry_in = inner.cooldown - elapsed;
                    Err(self.reject(retry_in))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.reject(Duration::ZERO))
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    /// Returns a point-in-time view for metrics
    ///
    /// Samples older than the configured window duration are dropped first,
    /// so an idle breaker reports its rate over recent calls only.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        let failure_rate = inner.window.failure_rate_at(Instant::now());
        BreakerSnapshot {
            adapter_id: self.adapter_id.clone(),
            state: inner.state,
            failure_rate,
            window_samples: inner.window.len(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            cooldown_ms: inner.cooldown.as_millis() as u64,
        }
    }

    /// Closes the circuit and clears the window (operator action)
    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.window.clear();
        inner.cooldown = self.config.cooldown();
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed, now);
    }

    /// Opens the circuit immediately with the base cooldown (operator action)
    pub fn force_open(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.cooldown = self.config.cooldown();
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Open, now);
        inner.opened_at = Some(now);
    }

    fn on_outcome(&self, trial: bool, failed: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        let now = Instant::now();
        let mut inner = self.lock();

        if trial {
            inner.trial_in_flight = false;
            // reset() or force_open() may have run while the trial was in flight
            if inner.state != CircuitState::HalfOpen {
                return;
            }
            if failed {
                inner.cooldown = self.next_cooldown(inner.cooldown);
                self.transition(&mut inner, CircuitState::Open, now);
            } else {
                inner.window.clear();
                inner.cooldown = self.config.cooldown();
                self.transition(&mut inner, CircuitState::Closed, now);
            }
            return;
        }

        // Late result from a call admitted before the circuit left Closed
        if inner.state != CircuitState::Closed {
            return;
        }

        inner.window.record(failed, now);
        if failed
            && inner.window.len() >= self.config.minimum_calls
            && inner.window.failure_rate() >= self.config.failure_rate_threshold
        {
            inner.cooldown = self.config.cooldown();
            self.transition(&mut inner, CircuitState::Open, now);
        }
    }

    fn next_cooldown(&self, current: Duration) -> Duration {
        let base = self.config.cooldown();
        let max = self.config.max_cooldown().max(base);
        let scaled = current.as_millis() as f64 * self.config.backoff_multiplier;
        Duration::from_millis(scaled as u64).clamp(base, max)
    }

    fn reject(&self, retry_in: Duration) -> CircuitOpenError {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        CircuitOpenError {
            adapter_id: self.adapter_id.clone(),
            retry_in,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        match to {
            CircuitState::Open => inner.opened_at = Some(now),
            CircuitState::Closed => inner.opened_at = None,
            CircuitState::HalfOpen => {}
        }

        let failure_rate = inner.window.failure_rate();
        match to {
            CircuitState::Open => warn!(
                adapter_id = %self.adapter_id,
                %from,
                failure_rate,
                cooldown_ms = inner.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            ),
            _ => info!(
                adapter_id = %self.adapter_id,
                %from,
                %to,
                "Circuit breaker transitioned"
            ),
        }

        self.events.publish(BreakerEvent {
            adapter_id: self.adapter_id.clone(),
            from,
            to,
            failure_rate,
            at: Utc::now(),
        });
    }

    // Guarded state is consistent after every statement, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission ticket for one call
///
/// Settle it with [`CallPermit::record`]. An unsettled permit counts as a
/// failed call when dropped, which also frees the half-open trial slot.
#[must_use = "a permit must be settled with the call outcome"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Returns true if this is the half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Settles the permit with the call outcome
    pub fn record(mut self, failed: bool) {
        self.settle(failed);
    }

    pub fn record_success(self) {
        self.record(false);
    }

    pub fn record_failure(self) {
        self.record(true);
    }

    fn settle(&mut self, failed: bool) {
        if !self.settled {
            self.settled = true;
            self.breaker.on_outcome(self.trial, failed);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.settle(true);
    }
}
