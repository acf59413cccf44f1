//! Domain Resilience - Fault tolerance for provider adapters
//!
//! This crate keeps one misbehaving provider from dragging down the rest:
//! - Per-adapter circuit breakers over a sliding window of call outcomes
//! - Transition events broadcast to observers
//! - A health monitor that probes adapters on a schedule and raises
//!   degradation alerts to a pluggable sink

pub mod circuit_breaker;
pub mod window;
pub mod events;
pub mod health;
pub mod alert;
pub mod monitor;
pub mod error;

pub use circuit_breaker::{BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use window::SlidingWindow;
pub use events::{BreakerEvent, BreakerEvents};
pub use health::{HealthHistory, HealthRecord};
pub use alert::{AdapterDegraded, AlertSink, Severity, TracingAlertSink};
pub use monitor::{
    AdapterMetrics, HealthMonitor, HealthMonitorConfig, HealthReport, ProbeTarget,
    ProbeTargetSource,
};
pub use error::{BreakerError, CircuitOpenError, MonitorError};
