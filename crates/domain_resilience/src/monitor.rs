//! Health Monitor
//!
//! Probes every registered adapter on a fixed interval, independently of
//! business traffic. Probes go through the adapter's circuit breaker so the
//! breaker keeps learning during quiet periods.
//!
//! The monitor does not own the adapter list. It asks a [`ProbeTargetSource`]
//! (the service registry) for the current targets on every round, so hot
//! reloads are picked up without restarting the loop.
//!
//! Within [`HealthMonitor::run`] every probe is an independent future. A slow
//! adapter delays only its own record; other adapters' records, breaker
//! events and alerts keep flowing while it is outstanding.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use validator::Validate;

use core_kernel::{AdapterError, AdapterHealth, AdapterId};

use crate::alert::{AdapterDegraded, AlertSink};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::{BreakerError, MonitorError};
use crate::events::BreakerEvent;
use crate::health::{HealthHistory, HealthRecord};

/// Something the monitor can probe
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    fn adapter_id(&self) -> &AdapterId;

    /// Breaker the probe is routed through
    fn breaker(&self) -> &CircuitBreaker;

    async fn probe(&self) -> Result<(), AdapterError>;
}

/// Supplies the current set of probe targets
pub trait ProbeTargetSource: Send + Sync {
    fn probe_targets(&self) -> Vec<Arc<dyn ProbeTarget>>;
}

/// Health monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthMonitorConfig {
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    #[validate(range(min = 1))]
    pub probe_timeout_ms: u64,

    /// Alert once consecutive failures exceed this many
    pub failure_threshold: u32,

    #[validate(range(min = 1))]
    pub history_capacity: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            failure_threshold: 3,
            history_capacity: HealthHistory::DEFAULT_CAPACITY,
        }
    }
}

impl HealthMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Per-adapter health summary for the metrics endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterMetrics {
    pub adapter_id: AdapterId,
    pub circuit_state: CircuitState,
    pub health: AdapterHealth,
    /// Success rate over the retained probe history
    pub success_rate: Option<f64>,
    /// Failure rate of the breaker's sliding window (probes and traffic)
    pub breaker_failure_rate: f64,
    pub average_latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

/// Fleet-wide health summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall_status: AdapterHealth,
    pub adapters: Vec<AdapterMetrics>,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub total_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// Returns true if all adapters are healthy
    pub fn is_fully_healthy(&self) -> bool {
        self.overall_status == AdapterHealth::Healthy
    }

    /// Returns true if the fleet can still serve traffic
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status,
            AdapterHealth::Healthy | AdapterHealth::Degraded
        )
    }
}

#[derive(Debug)]
struct AdapterHealthState {
    history: HealthHistory,
    consecutive_failures: u32,
}

/// Periodically probes adapters and raises degradation alerts
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    source: Arc<dyn ProbeTargetSource>,
    sink: Arc<dyn AlertSink>,
    // Never held across an await: the run loop's handlers take it while
    // in-flight probes are parked
    state: RwLock<HashMap<AdapterId, AdapterHealthState>>,
}

impl HealthMonitor {
    /// Creates a monitor
    ///
    /// # Arguments
    ///
    /// * `config` - Probe interval, timeout, threshold and history size
    /// * `source` - Supplies the current adapters on every round
    /// * `sink` - Receives degradation alerts
    pub fn new(
        config: HealthMonitorConfig,
        source: Arc<dyn ProbeTargetSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the probing configuration
    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Probes one adapter now
    ///
    /// The probe goes through the adapter's breaker and is bounded by the
    /// probe timeout. An alert is raised when the failure streak exceeds the
    /// threshold or the circuit is open.
    ///
    /// # Arguments
    ///
    /// * `adapter_id` - Adapter to probe
    ///
    /// # Returns
    ///
    /// The record appended to the adapter's history.
    ///
    /// # Errors
    ///
    /// `MonitorError::UnknownAdapter` if the adapter is not a current target.
    /// Probe failures are not errors; they are recorded in the returned record.
    pub async fn probe(&self, adapter_id: &AdapterId) -> Result<HealthRecord, MonitorError> {
        let target = self
            .source
            .probe_targets()
            .into_iter()
            .find(|target| target.adapter_id() == adapter_id)
            .ok_or_else(|| MonitorError::UnknownAdapter(adapter_id.clone()))?;

        Ok(self.probe_target(target.as_ref()).await)
    }

    /// Probes every current target concurrently and waits for all of them
    ///
    /// # Returns
    ///
    /// One record per current target, in the source's order.
    pub async fn probe_all(&self) -> Vec<HealthRecord> {
        let targets = self.current_targets();
        join_all(targets.iter().map(|target| self.probe_target(target.as_ref()))).await
    }

    /// Runs the probe loop until `shutdown` flips to true or its sender is dropped
    ///
    /// Each tick starts one probe per target that has no probe outstanding.
    /// Probes complete independently of each other and of the tick, so an
    /// adapter hanging up to the probe timeout never holds back breaker
    /// events or other adapters' alerts. Breaker transitions arriving on
    /// `events` raise an alert when a circuit opens, without waiting for the
    /// next tick. Probes still outstanding at shutdown are abandoned.
    ///
    /// # Arguments
    ///
    /// * `events` - Breaker transitions of the registry's adapters
    /// * `shutdown` - Stops the loop when it changes to `true` or closes
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<BreakerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;
        let mut in_flight = FuturesUnordered::new();
        let mut outstanding: HashSet<AdapterId> = HashSet::new();

        info!(
            interval_ms = self.config.interval_ms,
            probe_timeout_ms = self.config.probe_timeout_ms,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut started = 0;
                    for target in self.current_targets() {
                        if outstanding.insert(target.adapter_id().clone()) {
                            in_flight.push(self.probe_owned(target));
                            started += 1;
                        }
                    }
                    debug!(started, outstanding = outstanding.len(), "Health probe round started");
                }
                Some(record) = in_flight.next(), if !in_flight.is_empty() => {
                    outstanding.remove(&record.adapter_id);
                    debug!(adapter_id = %record.adapter_id, success = record.success, "Health probe complete");
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_transition(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Health monitor fell behind breaker events");
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Returns the retained probe history for one adapter, oldest first
    ///
    /// # Errors
    ///
    /// `MonitorError::UnknownAdapter` if the adapter is not a current target.
    /// A target that was never probed has an empty history.
    pub async fn history(&self, adapter_id: &AdapterId) -> Result<Vec<HealthRecord>, MonitorError> {
        let state = self.read_state();
        match state.get(adapter_id) {
            Some(entry) => Ok(entry.history.to_vec()),
            None if self.is_target(adapter_id) => Ok(Vec::new()),
            None => Err(MonitorError::UnknownAdapter(adapter_id.clone())),
        }
    }

    /// Returns per-adapter metrics for every current target, ordered by id
    ///
    /// Breaker figures are read live; probe figures come from the retained
    /// history.
    pub async fn metrics(&self) -> Vec<AdapterMetrics> {
        let targets = self.source.probe_targets();
        let state = self.read_state();

        let mut metrics: Vec<AdapterMetrics> = targets
            .iter()
            .map(|target| {
                let snapshot = target.breaker().snapshot();
                let entry = state.get(target.adapter_id());
                let consecutive_failures = entry.map_or(0, |e| e.consecutive_failures);
                let latest = entry.and_then(|e| e.history.latest());

                AdapterMetrics {
                    adapter_id: target.adapter_id().clone(),
                    circuit_state: snapshot.state,
                    health: self.classify(snapshot.state, consecutive_failures, latest.is_some()),
                    success_rate: entry.and_then(|e| e.history.success_rate()),
                    breaker_failure_rate: snapshot.failure_rate,
                    average_latency_ms: entry.and_then(|e| e.history.average_latency_ms()),
                    consecutive_failures,
                    last_checked: latest.map(|r| r.timestamp),
                    total_calls: snapshot.total_calls,
                    rejected_calls: snapshot.rejected_calls,
                }
            })
            .collect();

        metrics.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        metrics
    }

    /// Summarizes fleet health
    ///
    /// # Returns
    ///
    /// `Unknown` with no targets, `Healthy` or `Unhealthy` when every adapter
    /// agrees, `Degraded` otherwise.
    pub async fn report(&self) -> HealthReport {
        let adapters = self.metrics().await;
        let total_count = adapters.len();
        let healthy_count = adapters
            .iter()
            .filter(|m| m.health == AdapterHealth::Healthy)
            .count();
        let unhealthy_count = adapters
            .iter()
            .filter(|m| m.health == AdapterHealth::Unhealthy)
            .count();

        let overall_status = if total_count == 0 {
            AdapterHealth::Unknown
        } else if healthy_count == total_count {
            AdapterHealth::Healthy
        } else if unhealthy_count == total_count {
            AdapterHealth::Unhealthy
        } else {
            AdapterHealth::Degraded
        };

        HealthReport {
            overall_status,
            adapters,
            healthy_count,
            unhealthy_count,
            total_count,
            generated_at: Utc::now(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, HashMap<AdapterId, AdapterHealthState>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, HashMap<AdapterId, AdapterHealthState>> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Current targets, forgetting state of adapters that are gone
    fn current_targets(&self) -> Vec<Arc<dyn ProbeTarget>> {
        let targets = self.source.probe_targets();
        let mut state = self.write_state();
        state.retain(|id, _| targets.iter().any(|t| t.adapter_id() == id));
        targets
    }

    async fn probe_owned(&self, target: Arc<dyn ProbeTarget>) -> HealthRecord {
        self.probe_target(target.as_ref()).await
    }

    async fn probe_target(&self, target: &dyn ProbeTarget) -> HealthRecord {
        let adapter_id = target.adapter_id().clone();
        let timeout = self.config.probe_timeout();
        let started = Instant::now();

        let outcome = target
            .breaker()
            .call_with_timeout(timeout, || target.probe())
            .await;

        let error = match outcome {
            Ok(()) => None,
            Err(BreakerError::CircuitOpen(rejected)) => Some((0, rejected.to_string())),
            Err(BreakerError::Adapter(failure)) => {
                Some((elapsed_ms(started), failure.to_string()))
            }
        };

        let record = {
            let mut state = self.write_state();
            let entry = state
                .entry(adapter_id.clone())
                .or_insert_with(|| AdapterHealthState {
                    history: HealthHistory::new(self.config.history_capacity),
                    consecutive_failures: 0,
                });

            let record = match error {
                None => {
                    entry.consecutive_failures = 0;
                    HealthRecord::success(adapter_id.clone(), elapsed_ms(started))
                }
                Some((latency_ms, message)) => {
                    entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                    HealthRecord::failure(
                        adapter_id.clone(),
                        latency_ms,
                        entry.consecutive_failures,
                        message,
                    )
                }
            };
            entry.history.push(record.clone());
            record
        };

        let circuit_state = target.breaker().state();
        if record.consecutive_failures > self.config.failure_threshold
            || circuit_state == CircuitState::Open
        {
            let message = match &record.error {
                Some(error) => format!("health probe failed: {error}"),
                None => "circuit is open".to_string(),
            };
            self.alert(adapter_id, record.consecutive_failures, circuit_state, message)
                .await;
        }

        record
    }

    async fn on_transition(&self, event: BreakerEvent) {
        if event.to != CircuitState::Open {
            return;
        }

        let consecutive_failures = self
            .read_state()
            .get(&event.adapter_id)
            .map_or(0, |entry| entry.consecutive_failures);

        let message = format!(
            "circuit opened at {:.0}% failure rate",
            event.failure_rate * 100.0
        );
        self.alert(event.adapter_id, consecutive_failures, CircuitState::Open, message)
            .await;
    }

    async fn alert(
        &self,
        adapter_id: AdapterId,
        consecutive_failures: u32,
        circuit_state: CircuitState,
        message: String,
    ) {
        let alert = AdapterDegraded::new(
            adapter_id,
            consecutive_failures,
            self.config.failure_threshold,
            circuit_state,
            message,
        );
        self.sink.emit(alert).await;
    }

    fn classify(&self, state: CircuitState, consecutive_failures: u32, probed: bool) -> AdapterHealth {
        match state {
            CircuitState::Open => AdapterHealth::Unhealthy,
            _ if consecutive_failures > self.config.failure_threshold => AdapterHealth::Unhealthy,
            CircuitState::HalfOpen => AdapterHealth::Degraded,
            _ if consecutive_failures > 0 => AdapterHealth::Degraded,
            _ if !probed => AdapterHealth::Unknown,
            _ => AdapterHealth::Healthy,
        }
    }

    fn is_target(&self, adapter_id: &AdapterId) -> bool {
        self.source
            .probe_targets()
            .iter()
            .any(|target| target.adapter_id() == adapter_id)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::events::BreakerEvents;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeTarget {
        id: AdapterId,
        breaker: CircuitBreaker,
        healthy: AtomicBool,
        delay: Option<Duration>,
        probes: AtomicUsize,
    }

    impl FakeTarget {
        fn new(id: &str) -> Arc<Self> {
            Self::with_breaker(id, CircuitBreakerConfig {
                window_size: 100,
                minimum_calls: 100,
                ..Default::default()
            }, BreakerEvents::default())
        }

        fn with_breaker(id: &str, config: CircuitBreakerConfig, events: BreakerEvents) -> Arc<Self> {
            Arc::new(Self {
                id: AdapterId::from(id),
                breaker: CircuitBreaker::with_events(AdapterId::from(id), config, events),
                healthy: AtomicBool::new(true),
                delay: None,
                probes: AtomicUsize::new(0),
            })
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProbeTarget for FakeTarget {
        fn adapter_id(&self) -> &AdapterId {
            &self.id
        }

        fn breaker(&self) -> &CircuitBreaker {
            &self.breaker
        }

        async fn probe(&self) -> Result<(), AdapterError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AdapterError::transient("connection refused"))
            }
        }
    }

    struct Targets(Vec<Arc<FakeTarget>>);

    impl ProbeTargetSource for Targets {
        fn probe_targets(&self) -> Vec<Arc<dyn ProbeTarget>> {
            self.0
                .iter()
                .map(|t| t.clone() as Arc<dyn ProbeTarget>)
                .collect()
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<AdapterDegraded>>);

    impl CollectingSink {
        fn alerts(&self) -> Vec<AdapterDegraded> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn emit(&self, alert: AdapterDegraded) {
            self.0.lock().unwrap().push(alert);
        }
    }

    fn monitor(targets: Vec<Arc<FakeTarget>>, sink: Arc<CollectingSink>) -> HealthMonitor {
        HealthMonitor::new(HealthMonitorConfig::default(), Arc::new(Targets(targets)), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_is_recorded() {
        let target = FakeTarget::new("crm-a");
        let monitor = monitor(vec![target.clone()], Arc::new(CollectingSink::default()));

        let record = monitor.probe(&AdapterId::from("crm-a")).await.unwrap();

        assert!(record.success);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(target.probes(), 1);
        assert_eq!(monitor.history(&AdapterId::from("crm-a")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_adapter_is_an_error() {
        let monitor = monitor(vec![], Arc::new(CollectingSink::default()));
        let result = monitor.probe(&AdapterId::from("missing")).await;
        assert!(matches!(result, Err(MonitorError::UnknownAdapter(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_once_streak_exceeds_threshold() {
        let target = FakeTarget::new("crm-a");
        target.healthy.store(false, Ordering::SeqCst);
        let sink = Arc::new(CollectingSink::default());
        let monitor = monitor(vec![target.clone()], sink.clone());
        let id = AdapterId::from("crm-a");

        for _ in 0..3 {
            monitor.probe(&id).await.unwrap();
        }
        assert!(sink.alerts().is_empty());

        let record = monitor.probe(&id).await.unwrap();
        assert_eq!(record.consecutive_failures, 4);

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].consecutive_failures, 4);
        assert_eq!(alerts[0].severity, crate::alert::Severity::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_streak() {
        let target = FakeTarget::new("crm-a");
        let monitor = monitor(vec![target.clone()], Arc::new(CollectingSink::default()));
        let id = AdapterId::from("crm-a");

        target.healthy.store(false, Ordering::SeqCst);
        monitor.probe(&id).await.unwrap();
        monitor.probe(&id).await.unwrap();
        target.healthy.store(true, Ordering::SeqCst);
        let record = monitor.probe(&id).await.unwrap();

        assert!(record.success);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_recorded_without_probing() {
        let target = FakeTarget::new("crm-a");
        target.breaker.force_open();
        let sink = Arc::new(CollectingSink::default());
        let monitor = monitor(vec![target.clone()], sink.clone());

        let record = monitor.probe(&AdapterId::from("crm-a")).await.unwrap();

        assert!(!record.success);
        assert_eq!(record.latency_ms, 0);
        assert_eq!(target.probes(), 0);

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].circuit_state, CircuitState::Open);
        assert!(alerts[0].severity >= crate::alert::Severity::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        let target = Arc::new(FakeTarget {
            id: AdapterId::from("slow"),
            breaker: CircuitBreaker::new(AdapterId::from("slow"), CircuitBreakerConfig::default()),
            healthy: AtomicBool::new(true),
            delay: Some(Duration::from_secs(60)),
            probes: AtomicUsize::new(0),
        });
        let monitor = monitor(vec![target.clone()], Arc::new(CollectingSink::default()));

        let record = monitor.probe(&AdapterId::from("slow")).await.unwrap();

        assert!(!record.success);
        assert_eq!(record.latency_ms, 5_000);
        assert!(record.error.unwrap().contains("timed out"));
        assert_eq!(target.breaker.snapshot().failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_on_interval_until_shutdown() {
        let target = FakeTarget::new("crm-a");
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval_ms: 1_000,
                ..Default::default()
            },
            Arc::new(Targets(vec![target.clone()])),
            Arc::new(CollectingSink::default()),
        ));
        let events = BreakerEvents::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = monitor.clone();
        let receiver = events.subscribe();
        let handle = tokio::spawn(async move { running.run(receiver, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // ticks at 0, 1000 and 2000
        assert_eq!(target.probes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_probes_do_not_stop_the_loop() {
        let target = FakeTarget::new("crm-a");
        target.healthy.store(false, Ordering::SeqCst);
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval_ms: 1_000,
                ..Default::default()
            },
            Arc::new(Targets(vec![target.clone()])),
            Arc::new(CollectingSink::default()),
        ));
        let events = BreakerEvents::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = monitor.clone();
        let receiver = events.subscribe();
        let handle = tokio::spawn(async move { running.run(receiver, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        drop(shutdown_tx);
        handle.await.unwrap();

        assert_eq!(target.probes(), 5);
        let history = monitor.history(&AdapterId::from("crm-a")).await.unwrap();
        assert_eq!(history.last().unwrap().consecutive_failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_raises_alert() {
        let events = BreakerEvents::default();
        let target = FakeTarget::with_breaker("crm-b", CircuitBreakerConfig::default(), events.clone());
        let sink = Arc::new(CollectingSink::default());
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval_ms: 3_600_000,
                ..Default::default()
            },
            Arc::new(Targets(vec![target.clone()])),
            sink.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = monitor.clone();
        let receiver = events.subscribe();
        let handle = tokio::spawn(async move { running.run(receiver, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        target.breaker.force_open();
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].adapter_id.as_str(), "crm-b");
        assert_eq!(alerts[0].circuit_state, CircuitState::Open);
        assert!(alerts[0].message.contains("circuit opened"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_does_not_hold_back_other_adapters() {
        let events = BreakerEvents::default();
        let hanging = Arc::new(FakeTarget {
            id: AdapterId::from("crm-slow"),
            breaker: CircuitBreaker::new(AdapterId::from("crm-slow"), CircuitBreakerConfig::default()),
            healthy: AtomicBool::new(true),
            delay: Some(Duration::from_secs(600)),
            probes: AtomicUsize::new(0),
        });
        let fast = FakeTarget::with_breaker("crm-b", CircuitBreakerConfig::default(), events.clone());
        let sink = Arc::new(CollectingSink::default());
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval_ms: 1_000,
                probe_timeout_ms: 60_000,
                ..Default::default()
            },
            Arc::new(Targets(vec![hanging.clone(), fast.clone()])),
            sink.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = monitor.clone();
        let receiver = events.subscribe();
        let handle = tokio::spawn(async move { running.run(receiver, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        fast.breaker.force_open();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The transition alert arrived while the first probe of crm-slow hangs
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].adapter_id.as_str(), "crm-b");
        assert_eq!(monitor.history(&AdapterId::from("crm-b")).await.unwrap().len(), 1);
        assert!(monitor.history(&AdapterId::from("crm-slow")).await.unwrap().is_empty());

        // Later ticks keep probing crm-b; crm-slow is not probed twice at once
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(hanging.probes(), 1);
        assert_eq!(fast.probes(), 1);
        assert_eq!(monitor.history(&AdapterId::from("crm-b")).await.unwrap().len(), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_summarizes_fleet() {
        let healthy = FakeTarget::new("crm-a");
        let failing = FakeTarget::new("crm-b");
        let unprobed = FakeTarget::new("crm-c");
        failing.healthy.store(false, Ordering::SeqCst);
        let monitor = monitor(
            vec![healthy.clone(), failing.clone(), unprobed],
            Arc::new(CollectingSink::default()),
        );

        monitor.probe(&AdapterId::from("crm-a")).await.unwrap();
        for _ in 0..4 {
            monitor.probe(&AdapterId::from("crm-b")).await.unwrap();
        }

        let report = monitor.report().await;
        assert_eq!(report.total_count, 3);
        assert_eq!(report.healthy_count, 1);
        assert_eq!(report.unhealthy_count, 1);
        assert_eq!(report.overall_status, AdapterHealth::Degraded);
        assert!(report.is_operational());
        assert!(!report.is_fully_healthy());

        let ids: Vec<&str> = report.adapters.iter().map(|m| m.adapter_id.as_str()).collect();
        assert_eq!(ids, vec!["crm-a", "crm-b", "crm-c"]);
        assert_eq!(report.adapters[0].success_rate, Some(1.0));
        assert_eq!(report.adapters[1].success_rate, Some(0.0));
        assert_eq!(report.adapters[2].health, AdapterHealth::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let target = FakeTarget::new("crm-a");
        let monitor = HealthMonitor::new(
            HealthMonitorConfig {
                history_capacity: 2,
                ..Default::default()
            },
            Arc::new(Targets(vec![target])),
            Arc::new(CollectingSink::default()),
        );
        let id = AdapterId::from("crm-a");

        for _ in 0..5 {
            monitor.probe(&id).await.unwrap();
        }

        assert_eq!(monitor.history(&id).await.unwrap().len(), 2);
    }
}
