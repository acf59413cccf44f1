//! Test Doubles
//!
//! Scripted adapters that count every call, plus helpers to register them
//! with a real service factory. Tests drive failures, delays and divergent
//! field values without any network.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use core_kernel::{
    AdapterError, AdapterId, Capability, ConfigError, ContactSync, DealSync, NormalizedEntity,
    OperationMetadata, PaymentCharge, ProviderAdapter,
};
use domain_registry::{ServiceFactory, ServiceRegistry, StaticSecretStore};
use domain_resilience::{AdapterDegraded, AlertSink};

/// Provider type under which scripted adapters are registered
pub const SCRIPTED_PROVIDER: &str = "scripted";

/// Shared, ordered record of adapter start/stop calls
#[derive(Debug, Clone, Default)]
pub struct LifecycleLog(Arc<Mutex<Vec<String>>>);

impl LifecycleLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        lock(&self.0).push(entry);
    }

    /// Entries such as `"start:crm-a"` in call order
    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Position of an entry, for ordering assertions
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e == entry)
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    failure: Option<AdapterError>,
    delay: Option<Duration>,
    fields: BTreeMap<String, Value>,
    updated_at: Option<DateTime<Utc>>,
    start_failure: Option<AdapterError>,
    probe_failure: Option<AdapterError>,
}

/// Adapter double whose every answer is scripted by the test
///
/// A successful write echoes the payload, overlaid with the scripted fields,
/// and assigns an external id of the form `"<id>-<n>"`.
#[derive(Debug)]
pub struct ScriptedAdapter {
    id: AdapterId,
    capabilities: BTreeSet<Capability>,
    script: Mutex<Script>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    log: LifecycleLog,
}

impl ScriptedAdapter {
    /// Creates an adapter serving contacts and deals
    pub fn new(id: impl Into<AdapterId>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::from([Capability::ContactSync, Capability::DealSync]),
            script: Mutex::new(Script::default()),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            log: LifecycleLog::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Every write fails with `error`
    pub fn failing(self, error: AdapterError) -> Self {
        self.set_failure(Some(error));
        self
    }

    /// Every write waits `delay` before answering
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    /// Every successful write returns `value` for `field`
    pub fn with_field(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        lock(&self.script).fields.insert(field.into(), value.into());
        self
    }

    /// Successful writes carry this provider-side timestamp
    pub fn with_updated_at(self, at: DateTime<Utc>) -> Self {
        lock(&self.script).updated_at = Some(at);
        self
    }

    /// `start()` fails with `error`
    pub fn failing_start(self, error: AdapterError) -> Self {
        lock(&self.script).start_failure = Some(error);
        self
    }

    pub fn with_log(mut self, log: LifecycleLog) -> Self {
        self.log = log;
        self
    }

    pub fn set_failure(&self, failure: Option<AdapterError>) {
        lock(&self.script).failure = failure;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.script).delay = delay;
    }

    pub fn set_probe_failure(&self, failure: Option<AdapterError>) {
        lock(&self.script).probe_failure = failure;
    }

    pub fn id(&self) -> &AdapterId {
        &self.id
    }

    /// Number of writes that reached this adapter
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    async fn respond(&self, payload: &NormalizedEntity) -> Result<NormalizedEntity, AdapterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = lock(&self.script).clone();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = script.failure {
            return Err(error);
        }

        let mut entity = payload.clone();
        entity.fields.extend(script.fields);
        entity.external_id = Some(format!("{}-{}", self.id, n));
        entity.updated_at = script.updated_at;
        Ok(entity)
    }
}

#[async_trait]
impl ContactSync for ScriptedAdapter {
    async fn create_contact(
        &self,
        contact: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.respond(contact).await
    }

    async fn update_contact(
        &self,
        _external_id: &str,
        contact: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.respond(contact).await
    }
}

#[async_trait]
impl DealSync for ScriptedAdapter {
    async fn create_deal(
        &self,
        deal: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.respond(deal).await
    }

    async fn update_deal(
        &self,
        _external_id: &str,
        deal: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.respond(deal).await
    }
}

#[async_trait]
impl PaymentCharge for ScriptedAdapter {
    async fn charge(
        &self,
        payment: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.respond(payment).await
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_type(&self) -> &str {
        SCRIPTED_PROVIDER
    }

    fn contact_sync(&self) -> Option<&dyn ContactSync> {
        self.capabilities
            .contains(&Capability::ContactSync)
            .then_some(self as &dyn ContactSync)
    }

    fn deal_sync(&self) -> Option<&dyn DealSync> {
        self.capabilities
            .contains(&Capability::DealSync)
            .then_some(self as &dyn DealSync)
    }

    fn payment_charge(&self) -> Option<&dyn PaymentCharge> {
        self.capabilities
            .contains(&Capability::PaymentCharge)
            .then_some(self as &dyn PaymentCharge)
    }

    async fn start(&self) -> Result<(), AdapterError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("start:{}", self.id));
        match lock(&self.script).start_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("stop:{}", self.id));
        Ok(())
    }

    async fn probe(&self) -> Result<(), AdapterError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).probe_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Scripted adapters keyed by adapter id, served through a real factory
///
/// The factory's `scripted` builder hands out the adapter registered under
/// the descriptor's id, so a test keeps its own `Arc` for call counting.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFleet {
    adapters: Arc<Mutex<HashMap<AdapterId, Arc<ScriptedAdapter>>>>,
    log: LifecycleLog,
}

impl ScriptedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter, wiring it to the fleet's lifecycle log
    pub fn add(&self, adapter: ScriptedAdapter) -> Arc<ScriptedAdapter> {
        let adapter = Arc::new(adapter.with_log(self.log.clone()));
        lock(&self.adapters).insert(adapter.id().clone(), adapter.clone());
        adapter
    }

    pub fn get(&self, id: &str) -> Option<Arc<ScriptedAdapter>> {
        lock(&self.adapters).get(&AdapterId::from(id)).cloned()
    }

    pub fn log(&self) -> &LifecycleLog {
        &self.log
    }

    /// Factory with the `scripted` provider type registered
    pub fn factory(&self) -> ServiceFactory {
        let mut factory = ServiceFactory::new(Arc::new(StaticSecretStore::new()));
        let adapters = self.adapters.clone();
        factory.register_builder(SCRIPTED_PROVIDER, move |descriptor, _credentials| {
            let adapter = lock(&adapters).get(&descriptor.id).cloned().ok_or_else(|| {
                ConfigError::invalid(&descriptor.id, "no scripted adapter with this id")
            })?;
            Ok(adapter as Arc<dyn ProviderAdapter>)
        });
        factory
    }

    /// Empty registry backed by this fleet's factory
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(Arc::new(self.factory())))
    }
}

/// Alert sink that keeps every alert for inspection
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<AdapterDegraded>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AdapterDegraded> {
        lock(&self.alerts).clone()
    }

    pub fn alerts_for(&self, adapter_id: &str) -> Vec<AdapterDegraded> {
        lock(&self.alerts)
            .iter()
            .filter(|a| a.adapter_id.as_str() == adapter_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.alerts).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.alerts).is_empty()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn emit(&self, alert: AdapterDegraded) {
        lock(&self.alerts).push(alert);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
