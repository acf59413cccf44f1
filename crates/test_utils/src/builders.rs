//! Test Data Builders
//!
//! Provides builder patterns for adapter descriptors and sync managers with
//! sensible defaults, so tests only spell out what they exercise.

use std::sync::Arc;

use serde_json::Value;

use core_kernel::{AdapterId, Capability};
use domain_crm::{CrmIntegrationManager, CrmSettings, InMemorySyncHistory, ResolutionStrategy};
use domain_registry::{AdapterDescriptor, AdapterOptions, ServiceRegistry};
use domain_resilience::CircuitBreakerConfig;

use crate::doubles::SCRIPTED_PROVIDER;
use crate::fixtures::ResilienceFixtures;

/// Builder for adapter descriptors
///
/// Defaults to a `scripted` contact adapter with the fixture breaker tuning.
pub struct TestDescriptorBuilder {
    id: AdapterId,
    provider_type: String,
    capabilities: Vec<Capability>,
    priority: u32,
    timeout_ms: u64,
    depends_on: Vec<AdapterId>,
    breaker: Option<CircuitBreakerConfig>,
    rate_limit_per_second: Option<u32>,
    credentials_ref: Option<String>,
    settings: Value,
}

impl TestDescriptorBuilder {
    pub fn new(id: impl Into<AdapterId>) -> Self {
        Self {
            id: id.into(),
            provider_type: SCRIPTED_PROVIDER.to_string(),
            capabilities: vec![Capability::ContactSync],
            priority: 100,
            timeout_ms: 1_000,
            depends_on: Vec::new(),
            breaker: Some(ResilienceFixtures::breaker()),
            rate_limit_per_second: None,
            credentials_ref: None,
            settings: Value::Object(Default::default()),
        }
    }

    pub fn with_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<AdapterId>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit_per_second = Some(per_second);
        self
    }

    pub fn with_credentials_ref(mut self, reference: impl Into<String>) -> Self {
        self.credentials_ref = Some(reference.into());
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> AdapterDescriptor {
        let options = AdapterOptions {
            timeout_ms: self.timeout_ms,
            rate_limit_per_second: self.rate_limit_per_second,
            priority: self.priority,
            circuit_breaker: self.breaker,
            settings: self.settings,
        };

        let mut descriptor = AdapterDescriptor::new(self.id, self.provider_type, self.capabilities)
            .with_options(options);
        for dependency in self.depends_on {
            descriptor = descriptor.with_depends_on(dependency);
        }
        if let Some(reference) = self.credentials_ref {
            descriptor = descriptor.with_credentials_ref(reference);
        }
        descriptor
    }
}

/// Builder for a sync manager over an existing registry
pub struct TestManagerBuilder {
    registry: Arc<ServiceRegistry>,
    history: Arc<InMemorySyncHistory>,
    settings: CrmSettings,
}

impl TestManagerBuilder {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            history: Arc::new(InMemorySyncHistory::new()),
            settings: CrmSettings::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.settings.strategy = strategy;
        self
    }

    pub fn with_primary(mut self, primary: impl Into<AdapterId>) -> Self {
        self.settings.primary_adapter = Some(primary.into());
        self
    }

    pub fn with_per_call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.settings.per_call_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_aggregate_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.settings.aggregate_deadline_ms = deadline_ms;
        self
    }

    pub fn with_history(mut self, history: Arc<InMemorySyncHistory>) -> Self {
        self.history = history;
        self
    }

    /// Builds the manager, returning the history it appends to
    pub fn build(self) -> (CrmIntegrationManager, Arc<InMemorySyncHistory>) {
        let manager =
            CrmIntegrationManager::new(self.registry, self.history.clone(), self.settings);
        (manager, self.history)
    }
}
