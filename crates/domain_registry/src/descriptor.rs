//! Adapter descriptors
//!
//! A descriptor is the configuration-time definition of one adapter: which
//! provider it talks to, which capabilities it serves, where its credentials
//! live and what it depends on. Descriptors are immutable once registered;
//! changing one means submitting a new configuration through hot reload.
//!
//! ```toml
//! [[adapters]]
//! id = "crm-eu"
//! provider_type = "rest_crm"
//! capabilities = ["contact_sync", "deal_sync"]
//! credentials_ref = "CRM_EU_TOKEN"
//! depends_on = ["templates"]
//!
//! [adapters.options]
//! timeout_ms = 3000
//! priority = 10
//! settings = { base_url = "https://crm.example.com/api" }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use core_kernel::{AdapterId, Capability, ConfigError};
use domain_resilience::CircuitBreakerConfig;

/// Tunables shared by every provider type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AdapterOptions {
    /// Per-call timeout
    #[validate(range(min = 1, max = 600000))]
    pub timeout_ms: u64,

    /// Provider-side call budget; enforced by adapters that support it
    #[validate(range(min = 1))]
    pub rate_limit_per_second: Option<u32>,

    /// Lower values are preferred when several adapters serve a capability
    #[validate(range(max = 10000))]
    pub priority: u32,

    /// Breaker tuning; defaults apply when absent
    #[validate(nested)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Provider-specific settings, interpreted by the provider's builder
    pub settings: Value,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            rate_limit_per_second: None,
            priority: 100,
            circuit_breaker: None,
            settings: Value::Object(Default::default()),
        }
    }
}

impl AdapterOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        self.circuit_breaker.clone().unwrap_or_default()
    }

    /// Returns a string setting
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// Definition of one configured adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    pub id: AdapterId,
    pub provider_type: String,
    pub capabilities: BTreeSet<Capability>,
    /// Name under which the secret store holds this adapter's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    #[serde(default)]
    pub options: AdapterOptions,
    #[serde(default)]
    pub depends_on: Vec<AdapterId>,
}

impl AdapterDescriptor {
    pub fn new(
        id: impl Into<AdapterId>,
        provider_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_type: provider_type.into(),
            capabilities: capabilities.into_iter().collect(),
            credentials_ref: None,
            options: AdapterOptions::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, dependency: impl Into<AdapterId>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn with_options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_credentials_ref(mut self, reference: impl Into<String>) -> Self {
        self.credentials_ref = Some(reference.into());
        self
    }

    pub fn priority(&self) -> u32 {
        self.options.priority
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Checks the descriptor on its own, without looking at other adapters
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` for structural problems or out-of-range options,
    /// `ConfigError::CyclicDependency` if the adapter depends on itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_blank() {
            return Err(ConfigError::invalid(&self.id, "adapter id must not be empty"));
        }
        if self.provider_type.trim().is_empty() {
            return Err(ConfigError::invalid(&self.id, "provider_type must not be empty"));
        }
        if self.capabilities.is_empty() {
            return Err(ConfigError::invalid(
                &self.id,
                "at least one capability must be declared",
            ));
        }
        if self.depends_on.contains(&self.id) {
            return Err(ConfigError::CyclicDependency {
                adapters: vec![self.id.clone()],
            });
        }

        let mut seen = HashSet::new();
        if let Some(repeated) = self.depends_on.iter().find(|dep| !seen.insert(*dep)) {
            return Err(ConfigError::invalid(
                &self.id,
                format!("dependency '{repeated}' is listed more than once"),
            ));
        }

        self.options
            .validate()
            .map_err(|errors| ConfigError::invalid(&self.id, errors.to_string()))
    }
}

/// A complete adapter configuration, the unit of hot reload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub adapters: Vec<AdapterDescriptor>,
}

impl RegistryConfig {
    pub fn new(adapters: Vec<AdapterDescriptor>) -> Self {
        Self { adapters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> AdapterDescriptor {
        AdapterDescriptor::new("crm-a", "in_memory_crm", [Capability::ContactSync])
    }

    #[test]
    fn test_valid_descriptor() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn test_rejects_blank_id() {
        let descriptor = AdapterDescriptor::new("  ", "in_memory_crm", [Capability::ContactSync]);
        assert!(matches!(descriptor.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_missing_capabilities() {
        let descriptor = AdapterDescriptor::new("crm-a", "in_memory_crm", []);
        assert!(matches!(descriptor.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let descriptor = descriptor().with_depends_on("crm-a");
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::CyclicDependency {
                adapters: vec![AdapterId::from("crm-a")]
            })
        );
    }

    #[test]
    fn test_rejects_repeated_dependency() {
        let descriptor = descriptor().with_depends_on("tpl").with_depends_on("tpl");
        assert!(matches!(descriptor.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let descriptor = descriptor().with_options(AdapterOptions {
            timeout_ms: 0,
            ..Default::default()
        });
        assert!(matches!(descriptor.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_invalid_breaker_options() {
        let descriptor = descriptor().with_options(AdapterOptions {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_rate_threshold: 2.0,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let json = r#"{
            "adapters": [{
                "id": "crm-a",
                "provider_type": "rest_crm",
                "capabilities": ["contact_sync", "deal_sync"],
                "options": { "priority": 5, "settings": { "base_url": "http://crm" } }
            }]
        }"#;
        let config: RegistryConfig = serde_json::from_str(json).unwrap();
        let adapter = &config.adapters[0];

        assert_eq!(adapter.priority(), 5);
        assert_eq!(adapter.options.timeout_ms, 5_000);
        assert_eq!(adapter.options.setting_str("base_url"), Some("http://crm"));
        assert!(adapter.supports(Capability::DealSync));
        assert!(adapter.depends_on.is_empty());
    }
}
