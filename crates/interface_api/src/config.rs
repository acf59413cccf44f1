//! Gateway configuration
//!
//! Layered with the `config` crate: an optional `integration.{toml,json,yaml}`
//! file, then `INTEGRATION__*` environment variables, e.g.
//! `INTEGRATION__PORT=9090` or `INTEGRATION__CRM__STRATEGY=newest_wins`.

use serde::Deserialize;
use validator::Validate;

use domain_crm::CrmSettings;
use domain_registry::{AdapterDescriptor, RegistryConfig};
use domain_resilience::HealthMonitorConfig;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Used when `RUST_LOG` is not set
    pub log_level: String,
    pub log_format: LogFormat,
    /// When set, sync history and adapter descriptors live in PostgreSQL
    pub database_url: Option<String>,
    /// Prepended to every `credentials_ref` before the environment lookup
    pub secrets_prefix: Option<String>,
    #[validate(nested)]
    pub monitor: HealthMonitorConfig,
    #[validate(nested)]
    pub crm: CrmSettings,
    /// Adapters from the config file; ignored when the database holds a configuration
    pub adapters: Vec<AdapterDescriptor>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            secrets_prefix: None,
            monitor: HealthMonitorConfig::default(),
            crm: CrmSettings::default(),
            adapters: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from `file` (without extension) and the environment
    pub fn load(file: &str) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("INTEGRATION")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|errors| config::ConfigError::Message(errors.to_string()))?;
        Ok(config)
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The adapter configuration declared in the file
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.adapters.clone())
    }
}
