//! Configuration error types used across the integration layer

use thiserror::Error;

use crate::identifiers::AdapterId;
use crate::ports::Capability;

/// Errors raised while loading, validating or applying adapter configuration
///
/// Fatal at startup; recoverable at runtime by submitting a corrected
/// configuration through hot reload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Cyclic dependency between adapters: {}", join(.adapters))]
    CyclicDependency {
        adapters: Vec<AdapterId>,
    },

    #[error("Adapter '{adapter}' depends on unknown adapter '{dependency}'")]
    UnknownDependency {
        adapter: AdapterId,
        dependency: AdapterId,
    },

    #[error("Adapter '{0}' is already registered")]
    DuplicateAdapter(AdapterId),

    #[error("Adapter '{0}' is not registered")]
    UnknownAdapter(AdapterId),

    #[error("Adapter '{adapter}': unknown provider type '{provider_type}'")]
    UnknownProviderType {
        adapter: AdapterId,
        provider_type: String,
    },

    #[error("Adapter '{adapter}' declares {capability} but the provider does not implement it")]
    MissingCapability {
        adapter: AdapterId,
        capability: Capability,
    },

    #[error("Adapter '{adapter}': credentials could not be resolved: {message}")]
    Credentials {
        adapter: AdapterId,
        message: String,
    },

    #[error("Adapter '{adapter}': invalid configuration: {message}")]
    Invalid {
        adapter: AdapterId,
        message: String,
    },

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub fn invalid(adapter: &AdapterId, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            adapter: adapter.clone(),
            message: message.into(),
        }
    }

    pub fn credentials(adapter: &AdapterId, message: impl Into<String>) -> Self {
        ConfigError::Credentials {
            adapter: adapter.clone(),
            message: message.into(),
        }
    }

    /// Returns true for errors about the shape of the dependency graph
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            ConfigError::CyclicDependency { .. } | ConfigError::UnknownDependency { .. }
        )
    }
}

fn join(adapters: &[AdapterId]) -> String {
    adapters
        .iter()
        .map(AdapterId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
