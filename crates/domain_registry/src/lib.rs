//! Domain Registry - Adapter configuration and lifecycle
//!
//! This crate turns adapter configuration into live, breaker-guarded handles:
//! - Descriptors and their validation
//! - Credential resolution through a pluggable secret store
//! - The service factory mapping provider types to builders
//! - Dependency ordering for start and stop
//! - The service registry with capability lookup and atomic hot reload

pub mod descriptor;
pub mod secrets;
pub mod factory;
pub mod graph;
pub mod handle;
pub mod registry;

pub use descriptor::{AdapterDescriptor, AdapterOptions, RegistryConfig};
pub use secrets::{Credentials, EnvSecretStore, SecretError, SecretStore, StaticSecretStore};
pub use factory::{AdapterBuilder, ServiceFactory};
pub use graph::DependencyGraph;
pub use handle::{AdapterHandle, AdapterStatus};
pub use registry::{
    LifecycleFailure, LifecycleReport, RegistrySnapshot, ReloadSummary, ServiceRegistry,
};
