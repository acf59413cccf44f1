//! Reference provider adapters
//!
//! - **InMemoryCrmAdapter**: self-contained CRM for local runs and tests
//! - **RestCrmAdapter**: JSON-over-HTTP CRM behind a pluggable transport
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut factory = ServiceFactory::new(Arc::new(EnvSecretStore::new()));
//! register_reference_builders(&mut factory);
//! let registry = Arc::new(ServiceRegistry::new(Arc::new(factory)));
//! ```

pub mod in_memory;
pub mod rest;

use std::sync::Arc;

use core_kernel::{ConfigError, ProviderAdapter};
use domain_registry::ServiceFactory;

pub use in_memory::{FieldTransform, InMemoryCrmAdapter, InMemoryCrmSettings};
pub use rest::{
    error_for_response, CrmTransport, HttpMethod, HttpTransport, RestCrmAdapter, RestCrmConfig,
    TransportError, TransportRequest, TransportResponse,
};

/// Registers the `in_memory_crm` and `rest_crm` provider types
pub fn register_reference_builders(factory: &mut ServiceFactory) {
    factory.register_builder(in_memory::PROVIDER_TYPE, |descriptor, _credentials| {
        let adapter = InMemoryCrmAdapter::from_descriptor(descriptor)?;
        Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
    });

    factory.register_builder(rest::PROVIDER_TYPE, |descriptor, credentials| {
        let config = RestCrmConfig::from_descriptor(descriptor)?;
        let transport = HttpTransport::new(
            config.base_url.clone(),
            credentials,
            descriptor.options.timeout(),
        )
        .map_err(|e| ConfigError::invalid(&descriptor.id, e.to_string()))?;
        Ok(Arc::new(RestCrmAdapter::new(config, transport)) as Arc<dyn ProviderAdapter>)
    });
}
