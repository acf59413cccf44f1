//! Service Factory
//!
//! Maps provider types to builder functions. The registry never constructs
//! adapters itself; it validates a descriptor, then asks the factory for a
//! handle.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut factory = ServiceFactory::new(Arc::new(EnvSecretStore::new()));
//! factory.register_builder("rest_crm", |descriptor, credentials| {
//!     let adapter = RestCrmAdapter::from_descriptor(descriptor, credentials)?;
//!     Ok(Arc::new(adapter))
//! });
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use core_kernel::{ConfigError, ProviderAdapter};
use domain_resilience::{BreakerEvents, CircuitBreaker};

use crate::descriptor::AdapterDescriptor;
use crate::handle::AdapterHandle;
use crate::secrets::{Credentials, SecretStore};

/// Constructs an adapter from its descriptor and resolved credentials
pub type AdapterBuilder = Arc<
    dyn Fn(&AdapterDescriptor, Option<Credentials>) -> Result<Arc<dyn ProviderAdapter>, ConfigError>
        + Send
        + Sync,
>;

pub struct ServiceFactory {
    builders: BTreeMap<String, AdapterBuilder>,
    secrets: Arc<dyn SecretStore>,
}

impl ServiceFactory {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            builders: BTreeMap::new(),
            secrets,
        }
    }

    /// Registers (or replaces) the builder for `provider_type`
    pub fn register_builder<F>(&mut self, provider_type: impl Into<String>, builder: F)
    where
        F: Fn(&AdapterDescriptor, Option<Credentials>) -> Result<Arc<dyn ProviderAdapter>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(provider_type.into(), Arc::new(builder));
    }

    pub fn provider_types(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn supports(&self, provider_type: &str) -> bool {
        self.builders.contains_key(provider_type)
    }

    /// Validates a descriptor without instantiating anything
    pub fn validate(&self, descriptor: &AdapterDescriptor) -> Result<(), ConfigError> {
        descriptor.validate()?;
        if !self.supports(&descriptor.provider_type) {
            return Err(ConfigError::UnknownProviderType {
                adapter: descriptor.id.clone(),
                provider_type: descriptor.provider_type.clone(),
            });
        }
        Ok(())
    }

    /// Instantiates the adapter and wraps it with its circuit breaker
    ///
    /// # Errors
    ///
    /// Validation errors, `ConfigError::Credentials` when the reference cannot
    /// be resolved, builder errors, and `ConfigError::MissingCapability` when
    /// the built adapter does not implement a declared capability.
    pub async fn create(
        &self,
        descriptor: &AdapterDescriptor,
        events: &BreakerEvents,
    ) -> Result<Arc<AdapterHandle>, ConfigError> {
        self.validate(descriptor)?;

        let builder = self.builders.get(&descriptor.provider_type).ok_or_else(|| {
            ConfigError::UnknownProviderType {
                adapter: descriptor.id.clone(),
                provider_type: descriptor.provider_type.clone(),
            }
        })?;

        let credentials = match &descriptor.credentials_ref {
            Some(reference) => Some(
                self.secrets
                    .resolve(reference)
                    .await
                    .map_err(|e| ConfigError::credentials(&descriptor.id, e.to_string()))?,
            ),
            None => None,
        };

        let adapter = builder(descriptor, credentials)?;

        let implemented = adapter.capabilities();
        if let Some(missing) = descriptor
            .capabilities
            .iter()
            .find(|capability| !implemented.contains(*capability))
        {
            return Err(ConfigError::MissingCapability {
                adapter: descriptor.id.clone(),
                capability: *missing,
            });
        }

        let breaker = CircuitBreaker::with_events(
            descriptor.id.clone(),
            descriptor.options.breaker_config(),
            events.clone(),
        );

        Ok(Arc::new(AdapterHandle::new(descriptor.clone(), adapter, breaker)))
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("provider_types", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretStore;
    use async_trait::async_trait;
    use core_kernel::{
        AdapterError, AdapterId, Capability, ContactSync, NormalizedEntity, OperationMetadata,
    };
    use std::sync::Mutex;

    struct Contacts;

    #[async_trait]
    impl ContactSync for Contacts {
        async fn create_contact(
            &self,
            contact: &NormalizedEntity,
            _metadata: &OperationMetadata,
        ) -> Result<NormalizedEntity, AdapterError> {
            Ok(contact.clone())
        }

        async fn update_contact(
            &self,
            _external_id: &str,
            contact: &NormalizedEntity,
            _metadata: &OperationMetadata,
        ) -> Result<NormalizedEntity, AdapterError> {
            Ok(contact.clone())
        }
    }

    #[async_trait]
    impl ProviderAdapter for Contacts {
        fn provider_type(&self) -> &str {
            "contacts"
        }

        fn contact_sync(&self) -> Option<&dyn ContactSync> {
            Some(self)
        }

        async fn probe(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn factory(seen: Arc<Mutex<Option<String>>>) -> ServiceFactory {
        let secrets = StaticSecretStore::new().with_secret("TOKEN", "s3cret");
        let mut factory = ServiceFactory::new(Arc::new(secrets));
        factory.register_builder("contacts", move |_, credentials| {
            *seen.lock().unwrap() = credentials.map(|c| c.expose().to_string());
            Ok(Arc::new(Contacts) as Arc<dyn ProviderAdapter>)
        });
        factory
    }

    #[tokio::test]
    async fn test_creates_handle_with_credentials() {
        let seen = Arc::new(Mutex::new(None));
        let factory = factory(seen.clone());
        let descriptor = AdapterDescriptor::new("crm-a", "contacts", [Capability::ContactSync])
            .with_credentials_ref("TOKEN");

        let handle = factory
            .create(&descriptor, &BreakerEvents::default())
            .await
            .unwrap();

        assert_eq!(handle.id().as_str(), "crm-a");
        assert_eq!(seen.lock().unwrap().as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_unknown_provider_type() {
        let factory = factory(Arc::default());
        let descriptor = AdapterDescriptor::new("crm-a", "salesforce", [Capability::ContactSync]);

        let error = factory.validate(&descriptor).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownProviderType { .. }));
    }

    #[tokio::test]
    async fn test_unresolvable_credentials() {
        let factory = factory(Arc::default());
        let descriptor = AdapterDescriptor::new("crm-a", "contacts", [Capability::ContactSync])
            .with_credentials_ref("MISSING");

        let error = factory
            .create(&descriptor, &BreakerEvents::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ConfigError::Credentials { .. }));
    }

    #[tokio::test]
    async fn test_declared_capability_must_be_implemented() {
        let factory = factory(Arc::default());
        let descriptor = AdapterDescriptor::new(
            "crm-a",
            "contacts",
            [Capability::ContactSync, Capability::PaymentCharge],
        );

        let error = factory
            .create(&descriptor, &BreakerEvents::default())
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ConfigError::MissingCapability {
                adapter: AdapterId::from("crm-a"),
                capability: Capability::PaymentCharge,
            }
        );
    }
}
