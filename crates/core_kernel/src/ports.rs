//! Provider Adapter Ports
//!
//! This module defines the capability contract every provider adapter
//! implements. Callers never depend on a concrete provider type; they look
//! adapters up by [`Capability`] and invoke them through [`dispatch`].
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CRM Integration Manager                     │
//! │            (fan-out, conflict detection, reports)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ resolve(capability)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Service Registry  ──►  Circuit Breaker per adapter  │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                         │
//!         ┌─────────┴─────────┐     ┌────────┴────────┐
//!         │  ContactSync      │     │  DealSync        │
//!         │  (CRM A, CRM B)   │     │  PaymentCharge   │
//!         └───────────────────┘     └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! struct HubspotAdapter { /* connection handle */ }
//!
//! #[async_trait]
//! impl ContactSync for HubspotAdapter { ... }
//!
//! #[async_trait]
//! impl ProviderAdapter for HubspotAdapter {
//!     fn provider_type(&self) -> &str { "hubspot" }
//!     fn contact_sync(&self) -> Option<&dyn ContactSync> { Some(self) }
//!     async fn probe(&self) -> Result<(), AdapterError> { ... }
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{EntityType, NormalizedEntity};

/// Error type for adapter operations
///
/// Adapters translate their provider's error responses into this taxonomy so
/// that the circuit breaker and callers can tell "retry later" from "give up".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The provider throttled the call
    #[error("Rate limited: retry after {}ms", .retry_after.as_millis())]
    RateLimited {
        retry_after: Duration,
    },

    /// Credentials were rejected
    #[error("Authentication failed: {message}")]
    AuthFailure {
        message: String,
    },

    /// Temporary failure (network, 5xx, timeout)
    #[error("Transient failure: {message}")]
    Transient {
        message: String,
    },

    /// The provider refused the operation and will keep refusing it
    #[error("Permanent failure: {message}")]
    Permanent {
        message: String,
    },

    /// The payload or the provider's response could not be interpreted
    #[error("Malformed data: {message}")]
    Malformed {
        message: String,
    },
}

impl AdapterError {
    /// Creates a Transient error
    pub fn transient(message: impl Into<String>) -> Self {
        AdapterError::Transient { message: message.into() }
    }

    /// Creates a Permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        AdapterError::Permanent { message: message.into() }
    }

    /// Creates a Malformed error
    pub fn malformed(message: impl Into<String>) -> Self {
        AdapterError::Malformed { message: message.into() }
    }

    /// Creates an AuthFailure error
    pub fn auth(message: impl Into<String>) -> Self {
        AdapterError::AuthFailure { message: message.into() }
    }

    /// Creates a RateLimited error
    pub fn rate_limited(retry_after: Duration) -> Self {
        AdapterError::RateLimited { retry_after }
    }

    /// Creates the error recorded for a call that exceeded its deadline
    pub fn timeout(after: Duration) -> Self {
        AdapterError::Transient {
            message: format!("timed out after {}ms", after.as_millis()),
        }
    }

    /// Returns true if the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Transient { .. }
        )
    }

    /// Returns true if this outcome should count against the provider's health
    ///
    /// A malformed request is the caller's fault: the provider answered, so it
    /// does not count as a breaker failure.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, AdapterError::Malformed { .. })
    }

    /// Returns the serializable classification of this error
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            AdapterError::RateLimited { .. } => AdapterErrorKind::RateLimited,
            AdapterError::AuthFailure { .. } => AdapterErrorKind::AuthFailure,
            AdapterError::Transient { .. } => AdapterErrorKind::Transient,
            AdapterError::Permanent { .. } => AdapterErrorKind::Permanent,
            AdapterError::Malformed { .. } => AdapterErrorKind::Malformed,
        }
    }
}

/// Classification of an [`AdapterError`], stored in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    RateLimited,
    AuthFailure,
    Transient,
    Permanent,
    Malformed,
}

/// A named, provider-agnostic operation an adapter may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Contact create/update/upsert
    ContactSync,
    /// Deal create/update/upsert
    DealSync,
    /// Charging a payment
    PaymentCharge,
    /// Acknowledging an inbound provider webhook
    WebhookAck,
    /// Sending a notification (email, SMS)
    Notification,
    /// Rendering templates for other adapters
    Templating,
}

impl Capability {
    /// All capabilities, in declaration order
    pub const ALL: [Capability; 6] = [
        Capability::ContactSync,
        Capability::DealSync,
        Capability::PaymentCharge,
        Capability::WebhookAck,
        Capability::Notification,
        Capability::Templating,
    ];

    /// Returns the canonical snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ContactSync => "contact_sync",
            Capability::DealSync => "deal_sync",
            Capability::PaymentCharge => "payment_charge",
            Capability::WebhookAck => "webhook_ack",
            Capability::Notification => "notification",
            Capability::Templating => "templating",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntityType {
    /// Returns the capability that writes entities of this type
    pub fn capability(&self) -> Capability {
        match self {
            EntityType::Contact => Capability::ContactSync,
            EntityType::Deal => Capability::DealSync,
            EntityType::Payment => Capability::PaymentCharge,
        }
    }
}

/// Metadata about an adapter call for auditing and tracing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Correlation ID for tracing across systems
    pub correlation_id: Option<String>,
    /// User or system that initiated the operation
    pub initiated_by: Option<String>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl OperationMetadata {
    /// Creates new metadata with a correlation ID
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Default::default()
        }
    }

    /// Adds context to the metadata
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Contact synchronization capability
#[async_trait]
pub trait ContactSync: Send + Sync {
    /// Creates a contact in the provider
    async fn create_contact(
        &self,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError>;

    /// Updates the contact the provider knows as `external_id`
    async fn update_contact(
        &self,
        external_id: &str,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError>;

    /// Creates or updates a contact
    ///
    /// The default updates when the payload carries an `external_id` and
    /// creates otherwise. Providers with a natural key (email) override this.
    async fn upsert_contact(
        &self,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        match contact.external_id.as_deref() {
            Some(id) => self.update_contact(id, contact, metadata).await,
            None => self.create_contact(contact, metadata).await,
        }
    }
}

/// Deal synchronization capability
#[async_trait]
pub trait DealSync: Send + Sync {
    async fn create_deal(
        &self,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError>;

    async fn update_deal(
        &self,
        external_id: &str,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError>;

    async fn upsert_deal(
        &self,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        match deal.external_id.as_deref() {
            Some(id) => self.update_deal(id, deal, metadata).await,
            None => self.create_deal(deal, metadata).await,
        }
    }
}

/// Payment charging capability
#[async_trait]
pub trait PaymentCharge: Send + Sync {
    /// Charges the payment described by `payment` and returns the provider's record
    async fn charge(
        &self,
        payment: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError>;
}

/// Webhook acknowledgement capability
#[async_trait]
pub trait WebhookAck: Send + Sync {
    async fn send_webhook_ack(
        &self,
        ack: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<(), AdapterError>;
}

/// The contract every provider adapter implements
///
/// An adapter advertises capabilities by returning `Some` from the matching
/// accessor. Capabilities without a typed call path here (notification,
/// templating) are advertised through `extra_capabilities`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Provider type this adapter talks to (e.g. "rest_crm")
    fn provider_type(&self) -> &str;

    fn contact_sync(&self) -> Option<&dyn ContactSync> {
        None
    }

    fn deal_sync(&self) -> Option<&dyn DealSync> {
        None
    }

    fn payment_charge(&self) -> Option<&dyn PaymentCharge> {
        None
    }

    fn webhook_ack(&self) -> Option<&dyn WebhookAck> {
        None
    }

    fn extra_capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::new()
    }

    /// Returns every capability the adapter implements
    fn capabilities(&self) -> BTreeSet<Capability> {
        let mut capabilities = self.extra_capabilities();
        if self.contact_sync().is_some() {
            capabilities.insert(Capability::ContactSync);
        }
        if self.deal_sync().is_some() {
            capabilities.insert(Capability::DealSync);
        }
        if self.payment_charge().is_some() {
            capabilities.insert(Capability::PaymentCharge);
        }
        if self.webhook_ack().is_some() {
            capabilities.insert(Capability::WebhookAck);
        }
        capabilities
    }

    /// Opens connections or warms caches; called once by the registry
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Releases provider resources; called once by the registry
    async fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Lightweight liveness check used by the health monitor
    async fn probe(&self) -> Result<(), AdapterError>;
}

/// Invokes the write capability matching `entity_type` on `adapter`
///
/// # Errors
///
/// Returns `AdapterError::Permanent` if the adapter does not implement the
/// capability, otherwise whatever the adapter returns.
pub async fn dispatch(
    adapter: &dyn ProviderAdapter,
    entity_type: EntityType,
    payload: &NormalizedEntity,
    metadata: &OperationMetadata,
) -> Result<NormalizedEntity, AdapterError> {
    let missing = || {
        AdapterError::permanent(format!(
            "{} adapter does not implement {}",
            adapter.provider_type(),
            entity_type.capability()
        ))
    };

    match entity_type {
        EntityType::Contact => {
            adapter.contact_sync().ok_or_else(missing)?
                .upsert_contact(payload, metadata)
                .await
        }
        EntityType::Deal => {
            adapter.deal_sync().ok_or_else(missing)?
                .upsert_deal(payload, metadata)
                .await
        }
        EntityType::Payment => {
            adapter.payment_charge().ok_or_else(missing)?
                .charge(payload, metadata)
                .await
        }
    }
}

/// Health status for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    /// Adapter is healthy and operational
    Healthy,
    /// Adapter is degraded but operational
    Degraded,
    /// Adapter is unhealthy and not operational
    Unhealthy,
    /// Health status is unknown
    Unknown,
}
