//! Core Kernel - Foundational types for the integration layer
//!
//! This crate provides the building blocks shared by every other crate:
//! - Identifiers for adapters and sync operations
//! - The normalized, provider-agnostic entity model
//! - The capability-oriented provider adapter contract and its error taxonomy
//! - Configuration errors

pub mod identifiers;
pub mod entity;
pub mod ports;
pub mod error;

pub use identifiers::{AdapterId, AlertId, OperationId};
pub use entity::{EntityType, NormalizedEntity};
pub use ports::{
    dispatch, AdapterError, AdapterErrorKind, AdapterHealth, Capability, ContactSync, DealSync,
    OperationMetadata, PaymentCharge, ProviderAdapter, WebhookAck,
};
pub use error::ConfigError;
