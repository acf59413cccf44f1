//! Domain CRM - Multi-provider CRM synchronization
//!
//! This crate keeps one logical entity consistent across several CRM
//! backends:
//! - Parallel fan-out through each adapter's circuit breaker
//! - Field-level conflict detection across successful results
//! - Policy-driven conflict resolution
//! - Sync reports and an append-only sync history
//! - Reference adapters (in-memory and REST)

pub mod report;
pub mod conflict;
pub mod resolution;
pub mod history;
pub mod manager;
pub mod adapters;
pub mod error;

pub use report::{AdapterOutcome, AdapterResult, Conflict, SkipReason, SyncOperation, SyncReport};
pub use conflict::{detect_conflicts, values_equal};
pub use resolution::{resolve, Candidate, Resolution, ResolutionStrategy};
pub use history::{InMemorySyncHistory, SyncHistory};
pub use manager::{BusinessEvent, CrmIntegrationManager, CrmSettings};
pub use adapters::{register_reference_builders, InMemoryCrmAdapter, RestCrmAdapter};
pub use error::{HistoryError, SyncError};
