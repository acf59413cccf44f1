//! CRM integration errors
//!
//! Individual adapter failures are never errors here: they are recorded as
//! data in the sync report. `SyncError` covers the two cases where the
//! manager itself has nothing usable to hand back.

use thiserror::Error;

use core_kernel::{Capability, EntityType, OperationId};

use crate::report::SyncReport;

/// Errors returned by a sync operation
#[derive(Debug, Error)]
pub enum SyncError {
    /// No adapter is configured for the entity's capability
    #[error("No adapter configured for {capability} ({entity_type})")]
    NoTargetAdapters {
        entity_type: EntityType,
        capability: Capability,
    },

    /// Every targeted adapter failed or was skipped
    ///
    /// The report is complete and has already been appended to the history.
    #[error(
        "Sync {} failed on every adapter ({} failed, {} skipped)",
        .report.operation_id,
        .report.failure_count(),
        .report.skipped_count()
    )]
    AggregateSyncFailure {
        report: Box<SyncReport>,
    },
}

impl SyncError {
    /// Returns the sync report, if the operation got as far as producing one
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncError::AggregateSyncFailure { report } => Some(report),
            SyncError::NoTargetAdapters { .. } => None,
        }
    }

    /// Consumes the error, returning its report
    pub fn into_report(self) -> Option<SyncReport> {
        match self {
            SyncError::AggregateSyncFailure { report } => Some(*report),
            SyncError::NoTargetAdapters { .. } => None,
        }
    }
}

/// Errors from a sync history store
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A report with this operation id was already appended
    #[error("Sync report {0} already recorded")]
    Duplicate(OperationId),

    /// The report could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Serialization(err.to_string())
    }
}
