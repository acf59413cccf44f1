//! Sync history
//!
//! Append-only log of sync reports, queryable by operation id or by
//! completion time. Every append writes one whole report; concurrent appends
//! never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use core_kernel::OperationId;

use crate::error::HistoryError;
use crate::report::SyncReport;

/// Storage for sync reports
#[async_trait]
pub trait SyncHistory: Send + Sync {
    /// Appends a report; a second report with the same operation id is rejected
    async fn append(&self, report: &SyncReport) -> Result<(), HistoryError>;

    /// Looks a report up by its operation id
    async fn get(&self, operation_id: OperationId) -> Result<Option<SyncReport>, HistoryError>;

    /// Reports completed in `[from, to)`, oldest first
    async fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SyncReport>, HistoryError>;
}

/// In-process history, for tests and single-node deployments
///
/// Reports are kept in append order with an operation id index over the
/// same entries, so duplicate checks and lookups do not scan the log.
#[derive(Debug, Default)]
pub struct InMemorySyncHistory {
    inner: RwLock<HistoryLog>,
}

#[derive(Debug, Default)]
struct HistoryLog {
    reports: Vec<Arc<SyncReport>>,
    by_id: HashMap<OperationId, Arc<SyncReport>>,
}

impl InMemorySyncHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.reports.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.reports.is_empty()
    }

    /// Every report in append order
    pub async fn all(&self) -> Vec<SyncReport> {
        self.inner
            .read()
            .await
            .reports
            .iter()
            .map(|r| r.as_ref().clone())
            .collect()
    }
}

#[async_trait]
impl SyncHistory for InMemorySyncHistory {
    async fn append(&self, report: &SyncReport) -> Result<(), HistoryError> {
        let mut log = self.inner.write().await;
        if log.by_id.contains_key(&report.operation_id) {
            return Err(HistoryError::Duplicate(report.operation_id));
        }
        let entry = Arc::new(report.clone());
        log.by_id.insert(entry.operation_id, entry.clone());
        log.reports.push(entry);
        Ok(())
    }

    async fn get(&self, operation_id: OperationId) -> Result<Option<SyncReport>, HistoryError> {
        let log = self.inner.read().await;
        Ok(log.by_id.get(&operation_id).map(|r| r.as_ref().clone()))
    }

    async fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SyncReport>, HistoryError> {
        let log = self.inner.read().await;
        let mut matching: Vec<SyncReport> = log
            .reports
            .iter()
            .filter(|r| r.completed_at >= from && r.completed_at < to)
            .map(|r| r.as_ref().clone())
            .collect();
        matching.sort_by_key(|r| r.completed_at);
        Ok(matching)
    }
}
