//! PostgreSQL sync history
//!
//! Each report is stored whole as JSONB next to a few indexed summary
//! columns. Reports are append-only; a second insert for the same operation
//! id is rejected by the primary key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::OperationId;
use domain_crm::{HistoryError, SyncHistory, SyncReport};

use crate::error::DatabaseError;

#[derive(Debug, FromRow)]
struct SyncReportRow {
    report: Json<SyncReport>,
}

/// Sync history persisted in the `sync_reports` table
#[derive(Debug, Clone)]
pub struct PostgresSyncHistory {
    pool: PgPool,
}

impl PostgresSyncHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reports carrying `correlation_id`, oldest first
    pub async fn by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<SyncReport>, DatabaseError> {
        let rows = sqlx::query_as::<_, SyncReportRow>(
            r#"
            SELECT report
            FROM sync_reports
            WHERE correlation_id = $1
            ORDER BY completed_at, operation_id
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.report.0).collect())
    }

    async fn insert(&self, report: &SyncReport) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO sync_reports (
                operation_id, entity_type, correlation_id,
                success_count, failure_count, skipped_count, has_conflicts,
                started_at, completed_at, report
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::from(report.operation_id))
        .bind(report.entity_type.as_str())
        .bind(report.correlation_id.as_deref())
        .bind(report.success_count() as i32)
        .bind(report.failure_count() as i32)
        .bind(report.skipped_count() as i32)
        .bind(report.has_conflicts())
        .bind(report.started_at)
        .bind(report.completed_at)
        .bind(Json(report))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SyncHistory for PostgresSyncHistory {
    #[instrument(skip(self, report), fields(operation_id = %report.operation_id))]
    async fn append(&self, report: &SyncReport) -> Result<(), HistoryError> {
        match self.insert(report).await {
            Ok(()) => {
                debug!("Sync report stored");
                Ok(())
            }
            Err(error) if error.is_duplicate() => Err(HistoryError::Duplicate(report.operation_id)),
            Err(error) => Err(error.into()),
        }
    }

    async fn get(&self, operation_id: OperationId) -> Result<Option<SyncReport>, HistoryError> {
        let row = sqlx::query_as::<_, SyncReportRow>(
            "SELECT report FROM sync_reports WHERE operation_id = $1",
        )
        .bind(Uuid::from(operation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(row.map(|row| row.report.0))
    }

    async fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SyncReport>, HistoryError> {
        let rows = sqlx::query_as::<_, SyncReportRow>(
            r#"
            SELECT report
            FROM sync_reports
            WHERE completed_at >= $1 AND completed_at < $2
            ORDER BY completed_at, operation_id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows.into_iter().map(|row| row.report.0).collect())
    }
}
