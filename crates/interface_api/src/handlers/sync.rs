//! Sync handlers: event intake and report export

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use core_kernel::OperationId;
use domain_crm::{BusinessEvent, SyncHistory, SyncReport};

use crate::{error::ApiError, AppState};

/// Time window for report export, `[from, to)`
#[derive(Debug, Deserialize)]
pub struct ReportRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Fans a business event out to the CRM adapters
///
/// Partial success is a 200 with the failures listed per adapter. When no
/// adapter succeeds the full report comes back with a 503.
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<BusinessEvent>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.manager.handle_event(event).await?;
    info!(
        operation_id = %report.operation_id,
        succeeded = report.success_count(),
        conflicts = report.conflicts.len(),
        "Sync event processed"
    );
    Ok(Json(report))
}

/// Looks one report up by operation id
pub async fn get_report(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<SyncReport>, ApiError> {
    let operation_id: OperationId = operation_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("'{operation_id}' is not an operation id")))?;

    state
        .manager
        .history()
        .get(operation_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Sync report {operation_id} not found")))
}

/// Exports reports completed within a time window, oldest first
pub async fn list_reports(
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<Vec<SyncReport>>, ApiError> {
    if range.from >= range.to {
        return Err(ApiError::BadRequest("'from' must be before 'to'".to_string()));
    }

    let reports = state.manager.history().range(range.from, range.to).await?;
    Ok(Json(reports))
}
