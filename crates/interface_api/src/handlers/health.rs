//! Health check handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use core_kernel::{AdapterHealth, AdapterId};
use domain_resilience::{HealthRecord, HealthReport};

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: AdapterHealth,
    pub version: String,
    pub healthy_adapters: usize,
    pub total_adapters: usize,
}

/// Liveness plus a fleet summary
///
/// Answers 503 only when every adapter is unhealthy.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.monitor.report().await;
    let code = if report.total_count > 0 && !report.is_operational() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            status: report.overall_status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            healthy_adapters: report.healthy_count,
            total_adapters: report.total_count,
        }),
    )
}

/// Per-adapter circuit state, rolling success rate and latency
pub async fn adapter_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.monitor.report().await)
}

/// Retained probe history for one adapter, oldest first
pub async fn adapter_history(
    State(state): State<AppState>,
    Path(adapter_id): Path<String>,
) -> Result<Json<Vec<HealthRecord>>, ApiError> {
    let history = state.monitor.history(&AdapterId::from(adapter_id)).await?;
    Ok(Json(history))
}
