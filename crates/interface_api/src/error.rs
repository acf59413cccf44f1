//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use core_kernel::ConfigError;
use domain_crm::{HistoryError, SyncError, SyncReport};
use domain_resilience::MonitorError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rejected adapter configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No adapter can serve this request: {0}")]
    NoTargets(String),

    /// Every targeted adapter failed; the body is the full report
    #[error("Sync failed on every targeted adapter")]
    SyncFailed(Box<SyncReport>),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_configuration"),
            ApiError::NoTargets(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_target_adapters"),
            ApiError::SyncFailed(report) => {
                return (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response();
            }
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NoTargetAdapters { .. } => ApiError::NoTargets(err.to_string()),
            SyncError::AggregateSyncFailure { report } => ApiError::SyncFailed(report),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::UnknownAdapter(id) => {
                ApiError::NotFound(format!("Adapter '{id}' is not monitored"))
            }
        }
    }
}
