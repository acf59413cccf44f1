//! Adapter registry handlers

use std::collections::BTreeSet;

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use core_kernel::{AdapterId, Capability};
use domain_registry::{AdapterStatus, RegistryConfig, ReloadSummary};
use domain_resilience::CircuitState;

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct AdapterSummary {
    pub id: AdapterId,
    pub provider_type: String,
    pub capabilities: BTreeSet<Capability>,
    pub priority: u32,
    pub status: AdapterStatus,
    pub circuit_state: CircuitState,
    pub retired: bool,
}

/// Lists every registered adapter in priority order
pub async fn list_adapters(State(state): State<AppState>) -> Json<Vec<AdapterSummary>> {
    let snapshot = state.registry.snapshot();
    let mut adapters: Vec<AdapterSummary> = snapshot
        .handles()
        .map(|handle| AdapterSummary {
            id: handle.id().clone(),
            provider_type: handle.descriptor().provider_type.clone(),
            capabilities: handle.descriptor().capabilities.clone(),
            priority: handle.priority(),
            status: handle.status(),
            circuit_state: handle.breaker().state(),
            retired: snapshot.is_retired(handle.id()),
        })
        .collect();

    adapters.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    Json(adapters)
}

/// Swaps in a new adapter configuration
///
/// The configuration is applied all-or-nothing. When a database is
/// configured, the accepted configuration is persisted afterwards.
pub async fn reload(
    State(state): State<AppState>,
    Json(config): Json<RegistryConfig>,
) -> Result<Json<ReloadSummary>, ApiError> {
    let summary = state.registry.hot_reload_config(config.clone()).await?;

    if let Some(repository) = &state.descriptors {
        repository
            .replace_config(&config)
            .await
            .map_err(|err| ApiError::Storage(err.to_string()))?;
    }

    info!(
        added = summary.added.len(),
        removed = summary.removed.len(),
        replaced = summary.replaced.len(),
        "Adapter configuration reloaded via API"
    );
    Ok(Json(summary))
}
