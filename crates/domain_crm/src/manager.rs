//! CRM Integration Manager
//!
//! Makes one logical write land on every CRM adapter serving the entity's
//! capability, and reports how each of them fared.
//!
//! # Flow
//!
//! ```text
//!   sync(contact, payload)
//!        │ resolve(ContactSync)            registry snapshot, priority order
//!        ▼
//!   ┌─────────┬─────────┬─────────┐
//!   │ breaker │ breaker │ breaker │       in parallel, per-call timeout
//!   │ crm-a   │ crm-b   │ crm-c   │       open breaker: Skipped, not called
//!   └────┬────┴────┬────┴────┬────┘
//!        └─────────┼─────────┘            aggregate deadline
//!                  ▼
//!        detect conflicts ──► resolve ──► SyncReport ──► SyncHistory
//! ```
//!
//! A failing adapter never fails the operation. `sync` only returns an error
//! when no adapter succeeded, and even then the report is recorded.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use core_kernel::{
    AdapterError, AdapterId, Capability, EntityType, NormalizedEntity, OperationMetadata,
};
use domain_registry::{AdapterHandle, RegistrySnapshot, ServiceRegistry};
use domain_resilience::BreakerError;

use crate::conflict::detect_conflicts;
use crate::error::SyncError;
use crate::history::SyncHistory;
use crate::report::{AdapterOutcome, AdapterResult, SkipReason, SyncOperation, SyncReport};
use crate::resolution::{resolve, Candidate, Resolution, ResolutionStrategy};

/// Deployment-wide sync behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CrmSettings {
    pub strategy: ResolutionStrategy,
    /// Adapter whose values win under `PrimaryWins`
    pub primary_adapter: Option<AdapterId>,
    /// Overrides every adapter's own timeout when set
    #[validate(range(min = 1, max = 600_000))]
    pub per_call_timeout_ms: Option<u64>,
    #[validate(range(min = 1, max = 3_600_000))]
    pub aggregate_deadline_ms: u64,
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::PrimaryWins,
            primary_adapter: None,
            per_call_timeout_ms: None,
            aggregate_deadline_ms: 15_000,
        }
    }
}

impl CrmSettings {
    pub fn per_call_timeout(&self) -> Option<Duration> {
        self.per_call_timeout_ms.map(Duration::from_millis)
    }

    pub fn aggregate_deadline(&self) -> Duration {
        Duration::from_millis(self.aggregate_deadline_ms)
    }
}

/// Inbound business event carrying already-normalized data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub entity_type: EntityType,
    pub payload: NormalizedEntity,
    /// Explicit adapters to write to; every capable adapter when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<AdapterId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
}

impl BusinessEvent {
    pub fn new(entity_type: EntityType, payload: NormalizedEntity) -> Self {
        Self {
            entity_type,
            payload,
            targets: None,
            correlation_id: None,
            initiated_by: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_targets(mut self, targets: Vec<AdapterId>) -> Self {
        self.targets = Some(targets);
        self
    }

    fn metadata(&self) -> OperationMetadata {
        OperationMetadata {
            correlation_id: self.correlation_id.clone(),
            initiated_by: self.initiated_by.clone(),
            ..Default::default()
        }
    }
}

// A target that will be called, or one that was rejected before any call
enum Target {
    Ready(Arc<AdapterHandle>),
    Rejected {
        adapter_id: AdapterId,
        error: AdapterError,
    },
}

impl Target {
    fn adapter_id(&self) -> &AdapterId {
        match self {
            Target::Ready(handle) => handle.id(),
            Target::Rejected { adapter_id, .. } => adapter_id,
        }
    }

    fn priority(&self) -> u32 {
        match self {
            Target::Ready(handle) => handle.priority(),
            Target::Rejected { .. } => u32::MAX,
        }
    }
}

pub struct CrmIntegrationManager {
    registry: Arc<ServiceRegistry>,
    history: Arc<dyn SyncHistory>,
    settings: CrmSettings,
}

impl CrmIntegrationManager {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        history: Arc<dyn SyncHistory>,
        settings: CrmSettings,
    ) -> Self {
        Self {
            registry,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &CrmSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<dyn SyncHistory> {
        &self.history
    }

    /// Writes `payload` to `targets`, or to every adapter serving the entity
    /// type's capability when `targets` is `None`
    ///
    /// # Errors
    ///
    /// * `NoTargetAdapters` if nothing serves the capability
    /// * `AggregateSyncFailure` if no adapter succeeded; the error carries the
    ///   full report
    pub async fn sync(
        &self,
        entity_type: EntityType,
        payload: NormalizedEntity,
        targets: Option<&[AdapterId]>,
    ) -> Result<SyncReport, SyncError> {
        self.sync_with_metadata(entity_type, payload, targets, OperationMetadata::default())
            .await
    }

    pub async fn sync_with_metadata(
        &self,
        entity_type: EntityType,
        payload: NormalizedEntity,
        targets: Option<&[AdapterId]>,
        metadata: OperationMetadata,
    ) -> Result<SyncReport, SyncError> {
        let mut operation = SyncOperation::new(entity_type, payload).with_metadata(metadata);
        if let Some(targets) = targets {
            operation = operation.with_targets(targets.to_vec());
        }
        self.execute(operation).await
    }

    /// Syncs the entity carried by an inbound business event
    pub async fn handle_event(&self, event: BusinessEvent) -> Result<SyncReport, SyncError> {
        let metadata = event.metadata();
        let mut operation =
            SyncOperation::new(event.entity_type, event.payload).with_metadata(metadata);
        if let Some(targets) = event.targets {
            operation = operation.with_targets(targets);
        }
        self.execute(operation).await
    }

    /// Runs a prepared sync operation
    #[instrument(
        skip(self, operation),
        fields(operation_id = %operation.operation_id, entity_type = %operation.entity_type)
    )]
    pub async fn execute(&self, operation: SyncOperation) -> Result<SyncReport, SyncError> {
        let capability = operation.entity_type.capability();
        let snapshot = self.registry.snapshot();
        let targets = select_targets(&snapshot, capability, operation.targets.as_deref());
        if targets.is_empty() {
            warn!(capability = %capability, "No adapter configured for sync");
            return Err(SyncError::NoTargetAdapters {
                entity_type: operation.entity_type,
                capability,
            });
        }

        let results = self.fan_out(&operation, &targets).await;
        let report = self.build_report(&operation, &targets, results);

        if let Err(err) = self.history.append(&report).await {
            error!(error = %err, "Failed to append sync report to history");
        }

        if report.is_success() {
            info!(
                succeeded = report.success_count(),
                failed = report.failure_count(),
                skipped = report.skipped_count(),
                conflicts = report.conflicts.len(),
                "Sync complete"
            );
            Ok(report)
        } else {
            warn!(
                failed = report.failure_count(),
                skipped = report.skipped_count(),
                "Sync failed on every adapter"
            );
            Err(SyncError::AggregateSyncFailure {
                report: Box::new(report),
            })
        }
    }

    // One result per target, in target order
    async fn fan_out(&self, operation: &SyncOperation, targets: &[Target]) -> Vec<AdapterResult> {
        let per_call_timeout = self.settings.per_call_timeout();
        let deadline = self.settings.aggregate_deadline();
        let mut slots: Vec<Option<AdapterResult>> = vec![None; targets.len()];

        let mut pending = FuturesUnordered::new();
        for (index, target) in targets.iter().enumerate() {
            match target {
                Target::Rejected { adapter_id, error } => {
                    slots[index] = Some(AdapterResult::failure(adapter_id.clone(), error, 0));
                }
                Target::Ready(handle) => pending.push(async move {
                    let started = Instant::now();
                    let outcome = handle
                        .invoke(
                            operation.entity_type,
                            &operation.payload,
                            &operation.metadata,
                            per_call_timeout,
                        )
                        .await;
                    (index, into_result(handle.id(), outcome, started.elapsed()))
                }),
            }
        }

        let collect = async {
            while let Some((index, result)) = pending.next().await {
                slots[index] = Some(result);
            }
        };
        let timed_out = tokio::time::timeout(deadline, collect).await.is_err();
        // Dropping the stragglers releases their breaker permits as failures
        drop(pending);

        if timed_out {
            warn!(deadline_ms = deadline.as_millis() as u64, "Aggregate deadline exceeded");
        }

        let elapsed_ms = deadline.as_millis() as u64;
        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    AdapterResult::failure(
                        target.adapter_id().clone(),
                        &AdapterError::transient("aggregate deadline exceeded"),
                        elapsed_ms,
                    )
                })
            })
            .collect()
    }

    fn build_report(
        &self,
        operation: &SyncOperation,
        targets: &[Target],
        results: Vec<AdapterResult>,
    ) -> SyncReport {
        let mut order: Vec<usize> = (0..results.len()).collect();
        order.sort_by(|&a, &b| {
            (targets[a].priority(), &results[a].adapter_id)
                .cmp(&(targets[b].priority(), &results[b].adapter_id))
        });

        let candidates: Vec<Candidate<'_>> = order
            .iter()
            .filter_map(|&i| {
                let result = &results[i];
                match (&result.outcome, &result.returned_entity) {
                    (AdapterOutcome::Success, Some(entity)) => Some(Candidate {
                        adapter_id: &result.adapter_id,
                        entity,
                    }),
                    _ => None,
                }
            })
            .collect();

        let conflicts = detect_conflicts(candidates.iter().map(|c| (c.adapter_id, c.entity)));
        let strategy = self.settings.strategy;
        let resolution = resolve(
            &candidates,
            &conflicts,
            strategy,
            self.settings.primary_adapter.as_ref(),
        );
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), strategy = %strategy, "Conflicting fields detected");
        }

        let (resolved_entity, primary_adapter, requires_manual_review) = match resolution {
            Some(Resolution {
                entity,
                primary_adapter,
                requires_manual_review,
            }) => (Some(entity), Some(primary_adapter), requires_manual_review),
            None => (None, None, false),
        };

        SyncReport {
            operation_id: operation.operation_id,
            entity_type: operation.entity_type,
            correlation_id: operation.metadata.correlation_id.clone(),
            resolved_entity,
            conflicts,
            resolution_strategy_used: strategy,
            primary_adapter,
            requires_manual_review,
            per_adapter_results: results,
            started_at: operation.started_at,
            completed_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Debug for CrmIntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmIntegrationManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// Explicit targets are kept even when they cannot be called, so every
// requested adapter shows up in the report
fn select_targets(
    snapshot: &RegistrySnapshot,
    capability: Capability,
    explicit: Option<&[AdapterId]>,
) -> Vec<Target> {
    let Some(ids) = explicit else {
        return snapshot
            .resolve(capability)
            .into_iter()
            .map(Target::Ready)
            .collect();
    };

    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(*id))
        .map(|id| {
            let rejected = |message: String| Target::Rejected {
                adapter_id: id.clone(),
                error: AdapterError::permanent(message),
            };
            match snapshot.get(id) {
                None => rejected(format!("adapter '{}' is not registered", id)),
                Some(_) if snapshot.is_retired(id) => {
                    rejected(format!("adapter '{}' is retired", id))
                }
                Some(handle) if !handle.descriptor().supports(capability) => {
                    rejected(format!("adapter '{}' does not serve {}", id, capability))
                }
                Some(handle) => Target::Ready(handle.clone()),
            }
        })
        .collect()
}

fn into_result(
    adapter_id: &AdapterId,
    outcome: Result<NormalizedEntity, BreakerError>,
    elapsed: Duration,
) -> AdapterResult {
    let latency_ms = elapsed.as_millis() as u64;
    match outcome {
        Ok(entity) => AdapterResult::success(adapter_id.clone(), entity, latency_ms),
        Err(BreakerError::CircuitOpen(open)) => {
            debug!(adapter_id = %adapter_id, "Circuit open, adapter skipped");
            AdapterResult::skipped(
                adapter_id.clone(),
                SkipReason::CircuitOpen,
                open.retry_in.as_millis() as u64,
            )
        }
        Err(BreakerError::Adapter(err)) => {
            debug!(adapter_id = %adapter_id, error = %err, "Adapter call failed");
            AdapterResult::failure(adapter_id.clone(), &err, latency_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_defaults() {
        let settings = CrmSettings::default();
        assert_eq!(settings.strategy, ResolutionStrategy::PrimaryWins);
        assert_eq!(settings.aggregate_deadline(), Duration::from_secs(15));
        assert!(settings.per_call_timeout().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: CrmSettings = serde_json::from_value(json!({
            "strategy": "newest_wins",
            "primary_adapter": "hubspot",
            "per_call_timeout_ms": 250
        }))
        .unwrap();

        assert_eq!(settings.strategy, ResolutionStrategy::NewestWins);
        assert_eq!(settings.primary_adapter, Some(AdapterId::from("hubspot")));
        assert_eq!(settings.per_call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(settings.aggregate_deadline_ms, 15_000);
    }

    #[test]
    fn test_settings_validation() {
        let settings = CrmSettings {
            aggregate_deadline_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = CrmSettings {
            per_call_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_business_event_deserialize() {
        let event: BusinessEvent = serde_json::from_value(json!({
            "entity_type": "contact",
            "payload": { "fields": { "email": "x@y.com" } },
            "correlation_id": "booking-42"
        }))
        .unwrap();

        assert_eq!(event.entity_type, EntityType::Contact);
        assert_eq!(event.payload.str_field("email"), Some("x@y.com"));
        assert!(event.targets.is_none());

        let metadata = event.metadata();
        assert_eq!(metadata.correlation_id.as_deref(), Some("booking-42"));
    }

    #[test]
    fn test_explicit_targets_unknown_are_rejected_permanently() {
        let snapshot = RegistrySnapshot::default();
        let ids = [AdapterId::from("ghost"), AdapterId::from("ghost")];

        let targets = select_targets(&snapshot, Capability::ContactSync, Some(&ids));

        assert_eq!(targets.len(), 1);
        match &targets[0] {
            Target::Rejected { adapter_id, error } => {
                assert_eq!(adapter_id.as_str(), "ghost");
                assert!(matches!(error, AdapterError::Permanent { .. }));
            }
            Target::Ready(_) => panic!("unknown adapter must not be callable"),
        }
    }

    #[test]
    fn test_no_explicit_targets_on_empty_registry() {
        let snapshot = RegistrySnapshot::default();
        assert!(select_targets(&snapshot, Capability::ContactSync, None).is_empty());
    }
}
