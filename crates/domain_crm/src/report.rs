//! Sync operations and the reports they produce

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_kernel::{
    AdapterError, AdapterErrorKind, AdapterId, EntityType, NormalizedEntity, OperationId,
    OperationMetadata,
};

use crate::resolution::ResolutionStrategy;

/// One logical write fanned out to several adapters
#[derive(Debug, Clone)]
pub struct SyncOperation {
    pub operation_id: OperationId,
    pub entity_type: EntityType,
    pub payload: NormalizedEntity,
    /// Explicit targets; `None` means every adapter serving the capability
    pub targets: Option<Vec<AdapterId>>,
    pub metadata: OperationMetadata,
    pub started_at: DateTime<Utc>,
}

impl SyncOperation {
    pub fn new(entity_type: EntityType, payload: NormalizedEntity) -> Self {
        Self {
            operation_id: OperationId::new_v7(),
            entity_type,
            payload,
            targets: None,
            metadata: OperationMetadata::default(),
            started_at: Utc::now(),
        }
    }

    pub fn with_targets(mut self, targets: Vec<AdapterId>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_metadata(mut self, metadata: OperationMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Why an adapter was not called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CircuitOpen,
}

/// How one adapter fared in a sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdapterOutcome {
    Success,
    Failure {
        kind: AdapterErrorKind,
        message: String,
    },
    Skipped {
        reason: SkipReason,
        retry_in_ms: u64,
    },
}

impl AdapterOutcome {
    pub fn from_error(error: &AdapterError) -> Self {
        AdapterOutcome::Failure {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub adapter_id: AdapterId,
    #[serde(flatten)]
    pub outcome: AdapterOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_entity: Option<NormalizedEntity>,
    pub latency_ms: u64,
}

impl AdapterResult {
    pub fn success(adapter_id: AdapterId, entity: NormalizedEntity, latency_ms: u64) -> Self {
        Self {
            adapter_id,
            outcome: AdapterOutcome::Success,
            returned_entity: Some(entity),
            latency_ms,
        }
    }

    pub fn failure(adapter_id: AdapterId, error: &AdapterError, latency_ms: u64) -> Self {
        Self {
            adapter_id,
            outcome: AdapterOutcome::from_error(error),
            returned_entity: None,
            latency_ms,
        }
    }

    pub fn skipped(adapter_id: AdapterId, reason: SkipReason, retry_in_ms: u64) -> Self {
        Self {
            adapter_id,
            outcome: AdapterOutcome::Skipped {
                reason,
                retry_in_ms,
            },
            returned_entity: None,
            latency_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AdapterOutcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, AdapterOutcome::Skipped { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AdapterOutcome::Failure { .. })
    }
}

/// Successful adapters disagreeing on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub field: String,
    /// Every successful adapter that returned the field, with its value
    pub values_by_adapter: BTreeMap<AdapterId, Value>,
}

/// Outcome of a sync operation, appended to the sync history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub operation_id: OperationId,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// `None` only when no adapter succeeded
    pub resolved_entity: Option<NormalizedEntity>,
    pub conflicts: Vec<Conflict>,
    pub resolution_strategy_used: ResolutionStrategy,
    /// Adapter whose values back the resolved entity where fields conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_adapter: Option<AdapterId>,
    pub requires_manual_review: bool,
    pub per_adapter_results: Vec<AdapterResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn result_for(&self, adapter_id: &AdapterId) -> Option<&AdapterResult> {
        self.per_adapter_results
            .iter()
            .find(|r| &r.adapter_id == adapter_id)
    }

    pub fn success_count(&self) -> usize {
        self.per_adapter_results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.per_adapter_results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.per_adapter_results.iter().filter(|r| r.is_skipped()).count()
    }

    /// Returns true if at least one adapter succeeded
    pub fn is_success(&self) -> bool {
        self.success_count() > 0
    }

    /// Returns true if some, but not all, adapters succeeded
    pub fn is_partial(&self) -> bool {
        let successes = self.success_count();
        successes > 0 && successes < self.per_adapter_results.len()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let result = AdapterResult::failure(
            AdapterId::from("crm-b"),
            &AdapterError::rate_limited(Duration::from_secs(1)),
            12,
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["adapter_id"], "crm-b");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "rate_limited");
        assert!(json.get("returned_entity").is_none());

        let back: AdapterResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_skipped_result() {
        let result = AdapterResult::skipped(AdapterId::from("crm-c"), SkipReason::CircuitOpen, 900);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "circuit_open");
        assert!(result.is_skipped());
        assert!(!result.is_success());
    }
}
