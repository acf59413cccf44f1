//! Custom Test Assertions
//!
//! Provides assertion helpers for sync reports and circuit breakers that
//! give more meaningful failure messages than plain `assert!`.

use std::collections::BTreeSet;

use core_kernel::{AdapterErrorKind, AdapterId};
use domain_crm::{AdapterOutcome, AdapterResult, SkipReason, SyncReport};
use domain_resilience::{CircuitBreaker, CircuitState};

fn result_for<'a>(report: &'a SyncReport, adapter_id: &str) -> &'a AdapterResult {
    report
        .result_for(&AdapterId::from(adapter_id))
        .unwrap_or_else(|| {
            panic!(
                "No result for adapter '{}' in report {}; results: {:?}",
                adapter_id,
                report.operation_id,
                report
                    .per_adapter_results
                    .iter()
                    .map(|r| r.adapter_id.as_str())
                    .collect::<Vec<_>>()
            )
        })
}

/// Asserts the report carries exactly one result for each expected adapter
pub fn assert_results_for(report: &SyncReport, expected: &[&str]) {
    let actual: Vec<&str> = report
        .per_adapter_results
        .iter()
        .map(|r| r.adapter_id.as_str())
        .collect();
    let unique: BTreeSet<&str> = actual.iter().copied().collect();
    let wanted: BTreeSet<&str> = expected.iter().copied().collect();

    assert_eq!(
        actual.len(),
        unique.len(),
        "Duplicate adapter results in report: {:?}",
        actual
    );
    assert_eq!(
        unique, wanted,
        "Report results do not match targets: actual={:?}, expected={:?}",
        actual, expected
    );
}

/// Asserts an adapter succeeded
pub fn assert_adapter_succeeded(report: &SyncReport, adapter_id: &str) {
    let result = result_for(report, adapter_id);
    assert!(
        result.is_success() && result.returned_entity.is_some(),
        "Expected '{}' to succeed, got {:?}",
        adapter_id,
        result.outcome
    );
}

/// Asserts an adapter failed with the given kind
pub fn assert_adapter_failed(report: &SyncReport, adapter_id: &str, kind: AdapterErrorKind) {
    let result = result_for(report, adapter_id);
    match &result.outcome {
        AdapterOutcome::Failure { kind: actual, .. } => assert_eq!(
            *actual, kind,
            "Adapter '{}' failed with {:?}, expected {:?}",
            adapter_id, actual, kind
        ),
        other => panic!("Expected '{}' to fail with {:?}, got {:?}", adapter_id, kind, other),
    }
}

/// Asserts an adapter was skipped because its circuit was open
pub fn assert_adapter_skipped(report: &SyncReport, adapter_id: &str) {
    let result = result_for(report, adapter_id);
    assert!(
        matches!(
            result.outcome,
            AdapterOutcome::Skipped {
                reason: SkipReason::CircuitOpen,
                ..
            }
        ),
        "Expected '{}' to be skipped, got {:?}",
        adapter_id,
        result.outcome
    );
}

/// Asserts the report has exactly these conflicting fields
pub fn assert_conflicts_on(report: &SyncReport, fields: &[&str]) {
    let actual: Vec<&str> = report.conflicts.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(
        actual, fields,
        "Conflicting fields differ: actual={:?}, expected={:?}",
        actual, fields
    );
}

/// Asserts a string field of the resolved entity
pub fn assert_resolved_field(report: &SyncReport, field: &str, expected: &str) {
    let entity = report
        .resolved_entity
        .as_ref()
        .unwrap_or_else(|| panic!("Report {} has no resolved entity", report.operation_id));
    assert_eq!(
        entity.str_field(field),
        Some(expected),
        "Resolved '{}' mismatch; resolved entity: {:?}",
        field,
        entity
    );
}

/// Asserts a breaker's state
pub fn assert_circuit_state(breaker: &CircuitBreaker, expected: CircuitState) {
    let actual = breaker.state();
    assert_eq!(
        actual,
        expected,
        "Circuit for '{}' is {}, expected {}",
        breaker.adapter_id(),
        actual,
        expected
    );
}
