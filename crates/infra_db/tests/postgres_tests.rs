//! PostgreSQL round-trip tests
//!
//! Each test starts its own container and runs the embedded migrations.
//! Without a reachable container runtime the tests return early.

use chrono::Duration;

use core_kernel::{Capability, OperationId};
use domain_crm::{HistoryError, SyncHistory};
use domain_registry::RegistryConfig;
use infra_db::{run_migrations, AdapterDescriptorRepository, PostgresSyncHistory};
use test_utils::{test_database_or_skip, ReportFixtures, TestDatabase, TestDescriptorBuilder, TimeFixtures};

async fn migrated() -> Option<TestDatabase> {
    let db = test_database_or_skip().await?;
    run_migrations(db.pool()).await.expect("migrations should apply");
    Some(db)
}

#[tokio::test]
async fn test_replace_then_load_preserves_order() {
    let Some(db) = migrated().await else { return };
    let repository = AdapterDescriptorRepository::new(db.pool().clone());

    assert!(repository.load_config().await.unwrap().adapters.is_empty());

    let config = RegistryConfig::new(vec![
        TestDescriptorBuilder::new("crm-b").with_priority(20).build(),
        TestDescriptorBuilder::new("crm-a")
            .with_capabilities([Capability::ContactSync, Capability::DealSync])
            .depends_on("crm-b")
            .build(),
    ]);
    repository.replace_config(&config).await.unwrap();

    let loaded = repository.load_config().await.unwrap();
    assert_eq!(loaded, config);
    assert_eq!(repository.get("crm-a").await.unwrap(), config.adapters[1]);
}

#[tokio::test]
async fn test_replace_drops_adapters_missing_from_new_config() {
    let Some(db) = migrated().await else { return };
    let repository = AdapterDescriptorRepository::new(db.pool().clone());

    repository
        .replace_config(&RegistryConfig::new(vec![
            TestDescriptorBuilder::new("crm-a").build(),
            TestDescriptorBuilder::new("crm-b").build(),
        ]))
        .await
        .unwrap();
    repository
        .replace_config(&RegistryConfig::new(vec![TestDescriptorBuilder::new("crm-b").build()]))
        .await
        .unwrap();

    let loaded = repository.load_config().await.unwrap();
    assert_eq!(loaded.adapters.len(), 1);
    assert_eq!(loaded.adapters[0].id.as_str(), "crm-b");
    assert!(repository.get("crm-a").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_failed_replace_keeps_previous_config() {
    let Some(db) = migrated().await else { return };
    let repository = AdapterDescriptorRepository::new(db.pool().clone());

    let original = RegistryConfig::new(vec![TestDescriptorBuilder::new("crm-a").build()]);
    repository.replace_config(&original).await.unwrap();

    // Two rows with one primary key abort the transaction half way
    let duplicated = RegistryConfig::new(vec![
        TestDescriptorBuilder::new("crm-x").build(),
        TestDescriptorBuilder::new("crm-x").build(),
    ]);
    let error = repository.replace_config(&duplicated).await.unwrap_err();

    assert!(error.is_duplicate());
    assert_eq!(repository.load_config().await.unwrap(), original);
}

#[tokio::test]
async fn test_append_and_get_round_trip() {
    let Some(db) = migrated().await else { return };
    let history = PostgresSyncHistory::new(db.pool().clone());
    let report = ReportFixtures::completed_at(TimeFixtures::earlier());

    history.append(&report).await.unwrap();

    assert_eq!(history.get(report.operation_id).await.unwrap(), Some(report));
    assert_eq!(history.get(OperationId::new_v7()).await.unwrap(), None);
}

#[tokio::test]
async fn test_duplicate_append_rejected() {
    let Some(db) = migrated().await else { return };
    let history = PostgresSyncHistory::new(db.pool().clone());
    let report = ReportFixtures::completed_at(TimeFixtures::earlier());

    history.append(&report).await.unwrap();
    let result = history.append(&report).await;

    assert!(matches!(result, Err(HistoryError::Duplicate(id)) if id == report.operation_id));
}

#[tokio::test]
async fn test_range_is_half_open_and_ordered() {
    let Some(db) = migrated().await else { return };
    let history = PostgresSyncHistory::new(db.pool().clone());
    let from = TimeFixtures::earlier();
    let to = from + Duration::hours(1);

    let at_start = ReportFixtures::completed_at(from);
    let inside = ReportFixtures::completed_at(from + Duration::minutes(30));
    let at_end = ReportFixtures::completed_at(to);
    let before = ReportFixtures::completed_at(from - Duration::seconds(1));

    // Appended out of order on purpose
    for report in [&inside, &at_end, &before, &at_start] {
        history.append(report).await.unwrap();
    }

    let found = history.range(from, to).await.unwrap();
    let ids: Vec<OperationId> = found.iter().map(|r| r.operation_id).collect();
    assert_eq!(ids, vec![at_start.operation_id, inside.operation_id]);
}

#[tokio::test]
async fn test_lookup_by_correlation_id() {
    let Some(db) = migrated().await else { return };
    let history = PostgresSyncHistory::new(db.pool().clone());
    let first = ReportFixtures::correlated(TimeFixtures::earlier(), "booking-7");
    let second = ReportFixtures::correlated(TimeFixtures::later(), "booking-7");
    let other = ReportFixtures::correlated(TimeFixtures::later(), "booking-8");

    for report in [&second, &other, &first] {
        history.append(report).await.unwrap();
    }

    let found = history.by_correlation_id("booking-7").await.unwrap();
    assert_eq!(found, vec![first, second]);
    assert!(history.by_correlation_id("missing").await.unwrap().is_empty());
}
