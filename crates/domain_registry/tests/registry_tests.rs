//! Registry integration tests: registration rules, lifecycle ordering,
//! hot reload and health monitoring over live handles

use std::sync::Arc;

use core_kernel::{AdapterError, AdapterId, Capability, ConfigError};
use domain_registry::{AdapterStatus, RegistryConfig, ServiceRegistry};
use domain_resilience::{CircuitState, HealthMonitor, ProbeTarget, ProbeTargetSource};
use proptest::prelude::*;
use test_utils::{
    assert_circuit_state, RecordingAlertSink, ResilienceFixtures, ScriptedAdapter, ScriptedFleet,
    TestDescriptorBuilder,
};

fn id(value: &str) -> AdapterId {
    AdapterId::from(value)
}

fn resolved_ids(registry: &ServiceRegistry, capability: Capability) -> Vec<String> {
    registry
        .resolve(capability)
        .iter()
        .map(|h| h.id().to_string())
        .collect()
}

/// Fleet of scripted adapters named `ids`, registered in order
async fn registered(ids: &[&str]) -> (ScriptedFleet, Arc<ServiceRegistry>) {
    let fleet = ScriptedFleet::new();
    let registry = fleet.registry();
    for id in ids {
        fleet.add(ScriptedAdapter::new(*id));
        registry
            .register(TestDescriptorBuilder::new(*id).build())
            .await
            .unwrap();
    }
    (fleet, registry)
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_resolve_orders_by_priority_then_id() {
    let fleet = ScriptedFleet::new();
    let registry = fleet.registry();
    for (name, priority) in [("crm-c", 5), ("crm-b", 1), ("crm-a", 5)] {
        fleet.add(ScriptedAdapter::new(name));
        registry
            .register(TestDescriptorBuilder::new(name).with_priority(priority).build())
            .await
            .unwrap();
    }

    assert_eq!(
        resolved_ids(&registry, Capability::ContactSync),
        vec!["crm-b", "crm-a", "crm-c"]
    );
    assert!(registry.resolve(Capability::PaymentCharge).is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let (_fleet, registry) = registered(&["crm-a"]).await;
    let before = registry.snapshot();

    let error = registry
        .register(TestDescriptorBuilder::new("crm-a").with_priority(7).build())
        .await
        .unwrap_err();

    assert_eq!(error, ConfigError::DuplicateAdapter(id("crm-a")));
    assert!(Arc::ptr_eq(&before, &registry.snapshot()));
}

#[tokio::test]
async fn test_unknown_dependency_rejected() {
    let fleet = ScriptedFleet::new();
    fleet.add(ScriptedAdapter::new("crm-a"));
    let registry = fleet.registry();

    let error = registry
        .register(TestDescriptorBuilder::new("crm-a").depends_on("vault").build())
        .await
        .unwrap_err();

    assert!(matches!(error, ConfigError::UnknownDependency { .. }));
    assert!(registry.snapshot().is_empty());
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let fleet = ScriptedFleet::new();
    fleet.add(ScriptedAdapter::new("crm-a"));
    let registry = fleet.registry();

    let error = registry
        .register(TestDescriptorBuilder::new("crm-a").depends_on("crm-a").build())
        .await
        .unwrap_err();

    assert_eq!(error, ConfigError::CyclicDependency { adapters: vec![id("crm-a")] });
}

#[tokio::test]
async fn test_missing_capability_rejected() {
    let fleet = ScriptedFleet::new();
    fleet.add(ScriptedAdapter::new("crm-a").with_capabilities([Capability::ContactSync]));
    let registry = fleet.registry();

    let error = registry
        .register(
            TestDescriptorBuilder::new("crm-a")
                .with_capabilities([Capability::ContactSync, Capability::PaymentCharge])
                .build(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        ConfigError::MissingCapability { capability: Capability::PaymentCharge, .. }
    ));
}

#[tokio::test]
async fn test_retired_adapter_leaves_rotation_but_stays_registered() {
    let (_fleet, registry) = registered(&["crm-a", "crm-b"]).await;

    registry.retire(&id("crm-a")).await.unwrap();

    assert_eq!(resolved_ids(&registry, Capability::ContactSync), vec!["crm-b"]);
    assert!(registry.get(&id("crm-a")).is_some());
    assert!(registry.is_retired(&id("crm-a")));
    let targets: Vec<String> = registry
        .probe_targets()
        .iter()
        .map(|t| t.adapter_id().to_string())
        .collect();
    assert_eq!(targets, vec!["crm-b"]);

    let error = registry.retire(&id("ghost")).await.unwrap_err();
    assert_eq!(error, ConfigError::UnknownAdapter(id("ghost")));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_follows_dependency_order_and_stop_reverses_it() {
    let fleet = ScriptedFleet::new();
    let registry = fleet.registry();
    for name in ["vault", "crm", "billing"] {
        fleet.add(ScriptedAdapter::new(name));
    }
    registry.register(TestDescriptorBuilder::new("vault").build()).await.unwrap();
    registry
        .register(TestDescriptorBuilder::new("crm").depends_on("vault").build())
        .await
        .unwrap();
    registry
        .register(TestDescriptorBuilder::new("billing").depends_on("crm").build())
        .await
        .unwrap();

    let started = registry.start().await;
    assert!(started.is_complete());
    assert_eq!(started.succeeded.len(), 3);

    let log = fleet.log();
    assert!(log.position("start:vault") < log.position("start:crm"));
    assert!(log.position("start:crm") < log.position("start:billing"));

    let stopped = registry.stop().await;
    assert_eq!(stopped.succeeded.len(), 3);
    assert!(log.position("stop:billing") < log.position("stop:crm"));
    assert!(log.position("stop:crm") < log.position("stop:vault"));
}

#[tokio::test]
async fn test_failed_start_blocks_dependents_only() {
    let fleet = ScriptedFleet::new();
    let registry = fleet.registry();
    fleet.add(ScriptedAdapter::new("vault").failing_start(AdapterError::auth("sealed")));
    let crm = fleet.add(ScriptedAdapter::new("crm"));
    let standalone = fleet.add(ScriptedAdapter::new("mailer"));
    registry.register(TestDescriptorBuilder::new("vault").build()).await.unwrap();
    registry
        .register(TestDescriptorBuilder::new("crm").depends_on("vault").build())
        .await
        .unwrap();
    registry.register(TestDescriptorBuilder::new("mailer").build()).await.unwrap();

    let report = registry.start().await;

    assert!(!report.is_complete());
    assert_eq!(report.succeeded, vec![id("mailer")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].adapter_id, id("vault"));
    assert_eq!(report.blocked, vec![id("crm")]);
    assert_eq!(crm.start_count(), 0);
    assert_eq!(standalone.start_count(), 1);
    assert_eq!(registry.get(&id("crm")).unwrap().status(), AdapterStatus::Blocked);
    assert_eq!(registry.get(&id("vault")).unwrap().status(), AdapterStatus::Failed);
}

#[tokio::test]
async fn test_start_is_idempotent_for_running_adapters() {
    let (fleet, registry) = registered(&["crm-a"]).await;

    registry.start().await;
    let second = registry.start().await;

    assert!(second.succeeded.is_empty());
    assert_eq!(fleet.get("crm-a").unwrap().start_count(), 1);
}

// ============================================================================
// Hot reload
// ============================================================================

#[tokio::test]
async fn test_reload_keeps_unchanged_handles_and_their_breakers() {
    let (fleet, registry) = registered(&["crm-a", "crm-b"]).await;
    fleet.add(ScriptedAdapter::new("crm-c"));
    let kept = registry.get(&id("crm-a")).unwrap();
    kept.breaker().force_open();

    let summary = registry
        .hot_reload_config(RegistryConfig::new(vec![
            TestDescriptorBuilder::new("crm-a").build(),
            TestDescriptorBuilder::new("crm-b").with_priority(1).build(),
            TestDescriptorBuilder::new("crm-c").build(),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.unchanged, vec![id("crm-a")]);
    assert_eq!(summary.replaced, vec![id("crm-b")]);
    assert_eq!(summary.added, vec![id("crm-c")]);
    assert!(summary.removed.is_empty());
    assert!(summary.started.is_none());

    let after = registry.get(&id("crm-a")).unwrap();
    assert!(Arc::ptr_eq(&kept, &after));
    assert_circuit_state(after.breaker(), CircuitState::Open);
    assert_eq!(
        resolved_ids(&registry, Capability::ContactSync),
        vec!["crm-b", "crm-a", "crm-c"]
    );
}

#[tokio::test]
async fn test_invalid_reload_leaves_configuration_untouched() {
    let (fleet, registry) = registered(&["crm-a"]).await;
    fleet.add(ScriptedAdapter::new("crm-b"));
    let before = registry.snapshot();

    let error = registry
        .hot_reload_config(RegistryConfig::new(vec![
            TestDescriptorBuilder::new("crm-a").depends_on("crm-b").build(),
            TestDescriptorBuilder::new("crm-b").depends_on("crm-a").build(),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(error, ConfigError::CyclicDependency { .. }));
    assert!(Arc::ptr_eq(&before, &registry.snapshot()));
    assert_eq!(resolved_ids(&registry, Capability::ContactSync), vec!["crm-a"]);
}

#[tokio::test]
async fn test_reload_with_unknown_provider_is_rejected_whole() {
    let (_fleet, registry) = registered(&["crm-a"]).await;
    let before = registry.snapshot();

    let error = registry
        .hot_reload_config(RegistryConfig::new(vec![
            TestDescriptorBuilder::new("crm-a").build(),
            TestDescriptorBuilder::new("crm-x").with_provider_type("carrier-pigeon").build(),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(error, ConfigError::UnknownProviderType { .. }));
    assert!(Arc::ptr_eq(&before, &registry.snapshot()));
}

#[tokio::test]
async fn test_reload_while_running_starts_new_and_stops_removed() {
    let (fleet, registry) = registered(&["crm-a", "crm-b"]).await;
    let c = fleet.add(ScriptedAdapter::new("crm-c"));
    registry.start().await;

    let summary = registry
        .hot_reload_config(RegistryConfig::new(vec![
            TestDescriptorBuilder::new("crm-a").build(),
            TestDescriptorBuilder::new("crm-c").build(),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.removed, vec![id("crm-b")]);
    let started = summary.started.expect("registry was running");
    assert_eq!(started.succeeded, vec![id("crm-c")]);
    assert_eq!(c.start_count(), 1);
    assert_eq!(fleet.get("crm-b").unwrap().stop_count(), 1);
    assert_eq!(fleet.get("crm-a").unwrap().start_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_a_partial_reload() {
    let fleet = ScriptedFleet::new();
    let registry = fleet.registry();
    let old: Vec<String> = (0..4).map(|i| format!("old-{i}")).collect();
    let new: Vec<String> = (0..4).map(|i| format!("new-{i}")).collect();
    for name in old.iter().chain(new.iter()) {
        fleet.add(ScriptedAdapter::new(name.as_str()));
    }
    for name in &old {
        registry
            .register(TestDescriptorBuilder::new(name.as_str()).build())
            .await
            .unwrap();
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut observed = Vec::new();
                for _ in 0..200 {
                    observed.push(resolved_ids(&registry, Capability::ContactSync));
                    tokio::task::yield_now().await;
                }
                observed
            })
        })
        .collect();

    let config = RegistryConfig::new(
        new.iter()
            .map(|name| TestDescriptorBuilder::new(name.as_str()).build())
            .collect(),
    );
    registry.hot_reload_config(config).await.unwrap();

    for reader in readers {
        for ids in reader.await.unwrap() {
            assert!(ids == old || ids == new, "mixed snapshot observed: {ids:?}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn rejected_registration_changes_nothing(
        existing in 1usize..5,
        dependency in "[a-z]{3,8}",
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let names: Vec<String> = (0..existing).map(|i| format!("crm-{i}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let (fleet, registry) = registered(&refs).await;
            fleet.add(ScriptedAdapter::new("late"));
            let before = registry.snapshot();

            let descriptor = TestDescriptorBuilder::new("late")
                .depends_on(format!("missing-{dependency}"))
                .build();
            let first = registry.register(descriptor.clone()).await.unwrap_err();
            let second = registry.register(descriptor).await.unwrap_err();

            assert_eq!(first, second);
            assert!(Arc::ptr_eq(&before, &registry.snapshot()));
            assert_eq!(registry.handles().len(), existing);
        });
    }
}

// ============================================================================
// Health monitoring over registry handles
// ============================================================================

#[tokio::test]
async fn test_monitor_alerts_once_threshold_is_exceeded() {
    let (fleet, registry) = registered(&["crm-a", "crm-b"]).await;
    fleet
        .get("crm-a")
        .unwrap()
        .set_probe_failure(Some(AdapterError::transient("503 from /health")));
    let sink = Arc::new(RecordingAlertSink::new());
    let monitor = HealthMonitor::new(ResilienceFixtures::monitor(), registry.clone(), sink.clone());

    for _ in 0..3 {
        monitor.probe_all().await;
    }
    assert!(sink.is_empty());

    monitor.probe_all().await;
    let alerts = sink.alerts_for("crm-a");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].consecutive_failures, 4);
    assert!(sink.alerts_for("crm-b").is_empty());

    let history = monitor.history(&id("crm-a")).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|r| !r.success));
    assert_eq!(fleet.get("crm-b").unwrap().probe_count(), 4);
}

#[tokio::test]
async fn test_monitor_skips_retired_adapters() {
    let (fleet, registry) = registered(&["crm-a", "crm-b"]).await;
    registry.retire(&id("crm-b")).await.unwrap();
    let monitor = HealthMonitor::new(
        ResilienceFixtures::monitor(),
        registry.clone(),
        Arc::new(RecordingAlertSink::new()),
    );

    let records = monitor.probe_all().await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].adapter_id, id("crm-a"));
    assert_eq!(fleet.get("crm-b").unwrap().probe_count(), 0);
    assert!(monitor.history(&id("crm-b")).await.is_err());
}
