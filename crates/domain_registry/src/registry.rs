//! Service Registry
//!
//! Central lookup for provider adapters. Callers ask for a capability and get
//! back every adapter serving it, in priority order; they never name a
//! concrete provider.
//!
//! # Architecture
//!
//! The registry state is an immutable [`RegistrySnapshot`] behind an
//! `ArcSwap`. Readers (`resolve`, `get`, the health monitor) load the current
//! snapshot without locking. Writers (`register`, `retire`,
//! `hot_reload_config`) are serialized by an async mutex, build a complete
//! replacement snapshot off to the side, and publish it with one atomic
//! store. A rejected write leaves the published snapshot untouched.
//!
//! ```text
//!   resolve() ──► load() ──► Arc<RegistrySnapshot v1>
//!                                      ▲
//!   hot_reload_config(new) ── validate ── instantiate ── store(v2)
//!                      (error here: v1 stays published)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use core_kernel::{AdapterError, AdapterId, Capability, ConfigError};
use domain_resilience::{BreakerEvents, ProbeTarget, ProbeTargetSource};

use crate::descriptor::{AdapterDescriptor, RegistryConfig};
use crate::factory::ServiceFactory;
use crate::graph::DependencyGraph;
use crate::handle::{AdapterHandle, AdapterStatus};

/// One published registry state
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    handles: BTreeMap<AdapterId, Arc<AdapterHandle>>,
    retired: BTreeSet<AdapterId>,
    levels: Vec<Vec<AdapterId>>,
}

impl RegistrySnapshot {
    fn build(
        handles: BTreeMap<AdapterId, Arc<AdapterHandle>>,
        retired: BTreeSet<AdapterId>,
    ) -> Result<Self, ConfigError> {
        let levels = DependencyGraph::build(handles.values().map(|h| h.descriptor()))?.levels()?;
        Ok(Self {
            handles,
            retired,
            levels,
        })
    }

    pub fn get(&self, id: &AdapterId) -> Option<&Arc<AdapterHandle>> {
        self.handles.get(id)
    }

    pub fn contains(&self, id: &AdapterId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn is_retired(&self, id: &AdapterId) -> bool {
        self.retired.contains(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handles ordered by id
    pub fn handles(&self) -> impl Iterator<Item = &Arc<AdapterHandle>> {
        self.handles.values()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &AdapterDescriptor> {
        self.handles.values().map(|h| h.descriptor())
    }

    /// Active adapters serving `capability`, lowest priority value first
    pub fn resolve(&self, capability: Capability) -> Vec<Arc<AdapterHandle>> {
        let mut matches: Vec<Arc<AdapterHandle>> = self
            .handles
            .values()
            .filter(|h| !self.retired.contains(h.id()) && h.descriptor().supports(capability))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (a.priority(), a.id()).cmp(&(b.priority(), b.id())));
        matches
    }

    /// Dependency levels, dependencies first
    pub fn levels(&self) -> &[Vec<AdapterId>] {
        &self.levels
    }
}

/// Failure of one adapter during start or stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleFailure {
    pub adapter_id: AdapterId,
    pub error: String,
}

/// Outcome of a lifecycle pass over the registry
///
/// Partial success is normal: adapters that could start are running even if
/// others failed or were blocked.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleReport {
    pub succeeded: Vec<AdapterId>,
    pub failed: Vec<LifecycleFailure>,
    /// Not attempted because a dependency is not running
    pub blocked: Vec<AdapterId>,
}

impl LifecycleReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }
}

/// What a successful hot reload changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<AdapterId>,
    pub removed: Vec<AdapterId>,
    /// Same id, different descriptor: a new handle replaced the old one
    pub replaced: Vec<AdapterId>,
    /// Kept their existing handle and breaker state
    pub unchanged: Vec<AdapterId>,
    /// Start results for new handles, when the registry is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<LifecycleReport>,
}

/// Registry of provider adapters
pub struct ServiceRegistry {
    factory: Arc<ServiceFactory>,
    events: BreakerEvents,
    snapshot: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
    running: AtomicBool,
}

impl ServiceRegistry {
    /// Creates an empty registry with a private breaker event channel
    ///
    /// # Arguments
    ///
    /// * `factory` - Instantiates adapters from descriptors
    pub fn new(factory: Arc<ServiceFactory>) -> Self {
        Self::with_events(factory, BreakerEvents::default())
    }

    /// Creates a registry whose breakers publish on `events`
    pub fn with_events(factory: Arc<ServiceFactory>, events: BreakerEvents) -> Self {
        Self {
            factory,
            events,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// Transition events of every breaker in this registry
    pub fn events(&self) -> &BreakerEvents {
        &self.events
    }

    pub fn factory(&self) -> &Arc<ServiceFactory> {
        &self.factory
    }

    /// Returns the currently published snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Registers one adapter
    ///
    /// Duplicate ids, unknown dependencies and cycles are rejected before the
    /// factory is called. Nothing is published unless instantiation succeeds.
    /// The new adapter is not started.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Configuration of the adapter to add
    ///
    /// # Returns
    ///
    /// The handle now visible to `resolve` and `get`.
    ///
    /// # Errors
    ///
    /// * `ConfigError::DuplicateAdapter` - The id is already registered
    /// * `ConfigError::UnknownDependency` - A dependency is not registered
    /// * `ConfigError::CyclicDependency` - The dependency would close a cycle
    /// * Any validation or instantiation error of the factory
    pub async fn register(
        &self,
        descriptor: AdapterDescriptor,
    ) -> Result<Arc<AdapterHandle>, ConfigError> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot.load_full();

        self.factory.validate(&descriptor)?;
        if current.contains(&descriptor.id) {
            return Err(ConfigError::DuplicateAdapter(descriptor.id.clone()));
        }
        if let Some(dependency) = descriptor.depends_on.iter().find(|dep| !current.contains(dep)) {
            return Err(ConfigError::UnknownDependency {
                adapter: descriptor.id.clone(),
                dependency: dependency.clone(),
            });
        }
        DependencyGraph::build(current.descriptors().chain(std::iter::once(&descriptor)))?
            .levels()?;

        let handle = self.factory.create(&descriptor, &self.events).await?;

        let mut handles = current.handles.clone();
        handles.insert(descriptor.id.clone(), handle.clone());
        let next = RegistrySnapshot::build(handles, current.retired.clone())?;
        self.snapshot.store(Arc::new(next));

        info!(
            adapter_id = %descriptor.id,
            provider_type = %descriptor.provider_type,
            "Adapter registered"
        );
        Ok(handle)
    }

    /// Active adapters serving `capability`, in priority order
    ///
    /// Lock-free; reads the published snapshot. Retired adapters are skipped
    /// and ties in priority are broken by id.
    ///
    /// # Returns
    ///
    /// An empty list when no active adapter declares the capability.
    pub fn resolve(&self, capability: Capability) -> Vec<Arc<AdapterHandle>> {
        self.snapshot.load().resolve(capability)
    }

    /// Looks an adapter up by id, retired or not
    pub fn get(&self, id: &AdapterId) -> Option<Arc<AdapterHandle>> {
        self.snapshot.load().get(id).cloned()
    }

    pub fn handles(&self) -> Vec<Arc<AdapterHandle>> {
        self.snapshot.load().handles().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<AdapterDescriptor> {
        self.snapshot.load().descriptors().cloned().collect()
    }

    pub fn is_retired(&self, id: &AdapterId) -> bool {
        self.snapshot.load().is_retired(id)
    }

    /// Takes an adapter out of rotation
    ///
    /// The handle stays registered so dependents remain valid, but `resolve`
    /// and the health monitor no longer see it. Retiring twice is a no-op.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownAdapter` if `id` is not registered.
    pub async fn retire(&self, id: &AdapterId) -> Result<(), ConfigError> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot.load_full();
        if !current.contains(id) {
            return Err(ConfigError::UnknownAdapter(id.clone()));
        }
        if current.is_retired(id) {
            return Ok(());
        }

        let mut retired = current.retired.clone();
        retired.insert(id.clone());
        let next = RegistrySnapshot {
            handles: current.handles.clone(),
            retired,
            levels: current.levels.clone(),
        };
        self.snapshot.store(Arc::new(next));

        info!(adapter_id = %id, "Adapter retired");
        Ok(())
    }

    /// Starts every adapter that is not yet running, dependencies first
    ///
    /// Adapters of one dependency level start concurrently. An adapter whose
    /// dependency is not running is reported as blocked, and nothing that did
    /// start is rolled back.
    ///
    /// # Returns
    ///
    /// Which adapters started, failed or were blocked.
    pub async fn start(&self) -> LifecycleReport {
        let snapshot = self.snapshot.load_full();
        self.running.store(true, Ordering::SeqCst);

        let report = start_levels(&snapshot, |handle| handle.status() != AdapterStatus::Running).await;
        info!(
            started = report.succeeded.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            "Registry start complete"
        );
        report
    }

    /// Stops every running adapter, dependents first
    ///
    /// Adapters of one level stop concurrently. A failed stop is reported and
    /// does not prevent stopping the rest.
    ///
    /// # Returns
    ///
    /// Which adapters stopped and which failed to.
    pub async fn stop(&self) -> LifecycleReport {
        let snapshot = self.snapshot.load_full();
        self.running.store(false, Ordering::SeqCst);

        let mut report = LifecycleReport::default();
        for level in snapshot.levels.iter().rev() {
            let running: Vec<&Arc<AdapterHandle>> = level
                .iter()
                .filter_map(|id| snapshot.get(id))
                .filter(|h| h.status() == AdapterStatus::Running)
                .collect();
            collect_outcomes(&mut report, stop_all(running).await);
        }
        report
    }

    /// Replaces the whole adapter configuration
    ///
    /// The new configuration is validated and instantiated in isolation. On any
    /// error the active configuration stays in effect, unchanged. On success
    /// the new snapshot is published with a single swap; adapters whose
    /// descriptor did not change keep their handle, including breaker state.
    /// When the registry is running, new handles are started and dropped ones
    /// stopped after the swap.
    ///
    /// # Arguments
    ///
    /// * `config` - The complete adapter set to switch to
    ///
    /// # Returns
    ///
    /// What was added, removed, replaced and kept, plus the start outcome of
    /// new handles when the registry is running.
    ///
    /// # Errors
    ///
    /// Duplicate ids, validation failures, unknown dependencies, cycles and
    /// instantiation failures. The active configuration is unchanged.
    pub async fn hot_reload_config(
        &self,
        config: RegistryConfig,
    ) -> Result<ReloadSummary, ConfigError> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot.load_full();

        let mut seen = HashSet::new();
        for descriptor in &config.adapters {
            if !seen.insert(&descriptor.id) {
                return Err(ConfigError::DuplicateAdapter(descriptor.id.clone()));
            }
            self.factory.validate(descriptor)?;
        }
        DependencyGraph::build(&config.adapters)?.levels()?;

        let mut summary = ReloadSummary::default();
        let mut handles = BTreeMap::new();
        let mut fresh = HashSet::new();
        for descriptor in &config.adapters {
            let handle = match current.get(&descriptor.id) {
                Some(existing) if existing.descriptor() == descriptor => {
                    summary.unchanged.push(descriptor.id.clone());
                    existing.clone()
                }
                existing => {
                    let handle = self.factory.create(descriptor, &self.events).await?;
                    match existing {
                        Some(_) => summary.replaced.push(descriptor.id.clone()),
                        None => summary.added.push(descriptor.id.clone()),
                    }
                    fresh.insert(descriptor.id.clone());
                    handle
                }
            };
            handles.insert(descriptor.id.clone(), handle);
        }

        let outgoing: Vec<Arc<AdapterHandle>> = current
            .handles()
            .filter(|old| {
                handles
                    .get(old.id())
                    .map_or(true, |new| !Arc::ptr_eq(old, new))
            })
            .cloned()
            .collect();
        summary.removed = current
            .handles
            .keys()
            .filter(|id| !handles.contains_key(*id))
            .cloned()
            .collect();

        let retired = current
            .retired
            .iter()
            .filter(|id| summary.unchanged.contains(id))
            .cloned()
            .collect();
        let next = Arc::new(RegistrySnapshot::build(handles, retired)?);
        self.snapshot.store(next.clone());

        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            replaced = summary.replaced.len(),
            unchanged = summary.unchanged.len(),
            "Adapter configuration reloaded"
        );

        if self.running.load(Ordering::SeqCst) {
            let running: Vec<&Arc<AdapterHandle>> = outgoing
                .iter()
                .filter(|h| h.status() == AdapterStatus::Running)
                .collect();
            let mut stopped = LifecycleReport::default();
            collect_outcomes(&mut stopped, stop_all(running).await);
            for failure in &stopped.failed {
                warn!(adapter_id = %failure.adapter_id, error = %failure.error, "Replaced adapter did not stop cleanly");
            }

            summary.started = Some(start_levels(&next, |handle| fresh.contains(handle.id())).await);
        }

        Ok(summary)
    }
}

impl ProbeTargetSource for ServiceRegistry {
    fn probe_targets(&self) -> Vec<Arc<dyn ProbeTarget>> {
        let snapshot = self.snapshot.load();
        snapshot
            .handles()
            .filter(|h| !snapshot.is_retired(h.id()))
            .map(|h| h.clone() as Arc<dyn ProbeTarget>)
            .collect()
    }
}

async fn start_levels<F>(snapshot: &RegistrySnapshot, should_start: F) -> LifecycleReport
where
    F: Fn(&AdapterHandle) -> bool,
{
    let mut report = LifecycleReport::default();

    for level in &snapshot.levels {
        let mut ready = Vec::new();
        for id in level {
            let Some(handle) = snapshot.get(id) else {
                continue;
            };
            if !should_start(handle.as_ref()) {
                continue;
            }

            let dependencies_running = handle.descriptor().depends_on.iter().all(|dep| {
                snapshot
                    .get(dep)
                    .is_some_and(|d| d.status() == AdapterStatus::Running)
            });
            if dependencies_running {
                ready.push(handle);
            } else {
                handle.set_status(AdapterStatus::Blocked);
                warn!(adapter_id = %id, "Adapter not started: a dependency is not running");
                report.blocked.push(id.clone());
            }
        }

        let outcomes = join_all(ready.into_iter().map(|handle| async move {
            (handle.id().clone(), handle.start().await)
        }))
        .await;
        collect_outcomes(&mut report, outcomes);
    }

    report
}

async fn stop_all(
    handles: Vec<&Arc<AdapterHandle>>,
) -> Vec<(AdapterId, Result<(), AdapterError>)> {
    join_all(handles.into_iter().map(|handle| async move {
        (handle.id().clone(), handle.stop().await)
    }))
    .await
}

fn collect_outcomes(
    report: &mut LifecycleReport,
    outcomes: Vec<(AdapterId, Result<(), AdapterError>)>,
) {
    for (adapter_id, outcome) in outcomes {
        match outcome {
            Ok(()) => report.succeeded.push(adapter_id),
            Err(error) => report.failed.push(LifecycleFailure {
                adapter_id,
                error: error.to_string(),
            }),
        }
    }
}
