//! HTTP API Layer
//!
//! Axum surface of the integration gateway:
//!
//! - **Health**: fleet status, per-adapter metrics and probe history
//! - **Sync**: business event intake and sync report export
//! - **Adapters**: registry listing and configuration hot reload
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let app = create_router(AppState::new(registry, manager, monitor));
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use domain_crm::CrmIntegrationManager;
use domain_registry::ServiceRegistry;
use domain_resilience::HealthMonitor;
use infra_db::AdapterDescriptorRepository;

use crate::handlers::{adapters, health, sync};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub manager: Arc<CrmIntegrationManager>,
    pub monitor: Arc<HealthMonitor>,
    /// Persists reloaded configurations when a database is configured
    pub descriptors: Option<AdapterDescriptorRepository>,
}

impl AppState {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        manager: Arc<CrmIntegrationManager>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            registry,
            manager,
            monitor,
            descriptors: None,
        }
    }

    pub fn with_descriptors(mut self, repository: AdapterDescriptorRepository) -> Self {
        self.descriptors = Some(repository);
        self
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/adapters", get(health::adapter_health))
        .route("/health/adapters/:id/history", get(health::adapter_history));

    let sync_routes = Router::new()
        .route("/", post(sync::submit_event))
        .route("/reports", get(sync::list_reports))
        .route("/reports/:operation_id", get(sync::get_report));

    let adapter_routes = Router::new()
        .route("/", get(adapters::list_adapters))
        .route("/reload", post(adapters::reload));

    let api_routes = Router::new()
        .nest("/sync", sync_routes)
        .nest("/adapters", adapter_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
