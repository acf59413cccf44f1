//! Integration Gateway - API Server Binary
//!
//! Loads the adapter configuration, starts every adapter in dependency
//! order, runs the health monitor and serves the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Adapters from ./integration.toml
//! cargo run --bin integration-gateway
//!
//! # Adapters and sync history in PostgreSQL
//! INTEGRATION__DATABASE_URL=postgres://... cargo run --bin integration-gateway
//! ```
//!
//! # Environment Variables
//!
//! * `INTEGRATION_CONFIG` - Config file name without extension (default: integration)
//! * `INTEGRATION__HOST` / `INTEGRATION__PORT` - Listen address (default: 0.0.0.0:8080)
//! * `INTEGRATION__LOG_LEVEL` - Used when `RUST_LOG` is unset (default: info)
//! * `INTEGRATION__LOG_FORMAT` - `text` or `json`
//! * `INTEGRATION__DATABASE_URL` - Enables PostgreSQL persistence
//! * `INTEGRATION__SECRETS_PREFIX` - Prefix for credential environment variables

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_crm::{register_reference_builders, CrmIntegrationManager, InMemorySyncHistory, SyncHistory};
use domain_registry::{EnvSecretStore, RegistryConfig, ServiceFactory, ServiceRegistry};
use domain_resilience::{BreakerEvents, HealthMonitor, TracingAlertSink};
use infra_db::{
    create_pool, run_migrations, AdapterDescriptorRepository, DatabaseConfig, PostgresSyncHistory,
};
use interface_api::config::{GatewayConfig, LogFormat};
use interface_api::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config_file =
        std::env::var("INTEGRATION_CONFIG").unwrap_or_else(|_| "integration".to_string());
    let config = GatewayConfig::load(&config_file).context("loading configuration")?;

    init_tracing(&config.log_level, config.log_format);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        strategy = %config.crm.strategy,
        "Starting integration gateway"
    );

    let secrets = match &config.secrets_prefix {
        Some(prefix) => EnvSecretStore::with_prefix(prefix.clone()),
        None => EnvSecretStore::new(),
    };
    let mut factory = ServiceFactory::new(Arc::new(secrets));
    register_reference_builders(&mut factory);

    let events = BreakerEvents::default();
    let registry = Arc::new(ServiceRegistry::with_events(Arc::new(factory), events.clone()));

    let (history, descriptors, registry_config) = match &config.database_url {
        Some(url) => {
            let pool = create_pool(DatabaseConfig::new(url.clone())).await?;
            run_migrations(&pool).await?;

            let repository = AdapterDescriptorRepository::new(pool.clone());
            let stored = repository.load_config().await?;
            let registry_config = if stored.adapters.is_empty() {
                config.registry_config()
            } else {
                stored
            };
            let history: Arc<dyn SyncHistory> = Arc::new(PostgresSyncHistory::new(pool));
            (history, Some(repository), registry_config)
        }
        None => {
            let history: Arc<dyn SyncHistory> = Arc::new(InMemorySyncHistory::new());
            (history, None, config.registry_config())
        }
    };

    load_adapters(&registry, registry_config).await?;

    let manager = Arc::new(CrmIntegrationManager::new(
        registry.clone(),
        history,
        config.crm.clone(),
    ));
    let monitor = Arc::new(HealthMonitor::new(
        config.monitor.clone(),
        registry.clone(),
        Arc::new(TracingAlertSink),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = {
        let monitor = monitor.clone();
        let breaker_events = events.subscribe();
        tokio::spawn(async move { monitor.run(breaker_events, shutdown_rx).await })
    };

    let mut state = AppState::new(registry.clone(), manager, monitor);
    if let Some(repository) = descriptors {
        state = state.with_descriptors(repository);
    }
    let app = create_router(state);

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(error) = monitor_task.await {
        tracing::warn!(%error, "Health monitor task ended abnormally");
    }
    let stopped = registry.stop().await;
    tracing::info!(
        stopped = stopped.succeeded.len(),
        failed = stopped.failed.len(),
        "Server shutdown complete"
    );
    Ok(())
}

/// Installs the configuration and starts every adapter
///
/// An invalid configuration is fatal. Adapters that fail to start are
/// reported and left out; the gateway still serves the rest.
async fn load_adapters(registry: &ServiceRegistry, config: RegistryConfig) -> anyhow::Result<()> {
    let summary = registry
        .hot_reload_config(config)
        .await
        .context("invalid adapter configuration")?;
    tracing::info!(adapters = summary.added.len(), "Adapter configuration loaded");

    let report = registry.start().await;
    for failure in &report.failed {
        tracing::error!(adapter_id = %failure.adapter_id, error = %failure.error, "Adapter failed to start");
    }
    for blocked in &report.blocked {
        tracing::warn!(adapter_id = %blocked, "Adapter blocked by a failed dependency");
    }
    Ok(())
}

/// Initializes the tracing subscriber for structured logging
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
