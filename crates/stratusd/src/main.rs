//! Stratus daemon - cloud deployment orchestration service
//!
//! Hosts the orchestration core: provider dispatch, deployment execution,
//! metrics collection, and alert evaluation, with health and Prometheus
//! endpoints for probes and scraping.

use anyhow::Result;
use std::sync::Arc;
use stratus_core::health::{components, HealthRegistry};
use stratus_core::models::{CloudResource, ProviderKind, ResourceConfig, ResourceKind};
use stratus_core::observability::StructuredLogger;
use stratus_core::provider::MockProvider;
use stratus_core::service::{OrchestrationService, ServiceBuilder};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting stratusd");

    let config = config::DaemonConfig::load()?;
    info!(service = %config.service_name, api_port = config.api_port, "Daemon configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::CACHE).await;
    // Worker loops check in every cycle; a stuck loop surfaces as degraded
    health_registry.register_worker(components::COLLECTOR).await;
    health_registry.register_worker(components::EVALUATOR).await;

    let logger = StructuredLogger::new(&config.service_name);
    logger.log_startup(DAEMON_VERSION);

    // Assemble the orchestration core over the simulation backend
    let mock_provider = Arc::new(MockProvider::new());
    let handles = ServiceBuilder::new()
        .provider(ProviderKind::Mock, mock_provider.clone())
        .retry_policy(config.retry_policy())
        .collector_config(config.collector_config())
        .build()?;

    if config.seed_demo {
        seed_demo_resources(&handles.service, &mock_provider);
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let collector = handles.collector.with_health(health_registry.clone());
    let evaluator = handles.evaluator.with_health(health_registry.clone());
    let collector_handle = tokio::spawn(collector.run(shutdown_tx.subscribe()));
    let evaluator_handle =
        tokio::spawn(evaluator.run(handles.samples, shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        handles.service.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    let _ = collector_handle.await;
    let _ = evaluator_handle.await;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Register a few simulated resources so the daemon has something to
/// orchestrate and poll out of the box
fn seed_demo_resources(service: &Arc<OrchestrationService>, provider: &MockProvider) {
    let demo = [
        ("web-frontend", ResourceKind::Compute, ResourceConfig::new(4, 8, 100)),
        ("orders-db", ResourceKind::ManagedDb, ResourceConfig::new(8, 32, 500)),
        ("asset-bucket", ResourceKind::ObjectStorage, ResourceConfig::new(0, 0, 2000)),
        ("thumbnailer", ResourceKind::Function, ResourceConfig::new(1, 2, 0)),
    ];

    for (name, kind, config) in demo {
        let resource = CloudResource::new(
            "demo-user",
            name,
            kind,
            ProviderKind::Mock,
            config.with_region("us-east-1"),
            "us-east-1",
        );
        provider.seed(resource.id, name, kind, resource.config.clone());
        let id = service.register_resource(resource);
        info!(resource_id = %id, name = %name, "Seeded demo resource");
    }
}
