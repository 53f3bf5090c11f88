//! HTTP API for probes, Prometheus metrics, and an operational summary

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use stratus_core::alerts::AlertFilter;
use stratus_core::deployment::DeploymentFilter;
use stratus_core::health::{ComponentStatus, HealthRegistry};
use stratus_core::service::OrchestrationService;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub service: Arc<OrchestrationService>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, service: Arc<OrchestrationService>) -> Self {
        Self {
            health_registry,
            service,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        // Degraded is still operational
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Operational summary: what the core is currently managing
async fn statusz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let deployments = state.service.list_deployments(&DeploymentFilter::default());
    let in_flight = deployments.iter().filter(|d| !d.is_terminal()).count();
    let active_alerts = state
        .service
        .list_alerts(&AlertFilter {
            active_only: true,
            ..Default::default()
        })
        .len();

    Json(json!({
        "resources": state.service.list_resources().len(),
        "deployments": {
            "total": deployments.len(),
            "in_flight": in_flight,
        },
        "active_alerts": active_alerts,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/statusz", get(statusz))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
