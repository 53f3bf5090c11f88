//! Observability infrastructure for the orchestration core
//!
//! Provides:
//! - Prometheus metrics (deployment outcomes, retries, rollbacks, cache
//!   effectiveness, collection latency)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CoreMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct CoreMetricsInner {
    deployments_succeeded: IntCounter,
    deployments_failed: IntCounter,
    deployments_rolled_back: IntCounter,
    deploy_retries: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    collection_latency_seconds: Histogram,
    collection_errors: IntCounter,
    resources_monitored: IntGauge,
    active_alerts: IntGauge,
}

impl CoreMetricsInner {
    fn new() -> Self {
        Self {
            deployments_succeeded: register_int_counter!(
                "stratus_deployments_succeeded_total",
                "Total number of deployments that reached the successful state"
            )
            .expect("Failed to register deployments_succeeded"),

            deployments_failed: register_int_counter!(
                "stratus_deployments_failed_total",
                "Total number of deployments that failed"
            )
            .expect("Failed to register deployments_failed"),

            deployments_rolled_back: register_int_counter!(
                "stratus_deployments_rolled_back_total",
                "Total number of deployments restored to their previous configuration"
            )
            .expect("Failed to register deployments_rolled_back"),

            deploy_retries: register_int_counter!(
                "stratus_deploy_retries_total",
                "Total number of transient provider failures that were retried"
            )
            .expect("Failed to register deploy_retries"),

            cache_hits: register_int_counter!(
                "stratus_cache_hits_total",
                "Total number of read-cache hits"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_counter!(
                "stratus_cache_misses_total",
                "Total number of read-cache misses"
            )
            .expect("Failed to register cache_misses"),

            collection_latency_seconds: register_histogram!(
                "stratus_collection_latency_seconds",
                "Time spent completing one metrics collection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            collection_errors: register_int_counter!(
                "stratus_collection_errors_total",
                "Total number of per-resource metric collection failures"
            )
            .expect("Failed to register collection_errors"),

            resources_monitored: register_int_gauge!(
                "stratus_resources_monitored",
                "Number of resources currently polled for metrics"
            )
            .expect("Failed to register resources_monitored"),

            active_alerts: register_int_gauge!(
                "stratus_active_alerts",
                "Number of alerts currently in the triggered state"
            )
            .expect("Failed to register active_alerts"),
        }
    }
}

/// Core metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct CoreMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CoreMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CoreMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_deployments_succeeded(&self) {
        self.inner().deployments_succeeded.inc();
    }

    pub fn inc_deployments_failed(&self) {
        self.inner().deployments_failed.inc();
    }

    pub fn inc_rollbacks(&self) {
        self.inner().deployments_rolled_back.inc();
    }

    pub fn inc_deploy_retries(&self) {
        self.inner().deploy_retries.inc();
    }

    pub fn inc_cache_hits(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().cache_misses.inc();
    }

    /// Record a collection cycle latency observation
    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn set_resources_monitored(&self, count: i64) {
        self.inner().resources_monitored.set(count);
    }

    pub fn set_active_alerts(&self, count: i64) {
        self.inner().active_alerts.set(count);
    }
}

/// Structured logger for orchestration events
///
/// Provides consistent JSON-formatted logging for deployment outcomes,
/// alert transitions, and collection cycles.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log a settled deployment
    pub fn log_deployment_settled(
        &self,
        deployment_id: &str,
        resource_id: &str,
        action: &str,
        state: &str,
        duration_secs: i64,
    ) {
        info!(
            event = "deployment_settled",
            service = %self.service,
            deployment_id = %deployment_id,
            resource_id = %resource_id,
            action = %action,
            state = %state,
            duration_secs = duration_secs,
            "Deployment settled"
        );
    }

    /// Log an alert activation or clearing
    pub fn log_alert_transition(
        &self,
        alert_id: &str,
        resource_id: &str,
        metric: &str,
        threshold: f64,
        observed: f64,
        activated: bool,
    ) {
        if activated {
            warn!(
                event = "alert_activated",
                service = %self.service,
                alert_id = %alert_id,
                resource_id = %resource_id,
                metric = %metric,
                threshold = threshold,
                observed = observed,
                "Alert threshold exceeded"
            );
        } else {
            info!(
                event = "alert_cleared",
                service = %self.service,
                alert_id = %alert_id,
                resource_id = %resource_id,
                metric = %metric,
                threshold = threshold,
                observed = observed,
                "Alert cleared"
            );
        }
    }

    /// Log one completed collection cycle
    pub fn log_collection_cycle(&self, polled: usize, failed: usize, duration_ms: u64) {
        if failed > 0 {
            warn!(
                event = "collection_cycle",
                service = %self.service,
                polled = polled,
                failed = failed,
                duration_ms = duration_ms,
                "Collection cycle completed with failures"
            );
        } else {
            info!(
                event = "collection_cycle",
                service = %self.service,
                polled = polled,
                failed = failed,
                duration_ms = duration_ms,
                "Collection cycle completed"
            );
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            "Orchestration service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Orchestration service shutting down"
        );
    }
}
