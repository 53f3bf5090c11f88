//! Threshold alert evaluation
//!
//! Handles:
//! - User-defined threshold alerts bound to one resource and metric
//! - Idempotent activation and clearing driven by collected samples
//! - Cache invalidation when an alert changes state
//!
//! Evaluation is strict-greater-than on the latest sample: a value exactly at
//! the threshold never fires. Re-observing a breach on an already-active
//! alert changes nothing, so the original `triggered_at` survives.

use crate::cache::{CacheCategory, ReadCache};
use crate::health::{components, HealthRegistry};
use crate::models::{Alert, AlertMetric, ResourceMetrics};
use crate::observability::{CoreMetrics, StructuredLogger};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::info;
use uuid::Uuid;

/// Check-in cadence for the evaluation loop's health entry
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// State change produced by one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTransition {
    Activated,
    Cleared,
}

/// Filter for alert listings
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub resource_id: Option<Uuid>,
    pub metric: Option<AlertMetric>,
    pub active_only: bool,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.resource_id.map_or(true, |id| alert.resource_id == id)
            && self.metric.map_or(true, |metric| alert.metric == metric)
            && (!self.active_only || alert.is_active())
    }

    /// Parameter list for deterministic cache keys
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(id) = self.resource_id {
            params.push(("resource", id.to_string()));
        }
        if let Some(metric) = self.metric {
            params.push(("metric", metric.to_string()));
        }
        if self.active_only {
            params.push(("active", "true".to_string()));
        }
        params
    }
}

/// Store of user-defined alerts
pub struct AlertRegistry {
    alerts: DashMap<Uuid, Alert>,
}

impl Default for AlertRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
        }
    }

    pub fn create(&self, alert: Alert) -> Uuid {
        let id = alert.id;
        info!(
            alert_id = %id,
            resource_id = %alert.resource_id,
            metric = %alert.metric,
            threshold = alert.threshold,
            "Alert created"
        );
        self.alerts.insert(id, alert);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.get(&id).map(|a| a.clone())
    }

    pub fn delete(&self, id: Uuid) -> bool {
        self.alerts.remove(&id).is_some()
    }

    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut matched: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .map(|a| a.clone())
            .collect();
        matched.sort_by_key(|a| a.id);
        matched
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.is_active()).count()
    }

    fn set_triggered(&self, id: Uuid, triggered_at: Option<i64>) {
        if let Some(mut alert) = self.alerts.get_mut(&id) {
            alert.triggered_at = triggered_at;
        }
    }
}

/// Evaluates collected samples against registered alerts
pub struct AlertEvaluator {
    alerts: Arc<AlertRegistry>,
    cache: Arc<ReadCache>,
    metrics: CoreMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl AlertEvaluator {
    pub fn new(alerts: Arc<AlertRegistry>, cache: Arc<ReadCache>) -> Self {
        Self {
            alerts,
            cache,
            metrics: CoreMetrics::new(),
            logger: StructuredLogger::new("alert-evaluator"),
            health: None,
        }
    }

    /// Report liveness to a health registry while the loop runs
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    /// Consume collected samples until shutdown
    ///
    /// The heartbeat arm keeps the health entry fresh even when no samples
    /// arrive, so an idle evaluator is not mistaken for a stuck one.
    pub async fn run(
        self,
        mut samples: mpsc::Receiver<ResourceMetrics>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting alert evaluation loop");

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                sample = samples.recv() => {
                    match sample {
                        Some(sample) => {
                            self.evaluate(&sample);
                        }
                        None => {
                            info!("Sample channel closed, stopping alert evaluation");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if let Some(health) = &self.health {
                        health.set_healthy(components::EVALUATOR).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down alert evaluation loop");
                    break;
                }
            }
        }
    }

    /// Evaluate one sample against every matching alert
    ///
    /// Idempotent: re-evaluating the same sample produces no further
    /// transitions.
    pub fn evaluate(&self, sample: &ResourceMetrics) -> Vec<(Uuid, AlertTransition)> {
        let matching = self.alerts.list(&AlertFilter {
            resource_id: Some(sample.resource_id),
            ..Default::default()
        });

        let mut transitions = Vec::new();
        for alert in matching {
            let observed = alert.metric.value_of(sample);
            let breached = observed > alert.threshold;

            let transition = match (breached, alert.is_active()) {
                (true, false) => {
                    self.alerts.set_triggered(alert.id, Some(sample.timestamp));
                    Some(AlertTransition::Activated)
                }
                (false, true) => {
                    self.alerts.set_triggered(alert.id, None);
                    Some(AlertTransition::Cleared)
                }
                _ => None,
            };

            if let Some(transition) = transition {
                self.logger.log_alert_transition(
                    &alert.id.to_string(),
                    &alert.resource_id.to_string(),
                    &alert.metric.to_string(),
                    alert.threshold,
                    observed,
                    transition == AlertTransition::Activated,
                );
                transitions.push((alert.id, transition));
            }
        }

        if !transitions.is_empty() {
            self.cache.invalidate(CacheCategory::Alerts);
            self.metrics.set_active_alerts(self.alerts.active_count() as i64);
        }

        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(resource_id: Uuid, cpu: f32, timestamp: i64) -> ResourceMetrics {
        ResourceMetrics {
            resource_id,
            timestamp,
            cpu_percent: cpu,
            ram_percent: 30.0,
            storage_percent: 10.0,
            network_rx_bytes: 1000,
            network_tx_bytes: 500,
        }
    }

    fn evaluator_with_alert(threshold: f64) -> (AlertEvaluator, Arc<AlertRegistry>, Uuid, Uuid) {
        let registry = Arc::new(AlertRegistry::new());
        let resource_id = Uuid::new_v4();
        let alert_id = registry.create(Alert::new(resource_id, AlertMetric::Cpu, threshold));
        let evaluator = AlertEvaluator::new(registry.clone(), Arc::new(ReadCache::new()));
        (evaluator, registry, resource_id, alert_id)
    }

    #[test]
    fn test_breach_activates_alert() {
        let (evaluator, registry, resource_id, alert_id) = evaluator_with_alert(80.0);

        let transitions = evaluator.evaluate(&sample(resource_id, 92.0, 1_700_000_000));

        assert_eq!(transitions, vec![(alert_id, AlertTransition::Activated)]);
        assert_eq!(
            registry.get(alert_id).unwrap().triggered_at,
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_exact_threshold_does_not_fire() {
        let (evaluator, registry, resource_id, alert_id) = evaluator_with_alert(80.0);

        let transitions = evaluator.evaluate(&sample(resource_id, 80.0, 1_700_000_000));

        assert!(transitions.is_empty());
        assert!(!registry.get(alert_id).unwrap().is_active());
    }

    #[test]
    fn test_repeated_breach_keeps_original_trigger_time() {
        let (evaluator, registry, resource_id, alert_id) = evaluator_with_alert(80.0);

        evaluator.evaluate(&sample(resource_id, 92.0, 1_700_000_000));
        let transitions = evaluator.evaluate(&sample(resource_id, 95.0, 1_700_000_060));

        assert!(transitions.is_empty());
        assert_eq!(
            registry.get(alert_id).unwrap().triggered_at,
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_recovery_clears_alert() {
        let (evaluator, registry, resource_id, alert_id) = evaluator_with_alert(80.0);

        evaluator.evaluate(&sample(resource_id, 92.0, 1_700_000_000));
        let transitions = evaluator.evaluate(&sample(resource_id, 40.0, 1_700_000_060));

        assert_eq!(transitions, vec![(alert_id, AlertTransition::Cleared)]);
        assert!(!registry.get(alert_id).unwrap().is_active());

        // Clearing an inactive alert is a no-op
        let again = evaluator.evaluate(&sample(resource_id, 40.0, 1_700_000_120));
        assert!(again.is_empty());
    }

    #[test]
    fn test_samples_for_other_resources_ignored() {
        let (evaluator, registry, _resource_id, alert_id) = evaluator_with_alert(80.0);

        let transitions = evaluator.evaluate(&sample(Uuid::new_v4(), 99.0, 1_700_000_000));

        assert!(transitions.is_empty());
        assert!(!registry.get(alert_id).unwrap().is_active());
    }

    #[test]
    fn test_network_alert_fires_on_combined_bytes() {
        let registry = Arc::new(AlertRegistry::new());
        let resource_id = Uuid::new_v4();
        let alert_id = registry.create(Alert::new(resource_id, AlertMetric::Network, 1200.0));
        let evaluator = AlertEvaluator::new(registry.clone(), Arc::new(ReadCache::new()));

        // rx + tx = 1500 > 1200
        let transitions = evaluator.evaluate(&sample(resource_id, 10.0, 1_700_000_000));

        assert_eq!(transitions, vec![(alert_id, AlertTransition::Activated)]);
    }

    #[test]
    fn test_transition_invalidates_alert_cache() {
        let registry = Arc::new(AlertRegistry::new());
        let resource_id = Uuid::new_v4();
        registry.create(Alert::new(resource_id, AlertMetric::Cpu, 80.0));

        let cache = Arc::new(ReadCache::new());
        cache.set(
            CacheCategory::Alerts,
            "alerts:list",
            serde_json::json!([]),
        );

        let evaluator = AlertEvaluator::new(registry, cache.clone());
        evaluator.evaluate(&sample(resource_id, 92.0, 1_700_000_000));

        assert_eq!(cache.get("alerts:list"), None);
    }

    #[test]
    fn test_filter_active_only() {
        let registry = AlertRegistry::new();
        let resource_id = Uuid::new_v4();

        let mut active = Alert::new(resource_id, AlertMetric::Cpu, 80.0);
        active.triggered_at = Some(1_700_000_000);
        let active_id = registry.create(active);
        registry.create(Alert::new(resource_id, AlertMetric::Ram, 90.0));

        let listed = registry.list(&AlertFilter {
            active_only: true,
            ..Default::default()
        });

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active_id);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_run_checks_in_with_health_registry() {
        use crate::health::{ComponentHealth, ComponentStatus};

        let health = HealthRegistry::new().with_stale_after(Duration::from_secs(60));
        health.register_worker(components::EVALUATOR).await;
        // Pre-age the entry; the loop's first heartbeat must refresh it
        health
            .update(
                components::EVALUATOR,
                ComponentHealth {
                    status: ComponentStatus::Healthy,
                    message: None,
                    last_check_timestamp: chrono::Utc::now().timestamp() - 300,
                },
            )
            .await;

        let evaluator = AlertEvaluator::new(
            Arc::new(AlertRegistry::new()),
            Arc::new(ReadCache::new()),
        )
        .with_health(health.clone());

        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(evaluator.run(rx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let snapshot = health.health().await;
        assert_eq!(snapshot.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_run_consumes_samples_until_shutdown() {
        let registry = Arc::new(AlertRegistry::new());
        let resource_id = Uuid::new_v4();
        let alert_id = registry.create(Alert::new(resource_id, AlertMetric::Cpu, 80.0));

        let evaluator = AlertEvaluator::new(registry.clone(), Arc::new(ReadCache::new()));
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(evaluator.run(rx, shutdown_rx));

        tx.send(sample(resource_id, 92.0, 1_700_000_000)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(registry.get(alert_id).unwrap().is_active());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("evaluator did not stop")
            .unwrap();
    }
}
