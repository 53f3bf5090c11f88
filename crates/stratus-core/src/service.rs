//! Service facade over the orchestration core
//!
//! Bundles the stores, orchestrator, estimator, and alert registry behind one
//! API surface. Read-heavy queries go through the [`ReadCache`]; every write
//! path invalidates the categories it touches, so cached views are stale for
//! at most one TTL and never across a write the caller has seen acknowledged.

use crate::alerts::{AlertEvaluator, AlertFilter, AlertRegistry};
use crate::cache::{cache_key, CacheCategory, ReadCache};
use crate::collector::{CollectorConfig, MetricsCollector, MetricsStore};
use crate::cost::CostEstimate;
use crate::deployment::{
    Deployment, DeploymentFilter, DeploymentHandle, DeploymentLog, DeploymentOrchestrator,
    DeploymentRequest, ResourceRegistry, RetryPolicy,
};
use crate::error::OrchestratorError;
use crate::models::{
    Alert, CloudResource, ProviderKind, ResourceConfig, ResourceKind, ResourceMetrics,
};
use crate::provider::{CloudProvider, ProviderRegistry};
use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Unified entry point for deployments, queries, and alert management
pub struct OrchestrationService {
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    log: Arc<DeploymentLog>,
    orchestrator: Arc<DeploymentOrchestrator>,
    alerts: Arc<AlertRegistry>,
    store: Arc<MetricsStore>,
    cache: Arc<ReadCache>,
}

impl OrchestrationService {
    /// Register a resource and drop any cached inventory views
    pub fn register_resource(&self, resource: CloudResource) -> Uuid {
        let id = resource.id;
        self.resources.register(resource);
        self.cache.invalidate(CacheCategory::Resources);
        id
    }

    pub fn get_resource(&self, id: Uuid) -> Result<CloudResource, OrchestratorError> {
        self.resources
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found("resource", id))
    }

    /// Resource inventory, served from cache when fresh
    pub fn list_resources(&self) -> Vec<CloudResource> {
        let key = cache_key("resources", &[("view", "list".to_string())]);
        if let Some(cached) = self.cache.get_as(&key) {
            return cached;
        }

        let listed = self.resources.list();
        self.cache.set_as(CacheCategory::Resources, key, &listed);
        listed
    }

    /// Submit a deployment; see [`DeploymentOrchestrator::start`]
    pub async fn create_deployment(
        &self,
        request: DeploymentRequest,
    ) -> Result<DeploymentHandle, OrchestratorError> {
        self.orchestrator.start(request).await
    }

    pub fn get_deployment(&self, id: Uuid) -> Result<Deployment, OrchestratorError> {
        self.log
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found("deployment", id))
    }

    /// Deployment history, served from cache when fresh
    pub fn list_deployments(&self, filter: &DeploymentFilter) -> Vec<Deployment> {
        let key = cache_key("deployments", &filter.cache_params());
        if let Some(cached) = self.cache.get_as(&key) {
            return cached;
        }

        let listed = self.log.list(filter);
        self.cache.set_as(CacheCategory::Deployments, key, &listed);
        listed
    }

    /// Cost estimate for a configuration, cached by its fingerprint
    ///
    /// Identical configurations share one cache entry regardless of which
    /// resource or request produced them.
    pub fn estimate_cost(
        &self,
        provider: ProviderKind,
        kind: ResourceKind,
        config: &ResourceConfig,
    ) -> Result<CostEstimate, OrchestratorError> {
        let provider = self.providers.get(provider)?;

        let fingerprint = config.fingerprint();
        let key = cache_key(
            "billing",
            &[("kind", kind.to_string()), ("config", fingerprint)],
        );
        if let Some(cached) = self.cache.get_as(&key) {
            return Ok(cached);
        }

        let estimate = provider.estimate_cost(kind, config);
        self.cache.set_as(CacheCategory::Billing, key, &estimate);
        Ok(estimate)
    }

    pub fn latest_metrics(&self, resource_id: Uuid) -> Option<ResourceMetrics> {
        self.store.latest(resource_id)
    }

    /// Sample window for a resource, served from cache when fresh
    pub fn resource_metrics(
        &self,
        resource_id: Uuid,
        from: i64,
        to: i64,
    ) -> Vec<ResourceMetrics> {
        let key = cache_key(
            "monitoring",
            &[
                ("resource", resource_id.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ],
        );
        if let Some(cached) = self.cache.get_as(&key) {
            return cached;
        }

        let samples = self.store.range(resource_id, from, to);
        self.cache.set_as(CacheCategory::Monitoring, key, &samples);
        samples
    }

    /// Create an alert and drop cached alert views
    pub fn create_alert(&self, alert: Alert) -> Uuid {
        let id = self.alerts.create(alert);
        self.cache.invalidate(CacheCategory::Alerts);
        id
    }

    pub fn get_alert(&self, id: Uuid) -> Result<Alert, OrchestratorError> {
        self.alerts
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found("alert", id))
    }

    pub fn delete_alert(&self, id: Uuid) -> Result<(), OrchestratorError> {
        if !self.alerts.delete(id) {
            return Err(OrchestratorError::not_found("alert", id));
        }
        self.cache.invalidate(CacheCategory::Alerts);
        Ok(())
    }

    /// Alert listing, served from cache when fresh
    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let key = cache_key("alerts", &filter.cache_params());
        if let Some(cached) = self.cache.get_as(&key) {
            return cached;
        }

        let listed = self.alerts.list(filter);
        self.cache.set_as(CacheCategory::Alerts, key, &listed);
        listed
    }

    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }
}

/// Assembled service plus the background workers the daemon must spawn
pub struct ServiceHandles {
    pub service: Arc<OrchestrationService>,
    pub collector: MetricsCollector,
    pub evaluator: AlertEvaluator,
    /// Samples fanned out by the collector, consumed by the evaluator
    pub samples: tokio::sync::mpsc::Receiver<ResourceMetrics>,
}

/// Builder wiring the orchestration components together
pub struct ServiceBuilder {
    providers: ProviderRegistry,
    retry_policy: RetryPolicy,
    collector_config: CollectorConfig,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            providers: ProviderRegistry::new(),
            retry_policy: RetryPolicy::default(),
            collector_config: CollectorConfig::default(),
        }
    }

    /// Register a provider backend
    pub fn provider(mut self, kind: ProviderKind, provider: Arc<dyn CloudProvider>) -> Self {
        self.providers.register(kind, provider);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn collector_config(mut self, config: CollectorConfig) -> Self {
        self.collector_config = config;
        self
    }

    /// Assemble the service and its background workers
    pub fn build(self) -> Result<ServiceHandles> {
        if self.providers.is_empty() {
            anyhow::bail!("At least one provider is required");
        }

        let providers = Arc::new(self.providers);
        let resources = Arc::new(ResourceRegistry::new());
        let log = Arc::new(DeploymentLog::new());
        let cache = Arc::new(ReadCache::new());
        let store = Arc::new(MetricsStore::new(self.collector_config.max_series_len));
        let alerts = Arc::new(AlertRegistry::new());

        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            providers.clone(),
            resources.clone(),
            log.clone(),
            cache.clone(),
            self.retry_policy,
        ));

        let (collector, samples) = MetricsCollector::new(
            providers.clone(),
            resources.clone(),
            store.clone(),
            cache.clone(),
            self.collector_config,
        );

        let evaluator = AlertEvaluator::new(alerts.clone(), cache.clone());

        let service = Arc::new(OrchestrationService {
            providers,
            resources,
            log,
            orchestrator,
            alerts,
            store,
            cache,
        });

        Ok(ServiceHandles {
            service,
            collector,
            evaluator,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{DeploymentAction, DeploymentState};
    use crate::models::AlertMetric;
    use crate::provider::MockProvider;
    use std::time::Duration;

    fn build_service() -> (ServiceHandles, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new().with_latency(Duration::ZERO));
        let handles = ServiceBuilder::new()
            .provider(ProviderKind::Mock, provider.clone())
            .retry_policy(RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                deploy_timeout: Duration::from_millis(500),
            })
            .build()
            .unwrap();
        (handles, provider)
    }

    fn seed_resource(service: &OrchestrationService, provider: &MockProvider) -> Uuid {
        let resource = CloudResource::new(
            "user-1",
            "web-1",
            ResourceKind::Compute,
            ProviderKind::Mock,
            ResourceConfig::new(2, 4, 50),
            "us-east-1",
        );
        provider.seed(
            resource.id,
            "web-1",
            ResourceKind::Compute,
            resource.config.clone(),
        );
        service.register_resource(resource)
    }

    #[test]
    fn test_builder_requires_a_provider() {
        assert!(ServiceBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_deployment_round_trip_through_facade() {
        let (handles, provider) = build_service();
        let service = handles.service;
        let resource_id = seed_resource(&service, &provider);

        let handle = service
            .create_deployment(DeploymentRequest {
                resource_id,
                action: DeploymentAction::ScaleUp,
                config: ResourceConfig::new(4, 8, 50),
                user: "user-1".to_string(),
            })
            .await
            .unwrap();
        let deployment_id = handle.settled().await;

        let deployment = service.get_deployment(deployment_id).unwrap();
        assert_eq!(deployment.state(), DeploymentState::Successful);

        let listed = service.list_deployments(&DeploymentFilter {
            resource_id: Some(resource_id),
            ..Default::default()
        });
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, deployment_id);
    }

    #[tokio::test]
    async fn test_list_deployments_reflects_new_writes() {
        let (handles, provider) = build_service();
        let service = handles.service;
        let resource_id = seed_resource(&service, &provider);

        // Prime the cache with the empty listing
        assert!(service.list_deployments(&DeploymentFilter::default()).is_empty());

        let handle = service
            .create_deployment(DeploymentRequest {
                resource_id,
                action: DeploymentAction::Restart,
                config: ResourceConfig::new(2, 4, 50),
                user: "user-1".to_string(),
            })
            .await
            .unwrap();

        // Admission invalidated the cached listing before returning
        assert_eq!(service.list_deployments(&DeploymentFilter::default()).len(), 1);
        handle.settled().await;
    }

    #[test]
    fn test_estimate_cost_shares_cache_across_identical_configs() {
        let (handles, _provider) = build_service();
        let service = handles.service;

        let config = ResourceConfig::new(2, 4, 50).with_region("us-east-1");
        let first = service
            .estimate_cost(ProviderKind::Mock, ResourceKind::Compute, &config)
            .unwrap();
        let second = service
            .estimate_cost(ProviderKind::Mock, ResourceKind::Compute, &config.clone())
            .unwrap();

        assert_eq!(first.hourly_rate, second.hourly_rate);
        assert_eq!(first.computed_at, second.computed_at);
        assert_eq!(first.config_fingerprint, config.fingerprint());
    }

    #[test]
    fn test_alert_lifecycle_through_facade() {
        let (handles, _provider) = build_service();
        let service = handles.service;
        let resource_id = Uuid::new_v4();

        let alert_id = service.create_alert(Alert::new(resource_id, AlertMetric::Cpu, 80.0));
        assert!(service.get_alert(alert_id).is_ok());

        let listed = service.list_alerts(&AlertFilter {
            resource_id: Some(resource_id),
            ..Default::default()
        });
        assert_eq!(listed.len(), 1);

        service.delete_alert(alert_id).unwrap();
        assert!(service.get_alert(alert_id).is_err());
        // Deletion dropped the cached listing
        assert!(service
            .list_alerts(&AlertFilter {
                resource_id: Some(resource_id),
                ..Default::default()
            })
            .is_empty());
    }

    #[tokio::test]
    async fn test_collector_feeds_facade_metrics_queries() {
        let (handles, provider) = build_service();
        let service = handles.service.clone();
        let resource_id = seed_resource(&service, &provider);

        handles.collector.collect_all().await;

        assert!(service.latest_metrics(resource_id).is_some());
        let window = service.resource_metrics(resource_id, 0, i64::MAX);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_unknown_lookups_return_not_found() {
        let (handles, _provider) = build_service();
        let service = handles.service;

        assert!(service.get_resource(Uuid::new_v4()).is_err());
        assert!(service.get_deployment(Uuid::new_v4()).is_err());
        assert!(service.delete_alert(Uuid::new_v4()).is_err());
    }
}
