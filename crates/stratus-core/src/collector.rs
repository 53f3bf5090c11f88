//! Periodic metrics collection
//!
//! Polls every active resource's provider on a fixed interval, stores the
//! samples in bounded in-memory series, and fans them out to the alert
//! evaluator. One slow or failing resource never blocks the rest of the
//! cycle: each poll runs under its own timeout and failures are counted and
//! skipped.

use crate::cache::{CacheCategory, ReadCache};
use crate::deployment::ResourceRegistry;
use crate::health::{components, HealthRegistry};
use crate::models::ResourceMetrics;
use crate::observability::{CoreMetrics, StructuredLogger};
use crate::provider::ProviderRegistry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the metrics collection loop
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Base collection interval (default: 30 seconds)
    pub interval: Duration,
    /// Maximum jitter added to the interval (default: 1 second)
    pub jitter: Duration,
    /// Per-resource poll timeout (default: 5 seconds)
    pub poll_timeout: Duration,
    /// Channel buffer size for samples fanned out to the evaluator
    pub buffer_size: usize,
    /// Samples retained per resource before the oldest is dropped
    pub max_series_len: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(5),
            buffer_size: 1000,
            // 3 days of samples at the 30s default interval
            max_series_len: 8640,
        }
    }
}

/// Bounded in-memory time series, one ring per resource
pub struct MetricsStore {
    series: DashMap<Uuid, VecDeque<ResourceMetrics>>,
    max_series_len: usize,
}

impl MetricsStore {
    pub fn new(max_series_len: usize) -> Self {
        Self {
            series: DashMap::new(),
            max_series_len,
        }
    }

    /// Append a sample, dropping the oldest once the ring is full
    pub fn append(&self, sample: ResourceMetrics) {
        let mut series = self.series.entry(sample.resource_id).or_default();
        if series.len() >= self.max_series_len {
            series.pop_front();
        }
        series.push_back(sample);
    }

    pub fn latest(&self, resource_id: Uuid) -> Option<ResourceMetrics> {
        self.series
            .get(&resource_id)
            .and_then(|s| s.back().cloned())
    }

    /// Samples within `[from, to]`, oldest first
    pub fn range(&self, resource_id: Uuid, from: i64, to: i64) -> Vec<ResourceMetrics> {
        self.series
            .get(&resource_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp >= from && s.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn series_len(&self, resource_id: Uuid) -> usize {
        self.series.get(&resource_id).map(|s| s.len()).unwrap_or(0)
    }
}

/// Results from one collection cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionResults {
    pub polled: usize,
    pub failed: usize,
}

/// Periodically polls providers for utilization samples
pub struct MetricsCollector {
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    store: Arc<MetricsStore>,
    cache: Arc<ReadCache>,
    config: CollectorConfig,
    /// Fan-out to the alert evaluator
    samples_tx: mpsc::Sender<ResourceMetrics>,
    metrics: CoreMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl MetricsCollector {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        store: Arc<MetricsStore>,
        cache: Arc<ReadCache>,
        config: CollectorConfig,
    ) -> (Self, mpsc::Receiver<ResourceMetrics>) {
        let (samples_tx, samples_rx) = mpsc::channel(config.buffer_size);

        let collector = Self {
            providers,
            resources,
            store,
            cache,
            config,
            samples_tx,
            metrics: CoreMetrics::new(),
            logger: StructuredLogger::new("collector"),
            health: None,
        };

        (collector, samples_rx)
    }

    /// Report liveness to a health registry after every cycle
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    /// Run the collection loop until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting metrics collection loop"
        );

        let mut ticker = interval(self.current_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let results = self.collect_all().await;
                    let elapsed = start.elapsed();

                    self.metrics.observe_collection_latency(elapsed.as_secs_f64());
                    self.logger.log_collection_cycle(
                        results.polled,
                        results.failed,
                        elapsed.as_millis() as u64,
                    );
                    self.check_in(results).await;

                    // Re-arm with fresh jitter to avoid synchronized polls
                    ticker = interval(self.current_interval());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics collection loop");
                    break;
                }
            }
        }
    }

    /// Poll every active resource once
    ///
    /// Each poll runs under its own timeout so a hung provider costs one
    /// sample, not the whole cycle.
    pub async fn collect_all(&self) -> CollectionResults {
        let resources = self.resources.list_active();
        self.metrics.set_resources_monitored(resources.len() as i64);

        let mut results = CollectionResults::default();

        for resource in resources {
            let provider = match self.providers.get(resource.provider) {
                Ok(provider) => provider,
                Err(e) => {
                    results.failed += 1;
                    self.metrics.inc_collection_errors();
                    warn!(resource_id = %resource.id, error = %e, "No provider for resource");
                    continue;
                }
            };

            match timeout(self.config.poll_timeout, provider.get_metrics(resource.id)).await {
                Ok(Ok(sample)) => {
                    results.polled += 1;
                    self.store.append(sample.clone());

                    if let Err(e) = self.samples_tx.send(sample).await {
                        warn!(error = %e, "Failed to send sample to evaluator");
                    }
                }
                Ok(Err(e)) => {
                    results.failed += 1;
                    self.metrics.inc_collection_errors();
                    debug!(
                        resource_id = %resource.id,
                        error = %e,
                        "Failed to collect metrics"
                    );
                }
                Err(_) => {
                    results.failed += 1;
                    self.metrics.inc_collection_errors();
                    debug!(
                        resource_id = %resource.id,
                        timeout_ms = self.config.poll_timeout.as_millis() as u64,
                        "Metrics poll timed out"
                    );
                }
            }
        }

        if results.polled > 0 {
            self.cache.invalidate(CacheCategory::Monitoring);
        }

        results
    }

    /// Refresh this worker's health entry from the latest cycle
    async fn check_in(&self, results: CollectionResults) {
        if let Some(health) = &self.health {
            if results.polled == 0 && results.failed > 0 {
                health
                    .set_degraded(components::COLLECTOR, "all provider polls failed")
                    .await;
            } else {
                health.set_healthy(components::COLLECTOR).await;
            }
        }
    }

    fn current_interval(&self) -> Duration {
        self.config.interval + Duration::from_millis(rand_jitter(self.config.jitter.as_millis() as u64))
    }
}

/// Generate a jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::cost::{self, CostEstimate};
    use crate::deployment::DeploymentAction;
    use crate::models::{
        CloudResource, ProviderKind, ResourceConfig, ResourceKind, ResourceStatus,
        ResourceSummary,
    };
    use crate::provider::{CloudProvider, DeployOutcome, DeployRequest, MockProvider};
    use async_trait::async_trait;
    use tokio::time::sleep;

    /// Provider whose metric reads hang longer than any test poll timeout
    struct SlowProvider;

    #[async_trait]
    impl CloudProvider for SlowProvider {
        async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, ProviderError> {
            Ok(DeployOutcome {
                resource_id: request.resource_id,
                status: ResourceStatus::Running,
                message: "applied".to_string(),
            })
        }

        async fn get_status(&self, _resource_id: Uuid) -> Result<ResourceStatus, ProviderError> {
            Ok(ResourceStatus::Running)
        }

        async fn get_metrics(&self, resource_id: Uuid) -> Result<ResourceMetrics, ProviderError> {
            sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Transient(format!("unreachable for {}", resource_id)))
        }

        fn estimate_cost(&self, kind: ResourceKind, config: &ResourceConfig) -> CostEstimate {
            cost::estimate(kind, config)
        }

        async fn list_resources(&self) -> Result<Vec<ResourceSummary>, ProviderError> {
            Ok(vec![])
        }

        async fn scale(
            &self,
            resource_id: Uuid,
            config: ResourceConfig,
        ) -> Result<DeployOutcome, ProviderError> {
            self.deploy(DeployRequest {
                resource_id,
                action: DeploymentAction::Update,
                config,
            })
            .await
        }
    }

    fn fast_config() -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_millis(10),
            jitter: Duration::ZERO,
            poll_timeout: Duration::from_millis(50),
            buffer_size: 64,
            max_series_len: 100,
        }
    }

    fn seed(
        registry: &ResourceRegistry,
        provider: &MockProvider,
        provider_kind: ProviderKind,
    ) -> Uuid {
        let resource = CloudResource::new(
            "user-1",
            "web-1",
            ResourceKind::Compute,
            provider_kind,
            ResourceConfig::new(2, 4, 50),
            "us-east-1",
        );
        let id = resource.id;
        provider.seed(id, "web-1", ResourceKind::Compute, resource.config.clone());
        registry.register(resource);
        id
    }

    #[tokio::test]
    async fn test_collect_all_stores_and_fans_out_samples() {
        let mock = Arc::new(MockProvider::new().with_latency(Duration::ZERO));
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderKind::Mock, mock.clone());

        let resources = Arc::new(ResourceRegistry::new());
        let resource_id = seed(&resources, &mock, ProviderKind::Mock);

        let store = Arc::new(MetricsStore::new(100));
        let (collector, mut rx) = MetricsCollector::new(
            Arc::new(providers),
            resources,
            store.clone(),
            Arc::new(ReadCache::new()),
            fast_config(),
        );

        let results = collector.collect_all().await;

        assert_eq!(results.polled, 1);
        assert_eq!(results.failed, 0);
        assert!(store.latest(resource_id).is_some());
        assert_eq!(rx.try_recv().unwrap().resource_id, resource_id);
    }

    #[tokio::test]
    async fn test_slow_provider_does_not_block_the_cycle() {
        let mock = Arc::new(MockProvider::new().with_latency(Duration::ZERO));
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderKind::Mock, mock.clone());
        providers.register(ProviderKind::Aws, Arc::new(SlowProvider));

        let resources = Arc::new(ResourceRegistry::new());
        let healthy_id = seed(&resources, &mock, ProviderKind::Mock);

        // Resource on a hung backend
        let slow = CloudResource::new(
            "user-1",
            "db-1",
            ResourceKind::ManagedDb,
            ProviderKind::Aws,
            ResourceConfig::new(4, 16, 200),
            "us-east-1",
        );
        resources.register(slow);

        let store = Arc::new(MetricsStore::new(100));
        let (collector, _rx) = MetricsCollector::new(
            Arc::new(providers),
            resources,
            store.clone(),
            Arc::new(ReadCache::new()),
            fast_config(),
        );

        let results = collector.collect_all().await;

        assert_eq!(results.polled, 1);
        assert_eq!(results.failed, 1);
        assert!(store.latest(healthy_id).is_some());
    }

    #[tokio::test]
    async fn test_stopped_resources_not_polled() {
        let mock = Arc::new(MockProvider::new().with_latency(Duration::ZERO));
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderKind::Mock, mock.clone());

        let resources = Arc::new(ResourceRegistry::new());
        let mut stopped = CloudResource::new(
            "user-1",
            "idle-1",
            ResourceKind::Compute,
            ProviderKind::Mock,
            ResourceConfig::new(1, 2, 20),
            "us-east-1",
        );
        stopped.status = ResourceStatus::Stopped;
        resources.register(stopped);

        let (collector, _rx) = MetricsCollector::new(
            Arc::new(providers),
            resources,
            Arc::new(MetricsStore::new(100)),
            Arc::new(ReadCache::new()),
            fast_config(),
        );

        let results = collector.collect_all().await;

        assert_eq!(results.polled, 0);
        assert_eq!(results.failed, 0);
    }

    #[tokio::test]
    async fn test_successful_cycle_invalidates_monitoring_cache() {
        let mock = Arc::new(MockProvider::new().with_latency(Duration::ZERO));
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderKind::Mock, mock.clone());

        let resources = Arc::new(ResourceRegistry::new());
        seed(&resources, &mock, ProviderKind::Mock);

        let cache = Arc::new(ReadCache::new());
        cache.set(
            CacheCategory::Monitoring,
            "monitoring:r1",
            serde_json::json!({"cpu": 10.0}),
        );

        let (collector, _rx) = MetricsCollector::new(
            Arc::new(providers),
            resources,
            Arc::new(MetricsStore::new(100)),
            cache.clone(),
            fast_config(),
        );

        collector.collect_all().await;

        assert_eq!(cache.get("monitoring:r1"), None);
    }

    #[test]
    fn test_store_ring_caps_series_length() {
        let store = MetricsStore::new(3);
        let resource_id = Uuid::new_v4();

        for i in 0..5 {
            store.append(ResourceMetrics {
                resource_id,
                timestamp: i,
                cpu_percent: i as f32,
                ram_percent: 0.0,
                storage_percent: 0.0,
                network_rx_bytes: 0,
                network_tx_bytes: 0,
            });
        }

        assert_eq!(store.series_len(resource_id), 3);
        // Oldest samples evicted first
        assert_eq!(store.latest(resource_id).unwrap().timestamp, 4);
        assert_eq!(store.range(resource_id, 0, 10).first().unwrap().timestamp, 2);
    }

    #[test]
    fn test_store_range_bounds_inclusive() {
        let store = MetricsStore::new(10);
        let resource_id = Uuid::new_v4();

        for i in 0..5 {
            store.append(ResourceMetrics {
                resource_id,
                timestamp: i * 10,
                cpu_percent: 0.0,
                ram_percent: 0.0,
                storage_percent: 0.0,
                network_rx_bytes: 0,
                network_tx_bytes: 0,
            });
        }

        let window = store.range(resource_id, 10, 30);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp, 10);
        assert_eq!(window[2].timestamp, 30);
    }

    #[test]
    fn test_rand_jitter_bounds() {
        assert!(rand_jitter(1000) < 1000);
        assert_eq!(rand_jitter(0), 0);
    }

    #[tokio::test]
    async fn test_run_checks_in_with_health_registry() {
        use crate::health::{ComponentHealth, ComponentStatus};

        let health = HealthRegistry::new().with_stale_after(Duration::from_secs(60));
        health.register_worker(components::COLLECTOR).await;
        // Pre-age the entry; only a fresh check-in keeps it healthy
        health
            .update(
                components::COLLECTOR,
                ComponentHealth {
                    status: ComponentStatus::Healthy,
                    message: None,
                    last_check_timestamp: chrono::Utc::now().timestamp() - 300,
                },
            )
            .await;

        let providers = ProviderRegistry::new();
        let (collector, _rx) = MetricsCollector::new(
            Arc::new(providers),
            Arc::new(ResourceRegistry::new()),
            Arc::new(MetricsStore::new(10)),
            Arc::new(ReadCache::new()),
            fast_config(),
        );
        let collector = collector.with_health(health.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(collector.run(shutdown_rx));

        sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let snapshot = health.health().await;
        assert_eq!(snapshot.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let providers = ProviderRegistry::new();
        let (collector, _rx) = MetricsCollector::new(
            Arc::new(providers),
            Arc::new(ResourceRegistry::new()),
            Arc::new(MetricsStore::new(10)),
            Arc::new(ReadCache::new()),
            fast_config(),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(collector.run(shutdown_rx));

        sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("collector did not stop")
            .unwrap();
    }
}
