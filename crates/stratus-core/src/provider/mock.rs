//! Simulation backend
//!
//! In-memory provider used for demos and tests. Tracks simulated resource
//! state, enforces one in-flight deploy per resource, and supports scripted
//! failure injection so retry and rollback paths can be exercised without a
//! real cloud behind them.

use super::{CloudProvider, DeployOutcome, DeployRequest};
use crate::cost::{self, CostEstimate};
use crate::deployment::DeploymentAction;
use crate::error::ProviderError;
use crate::models::{
    ResourceConfig, ResourceKind, ResourceMetrics, ResourceStatus, ResourceSummary,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

/// Scripted failure consumed by the next deploy or scale call
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    Transient(String),
    Fatal(String),
}

impl InjectedFailure {
    fn into_error(self) -> ProviderError {
        match self {
            InjectedFailure::Transient(msg) => ProviderError::Transient(msg),
            InjectedFailure::Fatal(msg) => ProviderError::Fatal(msg),
        }
    }
}

#[derive(Debug, Clone)]
struct SimulatedResource {
    name: String,
    kind: ResourceKind,
    status: ResourceStatus,
    config: ResourceConfig,
    /// Fixed sample returned instead of synthesized load, when set
    metrics_override: Option<ResourceMetrics>,
}

/// In-memory simulation of a cloud backend
pub struct MockProvider {
    resources: DashMap<Uuid, SimulatedResource>,
    /// Resources with a deploy currently applying; duplicates conflict
    in_flight: DashMap<Uuid, ()>,
    fail_next: Mutex<VecDeque<InjectedFailure>>,
    latency: Duration,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            in_flight: DashMap::new(),
            fail_next: Mutex::new(VecDeque::new()),
            latency: Duration::from_millis(10),
        }
    }

    /// Set simulated provisioning latency (zero for tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Register a simulated resource
    pub fn seed(
        &self,
        id: Uuid,
        name: impl Into<String>,
        kind: ResourceKind,
        config: ResourceConfig,
    ) {
        self.resources.insert(
            id,
            SimulatedResource {
                name: name.into(),
                kind,
                status: ResourceStatus::Running,
                config,
                metrics_override: None,
            },
        );
    }

    /// Queue a failure for the next deploy or scale call
    pub fn inject_failure(&self, failure: InjectedFailure) {
        self.fail_next
            .lock()
            .expect("failure queue poisoned")
            .push_back(failure);
    }

    /// Force a simulated status, bypassing deployment flow (test hook)
    pub fn set_status(&self, id: Uuid, status: ResourceStatus) {
        if let Some(mut resource) = self.resources.get_mut(&id) {
            resource.status = status;
        }
    }

    /// Pin the sample returned by `get_metrics` for a resource
    pub fn set_metrics(&self, id: Uuid, sample: ResourceMetrics) {
        if let Some(mut resource) = self.resources.get_mut(&id) {
            resource.metrics_override = Some(sample);
        }
    }

    pub fn current_config(&self, id: Uuid) -> Option<ResourceConfig> {
        self.resources.get(&id).map(|r| r.config.clone())
    }

    fn pop_injected(&self) -> Option<InjectedFailure> {
        self.fail_next
            .lock()
            .expect("failure queue poisoned")
            .pop_front()
    }

    /// Takes the in-flight marker for a resource; `None` when already held
    fn mark_in_flight(&self, id: Uuid) -> Option<InFlightGuard<'_>> {
        if self.in_flight.insert(id, ()).is_some() {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            id,
        })
    }

    /// Synthesize a plausible utilization sample from the resource shape
    fn synthesize_sample(id: Uuid, resource: &SimulatedResource) -> ResourceMetrics {
        let now = chrono::Utc::now().timestamp();
        let phase = (now % 60) as f32 / 60.0;
        let load = 25.0 + 50.0 * phase;

        ResourceMetrics {
            resource_id: id,
            timestamp: now,
            cpu_percent: load.min(100.0),
            ram_percent: (load * 0.8).min(100.0),
            storage_percent: if resource.config.storage_gb > 0 {
                35.0
            } else {
                0.0
            },
            network_rx_bytes: (resource.config.cpu_cores as u64 + 1) * 10_000,
            network_tx_bytes: (resource.config.cpu_cores as u64 + 1) * 4_000,
        }
    }
}

/// Removes the in-flight marker on drop, including drop by cancellation
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<Uuid, ()>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, ProviderError> {
        if let Some(failure) = self.pop_injected() {
            return Err(failure.into_error());
        }

        let id = request.resource_id;
        if !self.resources.contains_key(&id) {
            return Err(ProviderError::NotFound(id));
        }

        // One in-flight deploy per resource; duplicates fail fast. The guard
        // clears the marker even when the caller abandons this future
        // mid-latency (a timed-out deploy is cancelled, not completed).
        let _in_flight = self
            .mark_in_flight(id)
            .ok_or(ProviderError::Conflict(id))?;

        sleep(self.latency).await;

        let result = match self.resources.get_mut(&id) {
            Some(mut resource) => {
                if resource.status.is_final() {
                    Err(ProviderError::Fatal(format!("resource {} is terminated", id)))
                } else {
                    match request.action {
                        DeploymentAction::Restart => {}
                        DeploymentAction::ScaleUp
                        | DeploymentAction::ScaleDown
                        | DeploymentAction::Update => {
                            resource.config = request.config.clone();
                        }
                    }
                    resource.status = ResourceStatus::Running;
                    debug!(resource_id = %id, action = ?request.action, "Simulated deploy applied");
                    Ok(DeployOutcome {
                        resource_id: id,
                        status: ResourceStatus::Running,
                        message: format!("{:?} applied", request.action),
                    })
                }
            }
            None => Err(ProviderError::NotFound(id)),
        };

        result
    }

    async fn get_status(&self, resource_id: Uuid) -> Result<ResourceStatus, ProviderError> {
        self.resources
            .get(&resource_id)
            .map(|r| r.status)
            .ok_or(ProviderError::NotFound(resource_id))
    }

    async fn get_metrics(&self, resource_id: Uuid) -> Result<ResourceMetrics, ProviderError> {
        let resource = self
            .resources
            .get(&resource_id)
            .ok_or(ProviderError::NotFound(resource_id))?;

        Ok(match &resource.metrics_override {
            Some(sample) => sample.clone(),
            None => Self::synthesize_sample(resource_id, &resource),
        })
    }

    fn estimate_cost(&self, kind: ResourceKind, config: &ResourceConfig) -> CostEstimate {
        cost::estimate(kind, config)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSummary>, ProviderError> {
        Ok(self
            .resources
            .iter()
            .map(|entry| ResourceSummary {
                id: *entry.key(),
                name: entry.name.clone(),
                kind: entry.kind,
                status: entry.status,
            })
            .collect())
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
