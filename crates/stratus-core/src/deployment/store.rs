//! Concurrent stores for resources and deployment history
//!
//! Both stores support concurrent readers with a single writer per key at a
//! time (sharded locking via DashMap). Deployments are archived in place,
//! never deleted; resource status is only writable from within the crate so
//! read paths cannot mutate it.

use super::{Deployment, DeploymentAction, DeploymentState, FailureReport};
use crate::error::OrchestratorError;
use crate::models::{CloudResource, ResourceConfig, ResourceStatus};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Registry of provisioned resources
pub struct ResourceRegistry {
    resources: DashMap<Uuid, CloudResource>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    pub fn register(&self, resource: CloudResource) {
        debug!(resource_id = %resource.id, name = %resource.name, "Registering resource");
        self.resources.insert(resource.id, resource);
    }

    pub fn get(&self, id: Uuid) -> Option<CloudResource> {
        self.resources.get(&id).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<CloudResource> {
        self.resources.iter().map(|r| r.value().clone()).collect()
    }

    /// Resources eligible for metrics collection
    pub fn list_active(&self) -> Vec<CloudResource> {
        self.resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Running)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Deployment-driven status update; not reachable from read paths
    pub(crate) fn set_status(&self, id: Uuid, status: ResourceStatus) {
        if let Some(mut resource) = self.resources.get_mut(&id) {
            resource.status = status;
        }
    }

    /// Deployment-driven config update after a successful apply
    pub(crate) fn set_config(&self, id: Uuid, config: ResourceConfig) {
        if let Some(mut resource) = self.resources.get_mut(&id) {
            resource.config = config;
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Filter for deployment listings
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub resource_id: Option<Uuid>,
    pub state: Option<DeploymentState>,
    pub action: Option<DeploymentAction>,
}

impl DeploymentFilter {
    fn matches(&self, deployment: &Deployment) -> bool {
        self.resource_id
            .map_or(true, |id| deployment.resource_id == id)
            && self.state.map_or(true, |state| deployment.state() == state)
            && self
                .action
                .map_or(true, |action| deployment.action == action)
    }

    /// Parameter list for deterministic cache keys
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(id) = self.resource_id {
            params.push(("resource", id.to_string()));
        }
        if let Some(state) = self.state {
            params.push(("state", state.to_string()));
        }
        if let Some(action) = self.action {
            params.push(("action", action.to_string()));
        }
        params
    }
}

/// Append-only store of deployment history
pub struct DeploymentLog {
    deployments: DashMap<Uuid, Deployment>,
}

impl Default for DeploymentLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentLog {
    pub fn new() -> Self {
        Self {
            deployments: DashMap::new(),
        }
    }

    pub fn insert(&self, deployment: Deployment) -> Uuid {
        let id = deployment.id;
        self.deployments.insert(id, deployment);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Deployment> {
        self.deployments.get(&id).map(|d| d.clone())
    }

    /// The resource's deployment in a non-terminal state, if any
    ///
    /// At most one exists at a time; the orchestrator's per-resource lock
    /// keeps it that way under parallel submission.
    pub fn active_for_resource(&self, resource_id: Uuid) -> Option<Uuid> {
        self.deployments
            .iter()
            .find(|d| d.resource_id == resource_id && !d.is_terminal())
            .map(|d| d.id)
    }

    /// Append a transition to a deployment's log
    pub fn apply_transition(
        &self,
        id: Uuid,
        to: DeploymentState,
        reason: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let mut deployment = self
            .deployments
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::not_found("deployment", id))?;

        deployment
            .transition(to, reason)
            .map_err(|e| OrchestratorError::Validation(e.to_string()))
    }

    pub fn record_failure(&self, id: Uuid, report: FailureReport) {
        if let Some(mut deployment) = self.deployments.get_mut(&id) {
            deployment.failure = Some(report);
        }
    }

    pub fn stamp_completed(&self, id: Uuid) {
        if let Some(mut deployment) = self.deployments.get_mut(&id) {
            deployment.completed_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// Filtered listing, oldest first
    pub fn list(&self, filter: &DeploymentFilter) -> Vec<Deployment> {
        let mut matched: Vec<Deployment> = self
            .deployments
            .iter()
            .filter(|d| filter.matches(d))
            .map(|d| d.clone())
            .collect();
        matched.sort_by_key(|d| (d.started_at, d.id));
        matched
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderKind, ResourceKind};

    fn test_resource() -> CloudResource {
        CloudResource::new(
            "user-1",
            "web-1",
            ResourceKind::Compute,
            ProviderKind::Mock,
            ResourceConfig::new(2, 4, 50),
            "us-east-1",
        )
    }

    fn test_deployment(resource_id: Uuid) -> Deployment {
        Deployment::new(
            resource_id,
            "user-1",
            DeploymentAction::Restart,
            ResourceConfig::new(2, 4, 50),
            ResourceConfig::new(2, 4, 50),
        )
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = ResourceRegistry::new();
        let resource = test_resource();
        let id = resource.id;

        registry.register(resource);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().name, "web-1");
    }

    #[test]
    fn test_list_active_excludes_stopped() {
        let registry = ResourceRegistry::new();
        let running = test_resource();
        let mut stopped = test_resource();
        stopped.status = ResourceStatus::Stopped;

        registry.register(running.clone());
        registry.register(stopped);

        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }

    #[test]
    fn test_active_for_resource() {
        let log = DeploymentLog::new();
        let resource_id = Uuid::new_v4();
        let deployment = test_deployment(resource_id);
        let id = log.insert(deployment);

        assert_eq!(log.active_for_resource(resource_id), Some(id));
        assert_eq!(log.active_for_resource(Uuid::new_v4()), None);

        log.apply_transition(id, DeploymentState::InProgress, "dispatched")
            .unwrap();
        assert_eq!(log.active_for_resource(resource_id), Some(id));

        log.apply_transition(id, DeploymentState::Successful, "done")
            .unwrap();
        assert_eq!(log.active_for_resource(resource_id), None);
    }

    #[test]
    fn test_apply_transition_unknown_deployment() {
        let log = DeploymentLog::new();
        let err = log
            .apply_transition(Uuid::new_v4(), DeploymentState::InProgress, "d")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[test]
    fn test_list_with_filter() {
        let log = DeploymentLog::new();
        let resource_a = Uuid::new_v4();
        let resource_b = Uuid::new_v4();

        let first = log.insert(test_deployment(resource_a));
        log.insert(test_deployment(resource_b));

        log.apply_transition(first, DeploymentState::InProgress, "d")
            .unwrap();
        log.apply_transition(first, DeploymentState::Failed, "provider error")
            .unwrap();

        let all = log.list(&DeploymentFilter::default());
        assert_eq!(all.len(), 2);

        let failed = log.list(&DeploymentFilter {
            state: Some(DeploymentState::Failed),
            ..Default::default()
        });
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, first);

        let by_resource = log.list(&DeploymentFilter {
            resource_id: Some(resource_b),
            ..Default::default()
        });
        assert_eq!(by_resource.len(), 1);
    }

    #[test]
    fn test_filter_cache_params_deterministic() {
        let filter = DeploymentFilter {
            resource_id: Some(Uuid::nil()),
            state: Some(DeploymentState::Failed),
            action: None,
        };

        assert_eq!(filter.cache_params(), filter.cache_params());
    }
}
