//! Deployment execution engine
//!
//! Owns the deployment state machine: validates incoming requests, enforces
//! per-resource mutual exclusion, drives the provider call with bounded
//! retry/backoff and a hard timeout, and applies the single rollback attempt
//! after a non-validation failure. Deployments on different resources proceed
//! fully in parallel; the per-resource lock is held from admission until the
//! deployment settles, so a rollback can never race a newly submitted
//! deployment on the same resource.

use super::{
    Deployment, DeploymentAction, DeploymentLog, DeploymentState, FailureReport,
    ResourceRegistry, RollbackOutcome,
};
use crate::cache::{CacheCategory, ReadCache};
use crate::error::{ErrorCategory, OrchestratorError};
use crate::models::{CloudResource, ResourceConfig};
use crate::observability::{CoreMetrics, StructuredLogger};
use crate::provider::{CloudProvider, DeployRequest, ProviderRegistry};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

/// Retry and timeout policy for provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total deploy attempts for transient failures (including the first)
    pub max_attempts: u32,
    /// Base delay, doubled per attempt with jitter added
    pub base_backoff: Duration,
    /// Hard bound on a single provider deploy call
    pub deploy_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            deploy_timeout: Duration::from_secs(30),
        }
    }
}

/// A validated deployment command
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub resource_id: Uuid,
    pub action: DeploymentAction,
    pub config: ResourceConfig,
    /// Opaque user id from the authentication context
    pub user: String,
}

/// Admitted deployment plus the task driving it to a terminal state
#[derive(Debug)]
pub struct DeploymentHandle {
    pub deployment_id: Uuid,
    pub task: JoinHandle<()>,
}

impl DeploymentHandle {
    /// Wait until the deployment settles in a terminal state
    pub async fn settled(self) -> Uuid {
        let _ = self.task.await;
        self.deployment_id
    }
}

/// Drives deployments through their state machine
pub struct DeploymentOrchestrator {
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    log: Arc<DeploymentLog>,
    cache: Arc<ReadCache>,
    policy: RetryPolicy,
    /// Per-resource single-writer tokens; held across the whole execution
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    metrics: CoreMetrics,
    logger: StructuredLogger,
}

impl DeploymentOrchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        log: Arc<DeploymentLog>,
        cache: Arc<ReadCache>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            providers,
            resources,
            log,
            cache,
            policy,
            locks: DashMap::new(),
            metrics: CoreMetrics::new(),
            logger: StructuredLogger::new("orchestrator"),
        }
    }

    /// Admit a deployment and spawn its execution
    ///
    /// Returns `Conflict` when the resource already has a deployment in a
    /// non-terminal state; the first deployment is unaffected. The
    /// deployments cache category is invalidated before the id is returned,
    /// so a subsequent list cannot observe the pre-write cached view.
    pub async fn start(
        self: &Arc<Self>,
        request: DeploymentRequest,
    ) -> Result<DeploymentHandle, OrchestratorError> {
        let resource = self
            .resources
            .get(request.resource_id)
            .ok_or_else(|| OrchestratorError::not_found("resource", request.resource_id))?;

        self.validate(&resource, &request)?;
        let provider = self.providers.get(resource.provider)?;

        // Single-writer token per resource. try_lock means a second submission
        // is rejected, not queued.
        let lock = self.lock_for(request.resource_id);
        let guard = lock
            .try_lock_owned()
            .map_err(|_| OrchestratorError::Conflict(request.resource_id))?;

        // The lock table can be cold after a restart while the log still
        // holds a pending deployment; check both.
        if self.log.active_for_resource(request.resource_id).is_some() {
            return Err(OrchestratorError::Conflict(request.resource_id));
        }

        let deployment = Deployment::new(
            request.resource_id,
            request.user.clone(),
            request.action,
            request.config.clone(),
            resource.config.clone(),
        );
        let deployment_id = self.log.insert(deployment);
        self.cache.invalidate(CacheCategory::Deployments);

        info!(
            deployment_id = %deployment_id,
            resource_id = %request.resource_id,
            action = %request.action,
            "Deployment admitted"
        );

        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            orchestrator
                .execute(deployment_id, resource, request, provider, guard)
                .await;
        });

        Ok(DeploymentHandle {
            deployment_id,
            task,
        })
    }

    fn validate(
        &self,
        resource: &CloudResource,
        request: &DeploymentRequest,
    ) -> Result<(), OrchestratorError> {
        if resource.status.is_final() {
            return Err(OrchestratorError::Validation(format!(
                "resource {} is terminated and accepts no further deployments",
                resource.id
            )));
        }

        let config = &request.config;
        let requests_capacity =
            config.cpu_cores > 0 || config.ram_gb > 0 || config.storage_gb > 0;
        if !matches!(request.action, DeploymentAction::Restart) && !requests_capacity {
            return Err(OrchestratorError::Validation(
                "scale and update actions must request capacity".to_string(),
            ));
        }

        Ok(())
    }

    fn lock_for(&self, resource_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drive one deployment to a terminal state
    ///
    /// The guard keeps the resource's single-writer token held until the
    /// deployment settles, rollback included.
    async fn execute(
        self: Arc<Self>,
        deployment_id: Uuid,
        resource: CloudResource,
        request: DeploymentRequest,
        provider: Arc<dyn CloudProvider>,
        guard: OwnedMutexGuard<()>,
    ) {
        let _guard = guard;
        let started = chrono::Utc::now().timestamp();

        self.transition(deployment_id, DeploymentState::InProgress, "dispatched to provider");

        let attempt_result = self
            .deploy_with_retries(deployment_id, &request, provider.as_ref())
            .await;

        match attempt_result {
            Ok(message) => {
                self.refresh_resource(&resource, &request, provider.as_ref()).await;
                self.transition(deployment_id, DeploymentState::Successful, message);
                self.log.stamp_completed(deployment_id);
                self.cache.invalidate(CacheCategory::Deployments);
                self.metrics.inc_deployments_succeeded();
                self.logger.log_deployment_settled(
                    &deployment_id.to_string(),
                    &request.resource_id.to_string(),
                    &request.action.to_string(),
                    &DeploymentState::Successful.to_string(),
                    chrono::Utc::now().timestamp() - started,
                );
            }
            Err((category, message)) => {
                self.transition(deployment_id, DeploymentState::Failed, message.clone());
                self.metrics.inc_deployments_failed();

                let rollback = self
                    .maybe_roll_back(deployment_id, &resource, category, provider.as_ref())
                    .await;

                self.log.record_failure(
                    deployment_id,
                    FailureReport {
                        category,
                        message: message.clone(),
                        rollback,
                    },
                );
                self.log.stamp_completed(deployment_id);
                self.cache.invalidate(CacheCategory::Deployments);
                warn!(
                    deployment_id = %deployment_id,
                    category = %category,
                    error = %message,
                    "Deployment failed"
                );

                // Settled in either failed or rolled-back
                let settled_state = self
                    .log
                    .get(deployment_id)
                    .map(|d| d.state())
                    .unwrap_or(DeploymentState::Failed);
                self.logger.log_deployment_settled(
                    &deployment_id.to_string(),
                    &request.resource_id.to_string(),
                    &request.action.to_string(),
                    &settled_state.to_string(),
                    chrono::Utc::now().timestamp() - started,
                );
            }
        }
    }

    /// Call the provider, retrying transient failures up to the policy bound
    ///
    /// A timed-out call transitions to failed immediately; the outstanding
    /// call is abandoned rather than retried concurrently with a new attempt.
    async fn deploy_with_retries(
        &self,
        deployment_id: Uuid,
        request: &DeploymentRequest,
        provider: &dyn CloudProvider,
    ) -> Result<String, (ErrorCategory, String)> {
        let mut attempt = 1u32;

        loop {
            // Scale actions go through the dedicated capacity call
            let call = match request.action {
                DeploymentAction::ScaleUp | DeploymentAction::ScaleDown => {
                    provider.scale(request.resource_id, request.config.clone())
                }
                DeploymentAction::Restart | DeploymentAction::Update => {
                    provider.deploy(DeployRequest {
                        resource_id: request.resource_id,
                        action: request.action,
                        config: request.config.clone(),
                    })
                }
            };

            match timeout(self.policy.deploy_timeout, call).await {
                Ok(Ok(outcome)) => return Ok(outcome.message),
                Ok(Err(err)) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        deployment_id = %deployment_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider failure, retrying"
                    );
                    self.metrics.inc_deploy_retries();
                    sleep(delay).await;
                    attempt += 1;
                }
                Ok(Err(err)) => {
                    // Exhausted transient failures are reclassified as fatal
                    let (category, message) = if err.is_transient() {
                        (
                            ErrorCategory::Fatal,
                            format!("retries exhausted after {} attempts: {}", attempt, err),
                        )
                    } else {
                        (err.category(), err.to_string())
                    };
                    return Err((category, message));
                }
                Err(_) => {
                    return Err((
                        ErrorCategory::Transient,
                        format!(
                            "deploy timed out after {}ms",
                            self.policy.deploy_timeout.as_millis()
                        ),
                    ));
                }
            }
        }
    }

    /// Attempt the single rollback, when one applies
    ///
    /// Rollback is attempted at most once, only for non-validation failures
    /// with a saved snapshot. A failed rollback leaves the deployment in
    /// `failed`; it is never retried.
    async fn maybe_roll_back(
        &self,
        deployment_id: Uuid,
        resource: &CloudResource,
        category: ErrorCategory,
        provider: &dyn CloudProvider,
    ) -> Option<RollbackOutcome> {
        if category == ErrorCategory::Validation {
            return None;
        }

        let snapshot = self.log.get(deployment_id)?.rollback_config?;
        self.transition(
            deployment_id,
            DeploymentState::RollingBack,
            "reapplying previous configuration",
        );

        let call = provider.deploy(DeployRequest {
            resource_id: resource.id,
            action: DeploymentAction::Update,
            config: snapshot,
        });

        let outcome = match timeout(self.policy.deploy_timeout, call).await {
            Ok(Ok(_)) => {
                self.refresh_status(resource, provider).await;
                self.transition(
                    deployment_id,
                    DeploymentState::RolledBack,
                    "previous configuration restored",
                );
                self.metrics.inc_rollbacks();
                info!(deployment_id = %deployment_id, "Rollback applied");
                RollbackOutcome::Succeeded
            }
            Ok(Err(err)) => {
                let message = format!("rollback failed: {}", err);
                self.transition(deployment_id, DeploymentState::Failed, message.clone());
                warn!(deployment_id = %deployment_id, error = %err, "Rollback failed");
                RollbackOutcome::Failed(message)
            }
            Err(_) => {
                let message = "rollback timed out".to_string();
                self.transition(deployment_id, DeploymentState::Failed, message.clone());
                warn!(deployment_id = %deployment_id, "Rollback timed out");
                RollbackOutcome::Failed(message)
            }
        };

        Some(outcome)
    }

    /// Refresh the resource from the provider's authoritative state
    async fn refresh_resource(
        &self,
        resource: &CloudResource,
        request: &DeploymentRequest,
        provider: &dyn CloudProvider,
    ) {
        if !matches!(request.action, DeploymentAction::Restart) {
            self.resources.set_config(resource.id, request.config.clone());
        }
        self.refresh_status(resource, provider).await;
        self.cache.invalidate(CacheCategory::Resources);
    }

    async fn refresh_status(&self, resource: &CloudResource, provider: &dyn CloudProvider) {
        match provider.get_status(resource.id).await {
            Ok(status) => self.resources.set_status(resource.id, status),
            Err(err) => {
                warn!(
                    resource_id = %resource.id,
                    error = %err,
                    "Status refresh failed, keeping last known status"
                );
            }
        }
    }

    fn transition(&self, deployment_id: Uuid, to: DeploymentState, reason: impl Into<String>) {
        if let Err(err) = self.log.apply_transition(deployment_id, to, reason) {
            // The orchestrator is the only writer, so this indicates a bug
            warn!(deployment_id = %deployment_id, error = %err, "Transition rejected");
        }
    }

    /// Exponential backoff with time-derived jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.base_backoff * 2u32.saturating_pow(attempt - 1);
        base + Duration::from_millis(rand_jitter(
            (self.policy.base_backoff.as_millis() / 2).max(1) as u64,
        ))
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
