//! Provider contract and backend dispatch
//!
//! Defines the capability set every cloud backend must expose so the
//! orchestrator stays backend-agnostic. Implementations map their native
//! failures onto the shared [`ProviderError`] taxonomy and are selected at
//! dispatch time by the provider tag on the resource.

mod mock;

pub use mock::{InjectedFailure, MockProvider};

use crate::cost::CostEstimate;
use crate::deployment::DeploymentAction;
use crate::error::{OrchestratorError, ProviderError};
use crate::models::{ProviderKind, ResourceConfig, ResourceKind, ResourceMetrics, ResourceStatus, ResourceSummary};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub use async_trait::async_trait;

/// A lifecycle operation submitted to a backend
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub resource_id: Uuid,
    pub action: DeploymentAction,
    pub config: ResourceConfig,
}

/// Backend-reported completion of a deploy or scale call
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub resource_id: Uuid,
    /// Status the backend settled on; callers refresh from `get_status`
    /// rather than assuming this is still current
    pub status: ResourceStatus,
    pub message: String,
}

/// Capability set every cloud backend must implement
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Apply a lifecycle operation
    ///
    /// Idempotent from the caller's perspective: re-submitting while an
    /// identical request is in flight for the same resource fails fast with
    /// [`ProviderError::Conflict`] instead of double-applying.
    async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, ProviderError>;

    /// Read-only status query; must not mutate resource state
    async fn get_status(&self, resource_id: Uuid) -> Result<ResourceStatus, ProviderError>;

    /// Read-only utilization snapshot
    async fn get_metrics(&self, resource_id: Uuid) -> Result<ResourceMetrics, ProviderError>;

    /// Pure cost computation; no I/O side effects
    fn estimate_cost(&self, kind: ResourceKind, config: &ResourceConfig) -> CostEstimate;

    /// Enumerate resources known to this backend
    async fn list_resources(&self) -> Result<Vec<ResourceSummary>, ProviderError>;

    /// Apply a new capacity configuration
    async fn scale(
        &self,
        resource_id: Uuid,
        config: ResourceConfig,
    ) -> Result<DeployOutcome, ProviderError>;
}

/// Maps provider tags to backend implementations
///
/// Adding a provider is a registration call; the orchestrator never changes.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn CloudProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn CloudProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Look up the backend for a provider tag
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CloudProvider>, OrchestratorError> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            OrchestratorError::Validation(format!("no provider registered for '{}'", kind))
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
