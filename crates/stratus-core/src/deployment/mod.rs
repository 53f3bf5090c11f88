//! Deployment life cycle and state machine
//!
//! A deployment is one lifecycle operation against a resource, tracked
//! through a closed state machine:
//!
//! ```text
//! pending -> in-progress -> { successful, failed }
//! failed -> rolling-back -> { rolled-back, failed }
//! ```
//!
//! The transition log is append-only and is the source of truth; the current
//! status is a projection of the log's last entry. Illegal edges are rejected
//! at construction time, so a persisted deployment can never hold an
//! out-of-order history.

mod orchestrator;
mod store;

pub use orchestrator::{
    DeploymentHandle, DeploymentOrchestrator, DeploymentRequest, RetryPolicy,
};
pub use store::{DeploymentFilter, DeploymentLog, ResourceRegistry};

use crate::error::ErrorCategory;
use crate::models::ResourceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle operation requested against a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentAction {
    Restart,
    ScaleUp,
    ScaleDown,
    Update,
}

impl std::fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentAction::Restart => write!(f, "restart"),
            DeploymentAction::ScaleUp => write!(f, "scale-up"),
            DeploymentAction::ScaleDown => write!(f, "scale-down"),
            DeploymentAction::Update => write!(f, "update"),
        }
    }
}

/// State of a deployment, derived from its transition log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentState {
    Pending,
    InProgress,
    Successful,
    Failed,
    RollingBack,
    RolledBack,
}

impl DeploymentState {
    /// Terminal states never transition again
    ///
    /// `failed` counts as terminal for mutual exclusion: a rollback, when one
    /// happens, runs inside the same execution that produced the failure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Successful | DeploymentState::Failed | DeploymentState::RolledBack
        )
    }

    /// Legal edges of the state machine
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Successful)
                | (InProgress, Failed)
                | (Failed, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentState::Pending => write!(f, "pending"),
            DeploymentState::InProgress => write!(f, "in-progress"),
            DeploymentState::Successful => write!(f, "successful"),
            DeploymentState::Failed => write!(f, "failed"),
            DeploymentState::RollingBack => write!(f, "rolling-back"),
            DeploymentState::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// Attempted edge not present in the state machine
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal deployment transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
}

/// One entry of the append-only transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub timestamp: i64,
    pub reason: String,
}

/// Outcome of the single rollback attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum RollbackOutcome {
    Succeeded,
    Failed(String),
}

/// User-visible failure report for failed and rolled-back deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub category: ErrorCategory,
    pub message: String,
    /// Present when a rollback was attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
}

/// One lifecycle operation against a resource
///
/// Created when a user issues an action, mutated only by the orchestrator,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub resource_id: Uuid,
    /// Opaque user id attached by the caller
    pub requested_by: String,
    pub action: DeploymentAction,
    /// Configuration the action asked for
    pub requested_config: ResourceConfig,
    /// Snapshot taken at creation, used for rollback
    pub previous_config: ResourceConfig,
    /// Rollback target; absent means a failure settles without rollback
    pub rollback_config: Option<ResourceConfig>,
    pub transitions: Vec<TransitionRecord>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl Deployment {
    /// Create a deployment in `pending`, snapshotting the current config
    pub fn new(
        resource_id: Uuid,
        requested_by: impl Into<String>,
        action: DeploymentAction,
        requested_config: ResourceConfig,
        previous_config: ResourceConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            requested_by: requested_by.into(),
            action,
            requested_config,
            rollback_config: Some(previous_config.clone()),
            previous_config,
            transitions: Vec::new(),
            started_at: chrono::Utc::now().timestamp(),
            completed_at: None,
            failure: None,
        }
    }

    /// Current state, projected from the last log entry
    pub fn state(&self) -> DeploymentState {
        self.transitions
            .last()
            .map(|record| record.to)
            .unwrap_or(DeploymentState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Append a transition, rejecting edges outside the state machine
    pub fn transition(
        &mut self,
        to: DeploymentState,
        reason: impl Into<String>,
    ) -> Result<(), IllegalTransition> {
        let from = self.state();
        if !from.can_transition_to(to) {
            return Err(IllegalTransition { from, to });
        }

        self.transitions.push(TransitionRecord {
            from,
            to,
            timestamp: chrono::Utc::now().timestamp(),
            reason: reason.into(),
        });
        Ok(())
    }
}
