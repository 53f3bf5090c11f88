//! Error taxonomy for the orchestration core
//!
//! Errors are classified so the orchestrator can decide policy without
//! inspecting message strings: validation and conflict errors surface to the
//! caller unchanged, transient provider errors are retried with backoff, and
//! fatal provider errors trigger the rollback path. A cache miss is not an
//! error anywhere in this crate; read paths signal it with `Option`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse error classification carried on failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Transient,
    Fatal,
    NotFound,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::NotFound => write!(f, "not_found"),
        }
    }
}

/// Errors returned by provider backends
///
/// Every provider implementation maps its native failures onto this enum so
/// the orchestrator never special-cases a backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level or timeout failure; safe to retry
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Explicit rejection by the backend; retrying will not help
    #[error("provider rejected request: {0}")]
    Fatal(String),

    /// An identical request is already in flight for this resource
    #[error("request already in flight for resource {0}")]
    Conflict(Uuid),

    /// The backend has no record of the resource
    #[error("resource {0} unknown to provider")]
    NotFound(Uuid),
}

impl ProviderError {
    /// Returns true if the orchestrator may retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Transient(_) => ErrorCategory::Transient,
            ProviderError::Fatal(_) => ErrorCategory::Fatal,
            ProviderError::Conflict(_) => ErrorCategory::Conflict,
            ProviderError::NotFound(_) => ErrorCategory::NotFound,
        }
    }
}

/// Errors surfaced by the orchestration core to its callers
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed request; never retried, never rolled back
    #[error("validation failed: {0}")]
    Validation(String),

    /// The resource already has a deployment in a non-terminal state
    #[error("resource {0} already has a deployment in flight")]
    Conflict(Uuid),

    /// Provider failure that exhausted the retry budget
    #[error("transient provider failure: {0}")]
    ProviderTransient(String),

    /// Provider failure that cannot be retried
    #[error("provider rejected request: {0}")]
    ProviderFatal(String),

    /// A referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
}

impl OrchestratorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Validation(_) => ErrorCategory::Validation,
            OrchestratorError::Conflict(_) => ErrorCategory::Conflict,
            OrchestratorError::ProviderTransient(_) => ErrorCategory::Transient,
            OrchestratorError::ProviderFatal(_) => ErrorCategory::Fatal,
            OrchestratorError::NotFound { .. } => ErrorCategory::NotFound,
        }
    }

    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        OrchestratorError::NotFound { kind, id }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => OrchestratorError::ProviderTransient(msg),
            ProviderError::Fatal(msg) => OrchestratorError::ProviderFatal(msg),
            ProviderError::Conflict(id) => OrchestratorError::Conflict(id),
            ProviderError::NotFound(id) => OrchestratorError::not_found("resource", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient("connection reset".into()).is_transient());
        assert!(!ProviderError::Fatal("invalid AMI".into()).is_transient());
        assert!(!ProviderError::Conflict(Uuid::new_v4()).is_transient());
    }

    #[test]
    fn test_provider_error_conversion() {
        let id = Uuid::new_v4();

        let err: OrchestratorError = ProviderError::Conflict(id).into();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err: OrchestratorError = ProviderError::Transient("timeout".into()).into();
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err: OrchestratorError = ProviderError::NotFound(id).into();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Fatal.to_string(), "fatal");
    }
}
