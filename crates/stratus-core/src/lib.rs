//! Core library for cloud deployment orchestration
//!
//! This crate provides the core functionality for:
//! - Provider-agnostic deployment execution with retry and rollback
//! - Cost estimation from resource configurations
//! - Periodic metrics collection and threshold alerting
//! - Cached read views with category invalidation
//! - Health checks and observability

pub mod alerts;
pub mod cache;
pub mod collector;
pub mod cost;
pub mod deployment;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod provider;
pub mod service;

pub use error::{ErrorCategory, OrchestratorError, ProviderError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CoreMetrics, StructuredLogger};
pub use service::{OrchestrationService, ServiceBuilder, ServiceHandles};
