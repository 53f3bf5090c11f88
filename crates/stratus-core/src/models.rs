//! Core data models for the orchestration core

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of provisioned infrastructure unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Compute,
    ObjectStorage,
    ManagedDb,
    Function,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Compute => write!(f, "compute"),
            ResourceKind::ObjectStorage => write!(f, "object-storage"),
            ResourceKind::ManagedDb => write!(f, "managed-db"),
            ResourceKind::Function => write!(f, "function"),
        }
    }
}

/// Provider backend selected by a resource's tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Mock,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Aws => write!(f, "aws"),
            ProviderKind::Mock => write!(f, "mock"),
        }
    }
}

/// Lifecycle status of a resource, authoritative at the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Running,
    Stopped,
    Terminated,
    Error,
}

impl ResourceStatus {
    /// Terminated resources accept no further deployments
    pub fn is_final(&self) -> bool {
        matches!(self, ResourceStatus::Terminated)
    }
}

/// Capacity descriptors for a resource
///
/// Extras use an ordered map so the canonical JSON form, and therefore the
/// fingerprint, is stable across recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Virtual CPU cores
    pub cpu_cores: u32,
    /// Memory in gigabytes
    pub ram_gb: u32,
    /// Attached storage in gigabytes
    pub storage_gb: u64,
    /// Pricing region hint; defaulted when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Provider-specific settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl ResourceConfig {
    pub fn new(cpu_cores: u32, ram_gb: u32, storage_gb: u64) -> Self {
        Self {
            cpu_cores,
            ram_gb,
            storage_gb,
            region: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// SHA-256 hex digest of the canonical JSON form
    ///
    /// Identical configs always produce identical fingerprints, which keys
    /// the cost-estimate cache.
    pub fn fingerprint(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("ResourceConfig serialization cannot fail");
        let digest = Sha256::digest(&canonical);
        hex::encode(digest)
    }

    /// Number of optional fields the estimator had to default
    pub fn defaulted_fields(&self) -> u32 {
        let mut count = 0;
        if self.region.is_none() {
            count += 1;
        }
        if self.extras.is_empty() {
            count += 1;
        }
        count
    }
}

/// A provisioned infrastructure unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: Uuid,
    /// Owning user; attached by the caller, never interpreted here
    pub owner: String,
    pub name: String,
    pub kind: ResourceKind,
    pub provider: ProviderKind,
    pub status: ResourceStatus,
    pub config: ResourceConfig,
    pub region: String,
    pub created_at: i64,
}

impl CloudResource {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        kind: ResourceKind,
        provider: ProviderKind,
        config: ResourceConfig,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            name: name.into(),
            kind,
            provider,
            status: ResourceStatus::Running,
            config,
            region: region.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Compact listing row returned by providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
}

/// Point-in-time utilization sample for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub resource_id: Uuid,
    pub timestamp: i64,
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub storage_percent: f32,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Metric a threshold alert is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMetric {
    Cpu,
    Ram,
    Storage,
    Network,
}

impl AlertMetric {
    /// Extract the relevant field from a sample
    ///
    /// Network alerts fire on combined rx+tx bytes for the sample.
    pub fn value_of(&self, sample: &ResourceMetrics) -> f64 {
        match self {
            AlertMetric::Cpu => sample.cpu_percent as f64,
            AlertMetric::Ram => sample.ram_percent as f64,
            AlertMetric::Storage => sample.storage_percent as f64,
            AlertMetric::Network => (sample.network_rx_bytes + sample.network_tx_bytes) as f64,
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertMetric::Cpu => write!(f, "cpu"),
            AlertMetric::Ram => write!(f, "ram"),
            AlertMetric::Storage => write!(f, "storage"),
            AlertMetric::Network => write!(f, "network"),
        }
    }
}

/// User-defined threshold alert
///
/// Active iff `triggered_at` is set; activation and clearing are driven
/// solely by the evaluator comparing the latest matching sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub metric: AlertMetric,
    pub threshold: f64,
    pub triggered_at: Option<i64>,
}

impl Alert {
    pub fn new(resource_id: Uuid, metric: AlertMetric, threshold: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            metric,
            threshold,
            triggered_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.triggered_at.is_some()
    }
}
