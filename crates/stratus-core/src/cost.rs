//! Cost estimation
//!
//! Pure computation from resource shape to a cost breakdown. No I/O, no
//! hidden state: for a fixed (kind, config) pair the rate fields are a pure
//! function of the inputs, so results are safely cacheable keyed by the
//! config fingerprint. Only `computed_at` varies between calls.

use crate::models::{ResourceConfig, ResourceKind};
use serde::{Deserialize, Serialize};

/// Hourly rate per virtual CPU core (USD)
const VCPU_HOURLY: f64 = 0.0416;

/// Hourly rate per gigabyte of memory (USD)
const RAM_GB_HOURLY: f64 = 0.0052;

/// Hourly rate per gigabyte of attached storage (USD), ~0.10/GB-month
const STORAGE_GB_HOURLY: f64 = 0.000_137;

/// Billing hours per month
const HOURS_PER_MONTH: f64 = 730.0;

/// Confidence penalty per defaulted optional config field
const CONFIDENCE_PENALTY: f32 = 0.15;

/// Per-category hourly cost breakdown (USD)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub compute: f64,
    pub storage: f64,
    pub network: f64,
    pub other: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.compute + self.storage + self.network + self.other
    }
}

/// Derived cost estimate for a (kind, config) pair
///
/// Never stored authoritatively; `config_fingerprint` identifies the inputs
/// it was computed for and `computed_at` drives cache expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub config_fingerprint: String,
    pub kind: ResourceKind,
    pub hourly_rate: f64,
    pub monthly_estimate: f64,
    pub currency: String,
    pub breakdown: CostBreakdown,
    /// Lower when more optional config fields were defaulted
    pub confidence: f32,
    pub computed_at: i64,
}

/// Multiplier applied to raw compute cost per resource kind
fn compute_multiplier(kind: ResourceKind) -> f64 {
    match kind {
        ResourceKind::Compute => 1.0,
        ResourceKind::ObjectStorage => 0.1,
        ResourceKind::ManagedDb => 1.6,
        ResourceKind::Function => 0.25,
    }
}

/// Flat hourly network allocation per resource kind (USD)
fn network_rate(kind: ResourceKind) -> f64 {
    match kind {
        ResourceKind::Compute => 0.004,
        ResourceKind::ObjectStorage => 0.009,
        ResourceKind::ManagedDb => 0.006,
        ResourceKind::Function => 0.002,
    }
}

/// Flat hourly base rate per resource kind (USD), billed as "other"
fn base_rate(kind: ResourceKind) -> f64 {
    match kind {
        ResourceKind::Compute => 0.008,
        ResourceKind::ObjectStorage => 0.001,
        ResourceKind::ManagedDb => 0.020,
        ResourceKind::Function => 0.0004,
    }
}

/// Estimate hourly and monthly cost for a resource shape
pub fn estimate(kind: ResourceKind, config: &ResourceConfig) -> CostEstimate {
    let compute = (config.cpu_cores as f64 * VCPU_HOURLY
        + config.ram_gb as f64 * RAM_GB_HOURLY)
        * compute_multiplier(kind);
    let storage = config.storage_gb as f64 * STORAGE_GB_HOURLY;

    let breakdown = CostBreakdown {
        compute,
        storage,
        network: network_rate(kind),
        other: base_rate(kind),
    };

    let hourly_rate = breakdown.total();
    let confidence =
        (1.0 - config.defaulted_fields() as f32 * CONFIDENCE_PENALTY).max(0.5);

    CostEstimate {
        config_fingerprint: config.fingerprint(),
        kind,
        hourly_rate,
        monthly_estimate: hourly_rate * HOURS_PER_MONTH,
        currency: "USD".to_string(),
        breakdown,
        confidence,
        computed_at: chrono::Utc::now().timestamp(),
    }
}
