//! Time-boxed read cache with pattern invalidation
//!
//! Sits in front of all read-heavy dashboard queries. Each entry carries the
//! category it was produced under; a write to a category invalidates every
//! entry tagged with it in one call, so writers never enumerate derived keys.
//! TTL is a property of the category, not the individual call, and expiry is
//! enforced at read time rather than only by background sweep.

use crate::observability::CoreMetrics;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Logical grouping of cached reads that invalidate together
///
/// Adding a cached endpoint means picking (or adding) one row here; both the
/// read path and the write path consult the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Resource inventory; changes rarely
    Resources,
    /// Deployment lists and detail views
    Deployments,
    /// Live utilization views; fast-changing
    Monitoring,
    /// Alert lists
    Alerts,
    /// Cost estimates and billing summaries
    Billing,
}

impl CacheCategory {
    /// TTL applied to every entry in this category
    pub fn ttl(&self) -> Duration {
        match self {
            CacheCategory::Resources => Duration::from_secs(300),
            CacheCategory::Deployments => Duration::from_secs(60),
            CacheCategory::Monitoring => Duration::from_secs(15),
            CacheCategory::Alerts => Duration::from_secs(30),
            CacheCategory::Billing => Duration::from_secs(600),
        }
    }

    /// Invalidation tag; also the key prefix for entries in this category
    pub fn tag(&self) -> &'static str {
        match self {
            CacheCategory::Resources => "resources",
            CacheCategory::Deployments => "deployments",
            CacheCategory::Monitoring => "monitoring",
            CacheCategory::Alerts => "alerts",
            CacheCategory::Billing => "billing",
        }
    }
}

/// Derive a deterministic cache key from an endpoint and its parameters
pub fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
    let mut key = String::from(endpoint);
    for (name, value) in params {
        key.push(':');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

struct CacheEntry {
    value: Value,
    category: CacheCategory,
    expires_at: Instant,
}

/// Short-TTL cache for derived read views
pub struct ReadCache {
    entries: DashMap<String, CacheEntry>,
    metrics: CoreMetrics,
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            metrics: CoreMetrics::new(),
        }
    }

    /// Look up a key, evicting it if expired
    ///
    /// A hit is never returned past its expiry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                self.metrics.inc_cache_hits();
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        self.metrics.inc_cache_misses();
        None
    }

    /// Typed lookup; treats undecodable payloads as a miss
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Store a value under a category; TTL comes from the policy table
    pub fn set(&self, category: CacheCategory, key: impl Into<String>, value: Value) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                category,
                expires_at: Instant::now() + category.ttl(),
            },
        );
    }

    /// Serialize and store a typed value
    pub fn set_as<T: Serialize>(&self, category: CacheCategory, key: impl Into<String>, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.set(category, key, json);
        }
    }

    /// Remove a single entry
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry tagged with the category; returns the count removed
    pub fn invalidate(&self, category: CacheCategory) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.category != category);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(category = category.tag(), removed, "Cache category invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
