//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use stratus_core::collector::CollectorConfig;
use stratus_core::deployment::RetryPolicy;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Service name used in structured log events
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Metrics collection interval in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// Per-resource metrics poll timeout in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Total deploy attempts for transient provider failures
    #[serde(default = "default_max_deploy_attempts")]
    pub max_deploy_attempts: u32,

    /// Hard bound on a single provider deploy call in seconds
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    /// Seed the simulation backend with demo resources at startup
    #[serde(default = "default_seed_demo")]
    pub seed_demo: bool,
}

fn default_service_name() -> String {
    std::env::var("SERVICE_NAME").unwrap_or_else(|_| "stratusd".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_collection_interval() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_max_deploy_attempts() -> u32 {
    3
}

fn default_deploy_timeout() -> u64 {
    30
}

fn default_seed_demo() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            api_port: default_api_port(),
            collection_interval_secs: default_collection_interval(),
            poll_timeout_secs: default_poll_timeout(),
            max_deploy_attempts: default_max_deploy_attempts(),
            deploy_timeout_secs: default_deploy_timeout(),
            seed_demo: default_seed_demo(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("STRATUS"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_deploy_attempts,
            deploy_timeout: Duration::from_secs(self.deploy_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.collection_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            ..CollectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.collection_interval_secs, 30);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(
            config.collector_config().poll_timeout,
            Duration::from_secs(5)
        );
    }
}
