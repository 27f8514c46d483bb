//! Configuration for the node agent.

use std::time::Duration;

use anyhow::Result;

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique name for this node; set once at registration, never renamed.
    pub node_name: String,

    /// Control plane API URL.
    pub cluster_url: String,

    /// Lease duration in seconds; the renewal cadence is a quarter of this.
    pub lease_duration_seconds: u32,

    /// Interval between node status reports in seconds.
    pub status_report_interval_secs: u64,

    /// How long a workload stays Running before it is marked Succeeded.
    pub dwell_secs: u64,

    /// How long to wait for the workload cache to synchronize at startup.
    pub sync_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let node_name =
            std::env::var("NODELET_NODE_NAME").unwrap_or_else(|_| "nodelet-node".to_string());

        let cluster_url = std::env::var("NODELET_CLUSTER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let lease_duration_seconds = std::env::var("NODELET_LEASE_DURATION_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(40);

        let status_report_interval_secs = std::env::var("NODELET_STATUS_REPORT_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let dwell_secs = std::env::var("NODELET_DWELL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let sync_timeout_secs = std::env::var("NODELET_SYNC_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let log_level = std::env::var("NODELET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            node_name,
            cluster_url,
            lease_duration_seconds,
            status_report_interval_secs,
            dwell_secs,
            sync_timeout_secs,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            anyhow::bail!("node name must not be empty");
        }
        if self.lease_duration_seconds == 0 {
            anyhow::bail!("lease duration must be positive");
        }
        Ok(())
    }

    pub fn status_report_interval(&self) -> Duration {
        Duration::from_secs(self.status_report_interval_secs)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "nodelet-node".to_string(),
            cluster_url: "http://127.0.0.1:8080".to_string(),
            lease_duration_seconds: 40,
            status_report_interval_secs: 300,
            dwell_secs: 60,
            sync_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_duration_seconds, 40);
        assert_eq!(config.status_report_interval(), Duration::from_secs(300));
        assert_eq!(config.dwell(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_lease_duration_rejected() {
        let config = Config {
            lease_duration_seconds: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_node_name_rejected() {
        let config = Config {
            node_name: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
