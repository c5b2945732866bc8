//! Scanner configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Configuration for one scanned directory.
///
/// Durations are expressed in milliseconds so the TOML surface stays flat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Auto-deploy zipped archives dropped into the directory.
    pub auto_deploy_zipped: bool,
    /// Auto-deploy exploded (directory-shaped) deployments.
    pub auto_deploy_exploded: bool,
    /// Auto-deploy XML descriptor deployments.
    pub auto_deploy_xml: bool,
    /// Interval between scheduled scans.
    pub scan_interval_ms: u64,
    /// How long one composite submission may take before it is failed.
    pub deployment_timeout_ms: u64,
    /// How long an incomplete archive may sit without growing before its
    /// `.pending` marker is upgraded to `.failed`.
    pub max_no_progress_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            auto_deploy_zipped: true,
            auto_deploy_exploded: false,
            auto_deploy_xml: false,
            scan_interval_ms: 5_000,
            deployment_timeout_ms: 600_000,
            max_no_progress_ms: 60_000,
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_millis(self.deployment_timeout_ms)
    }

    pub fn max_no_progress(&self) -> Duration {
        Duration::from_millis(self.max_no_progress_ms)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("Failed to parse scanner configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ScannerConfig::default();
        assert!(config.auto_deploy_zipped);
        assert!(!config.auto_deploy_exploded);
        assert!(!config.auto_deploy_xml);
        assert_eq!(config.scan_interval(), Duration::from_secs(5));
        assert_eq!(config.deployment_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_no_progress(), Duration::from_secs(60));
    }

    #[test]
    fn parse_partial_toml() {
        let config = ScannerConfig::from_toml_str(
            "auto_deploy_exploded = true\nscan_interval_ms = 250\n",
        )
        .unwrap();
        assert!(config.auto_deploy_exploded);
        assert_eq!(config.scan_interval(), Duration::from_millis(250));
        // untouched fields keep their defaults
        assert!(config.auto_deploy_zipped);
    }
}
