//! Static startup configuration: the things a monitor run needs that don't
//! change without a process restart (cluster endpoint, index names).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_CLUSTER_URL: &str = "http://localhost:9200";
const DEFAULT_ALERT_INDEX: &str = ".opendistro-alerting-alerts";
const DEFAULT_HISTORY_INDEX: &str = ".opendistro-alerting-alert-history-write";

/// Static, process-lifetime configuration loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Base URL of the search/index cluster.
    pub cluster_url: String,
    /// Name of the current-alerts index.
    pub alert_index: String,
    /// Name of the write-only completed/error history index.
    pub history_write_index: String,
    /// Whether writes to the history index are enabled at all.
    pub history_enabled: bool,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            cluster_url: DEFAULT_CLUSTER_URL.to_string(),
            alert_index: DEFAULT_ALERT_INDEX.to_string(),
            history_write_index: DEFAULT_HISTORY_INDEX.to_string(),
            history_enabled: true,
        }
    }
}

impl StaticConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads `*_URL`-shaped env vars with a hardcoded fallback for anything
    /// unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cluster_url: std::env::var("MONITOR_CLUSTER_URL").unwrap_or(defaults.cluster_url),
            alert_index: std::env::var("MONITOR_ALERT_INDEX").unwrap_or(defaults.alert_index),
            history_write_index: std::env::var("MONITOR_HISTORY_INDEX")
                .unwrap_or(defaults.history_write_index),
            history_enabled: std::env::var("MONITOR_HISTORY_ENABLED")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.history_enabled),
        }
    }

    /// Load from a TOML file on disk, falling back to env/defaults for any
    /// field the file leaves unset.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
