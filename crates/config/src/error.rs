//! Errors for config loading and reload.

use thiserror::Error;

/// Errors that can occur while loading or reloading runner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file's contents could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting required at startup was absent and has no default.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// The settings source failed to produce a snapshot (e.g. unreachable
    /// remote settings store). The previous snapshot stays live.
    #[error("settings source unavailable: {0}")]
    SourceUnavailable(String),
}
