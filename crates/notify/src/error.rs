//! Errors for the destination publish layer.

use thiserror::Error;

/// Errors that can occur while publishing to a destination.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Destination responded but indicated failure.
    #[error("destination {destination} returned {status}: {body}")]
    Rejected {
        destination: String,
        status: u16,
        body: String,
    },

    /// Destination id did not resolve to a known configuration.
    #[error("destination not found: {0}")]
    NotFound(String),

    /// Destination type is not in the configured allow-list.
    #[error("destination type not allowed: {0}")]
    TypeNotAllowed(String),

    /// Resolved publish host matches the configured deny-list.
    #[error("publish host denied: {0}")]
    HostDenied(String),

    /// Serialization error building the outbound payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// AWS SNS publish failure.
    #[error("SNS publish failed: {0}")]
    Sns(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}
