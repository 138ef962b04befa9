//! Destination publish layer for monitor actions.
//!
//! Every trigger action renders a subject/message and hands it to a
//! [`Destination`], which turns that into a delivery to webhook, Slack,
//! or SNS and returns an opaque message id.
//!
//! # Architecture
//!
//! - [`Destination`] trait defines the interface every destination kind
//!   implements (webhook, Slack, SNS).
//! - [`DestinationRegistry`] resolves an action's configured destination id
//!   to a [`DestinationConfig`] plus the concrete [`Destination`] to publish
//!   through.
//! - [`destinations::host_denied`] enforces the host deny-list before any
//!   network call is attempted, not after.

pub mod destinations;
pub mod error;
pub mod registry;

pub use error::DispatchError;
pub use registry::{DestinationConfig, DestinationKind, DestinationRegistry, InMemoryDestinationRegistry};

use async_trait::async_trait;
use std::collections::HashSet;

/// Template-rendered arguments available to a destination at publish time,
/// beyond the rendered subject/message text (e.g. routing/threading hints a
/// richer destination kind might want). Kept intentionally small: the
/// publish contract only requires subject/message/messageId.
#[derive(Debug, Clone, Default)]
pub struct DestinationContext {
    pub monitor_id: String,
    pub trigger_id: String,
    pub action_id: String,
}

/// A destination a rendered action message can be published to.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Stable, lowercase kind name used for allow-list matching
    /// (`"webhook"`, `"slack"`, `"sns"`, ...).
    fn kind(&self) -> &'static str;

    /// Publish a rendered message, returning an opaque delivery id.
    ///
    /// `aws` is the current AWS/SNS settings snapshot, read fresh on every
    /// publish rather than cached as process-global mutable state.
    /// Destinations that don't need it (webhook, Slack) simply ignore it.
    async fn publish(
        &self,
        aws: &monitor_config::SnsSettings,
        subject: Option<&str>,
        message: &str,
        ctx: &DestinationContext,
        host_deny_list: &HashSet<String>,
    ) -> Result<String, DispatchError>;
}
