//! Resolves a configured destination id to its configuration.
//!
//! Dispatch needs to turn an action's destination id into a concrete
//! config before it can publish. The real backing store (a cluster index,
//! a REST API) is out of scope; this crate only needs the lookup contract
//! plus an in-memory implementation for tests and small deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// The kind of a destination, used for allow-list matching and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Webhook,
    Slack,
    Sns,
}

impl DestinationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Slack => "slack",
            Self::Sns => "sns",
        }
    }
}

/// Resolved destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    pub name: String,
    pub kind: DestinationKind,
    /// Webhook/Slack incoming-webhook URL.
    pub webhook_url: Option<String>,
    /// SNS topic ARN to publish to.
    pub sns_topic_arn: Option<String>,
    /// SNS role ARN used to key the cached client when static credentials
    /// are not in effect.
    pub sns_role_arn: Option<String>,
}

/// Looks up a destination's configuration by id.
#[async_trait]
pub trait DestinationRegistry: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<DestinationConfig, DispatchError>;
}

/// A simple in-memory registry, backing tests and deployments small enough
/// to configure destinations statically.
#[derive(Default)]
pub struct InMemoryDestinationRegistry {
    configs: RwLock<HashMap<String, DestinationConfig>>,
}

impl InMemoryDestinationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: DestinationConfig) {
        self.configs
            .write()
            .expect("destination registry lock poisoned")
            .insert(config.id.clone(), config);
    }
}

#[async_trait]
impl DestinationRegistry for InMemoryDestinationRegistry {
    async fn lookup(&self, id: &str) -> Result<DestinationConfig, DispatchError> {
        self.configs
            .read()
            .expect("destination registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))
    }
}
