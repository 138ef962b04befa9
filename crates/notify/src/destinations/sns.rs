//! AWS SNS destination, supporting both the default AWS credential chain
//! and a static access/secret key publish mode.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use monitor_config::SnsSettings;
use tracing::debug;

use crate::error::DispatchError;
use crate::{Destination, DestinationContext};

/// Publishes to a fixed SNS topic, optionally via a specific IAM role.
pub struct SnsDestination {
    topic_arn: String,
    role_arn: String,
    /// Cached per-credential clients, keyed by
    /// [`SnsSettings::client_cache_key`] so insertion and lookup always
    /// agree on the same key.
    clients: Mutex<HashMap<String, aws_sdk_sns::Client>>,
}

impl SnsDestination {
    #[must_use]
    pub fn new(topic_arn: impl Into<String>, role_arn: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
            role_arn: role_arn.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, aws: &SnsSettings) -> aws_sdk_sns::Client {
        let key = aws.client_cache_key(&self.role_arn);

        if let Some(client) = self
            .clients
            .lock()
            .expect("SNS client cache lock poisoned")
            .get(&key)
        {
            return client.clone();
        }

        let client = if aws.enabled {
            let credentials = aws_sdk_sns::config::Credentials::new(
                aws.access_key.clone().unwrap_or_default(),
                aws.secret_key.clone().unwrap_or_default(),
                None,
                None,
                "monitor-runner-static-sns",
            );
            let config = aws_sdk_sns::Config::builder()
                .credentials_provider(credentials)
                .region(aws_types::region::Region::new("us-east-1"))
                .behavior_version(aws_config::BehaviorVersion::latest())
                .build();
            aws_sdk_sns::Client::from_conf(config)
        } else {
            let shared_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            aws_sdk_sns::Client::new(&shared_config)
        };

        self.clients
            .lock()
            .expect("SNS client cache lock poisoned")
            .insert(key, client.clone());
        client
    }
}

#[async_trait]
impl Destination for SnsDestination {
    fn kind(&self) -> &'static str {
        "sns"
    }

    async fn publish(
        &self,
        aws: &SnsSettings,
        subject: Option<&str>,
        message: &str,
        ctx: &DestinationContext,
        _host_deny_list: &HashSet<String>,
    ) -> Result<String, DispatchError> {
        // SNS is not a host-addressable webhook; the deny-list only
        // applies to destinations that resolve to an arbitrary publish URL.
        let client = self.client_for(aws).await;

        debug!(topic_arn = %self.topic_arn, "publishing to SNS");

        let mut request = client.publish().topic_arn(&self.topic_arn).message(message);
        if let Some(subject) = subject.filter(|s| !s.is_empty()) {
            request = request.subject(subject);
        }

        let output = request
            .send()
            .await
            .map_err(|e| DispatchError::Sns(e.to_string()))?;

        output
            .message_id()
            .map(ToString::to_string)
            .ok_or_else(|| DispatchError::Sns(format!("no message id for action {}", ctx.action_id)))
    }
}
