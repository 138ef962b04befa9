//! Slack incoming-webhook destination.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::{Destination, DestinationContext};

use super::host_denied;

/// Slack incoming webhook.
pub struct SlackDestination {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackDestination {
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(subject: Option<&str>, message: &str, ctx: &DestinationContext) -> SlackPayload {
        let title = subject.unwrap_or("Monitor alert").to_string();
        SlackPayload {
            attachments: vec![SlackAttachment {
                fallback: title.clone(),
                color: "#e74c3c".to_string(),
                title,
                text: message.to_string(),
                footer: format!("monitor={} trigger={}", ctx.monitor_id, ctx.trigger_id),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    title: String,
    text: String,
    footer: String,
}

#[async_trait]
impl Destination for SlackDestination {
    fn kind(&self) -> &'static str {
        "slack"
    }

    async fn publish(
        &self,
        _aws: &monitor_config::SnsSettings,
        subject: Option<&str>,
        message: &str,
        ctx: &DestinationContext,
        host_deny_list: &HashSet<String>,
    ) -> Result<String, DispatchError> {
        if host_denied(&self.webhook_url, host_deny_list) {
            return Err(DispatchError::HostDenied(self.webhook_url.clone()));
        }

        let payload = Self::format_payload(subject, message, ctx);

        debug!(channel = "slack", "publishing action result");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(format!("slack-{}", ctx.action_id))
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, channel = "slack", "webhook rejected publish");
            Err(DispatchError::Rejected {
                destination: "slack".to_string(),
                status,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> DestinationContext {
        DestinationContext {
            monitor_id: "m1".to_string(),
            trigger_id: "t1".to_string(),
            action_id: "a1".to_string(),
        }
    }

    #[test]
    fn payload_defaults_subject_when_absent() {
        let payload = SlackDestination::format_payload(None, "body text", &ctx());
        assert_eq!(payload.attachments[0].title, "Monitor alert");
        assert_eq!(payload.attachments[0].text, "body text");
    }

    #[test]
    fn payload_uses_given_subject_as_title() {
        let payload = SlackDestination::format_payload(Some("custom subject"), "body", &ctx());
        assert_eq!(payload.attachments[0].title, "custom subject");
        assert!(payload.attachments[0].footer.contains("monitor=m1"));
    }

    #[tokio::test]
    async fn successful_publish_returns_action_scoped_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let destination = SlackDestination::new(format!("{}/services/hook", server.uri()));
        let message_id = destination
            .publish(&monitor_config::SnsSettings::default(), None, "alert fired", &ctx(), &HashSet::new())
            .await
            .unwrap();

        assert_eq!(message_id, "slack-a1");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_as_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/hook"))
            .respond_with(ResponseTemplate::new(404).set_body_string("channel not found"))
            .mount(&server)
            .await;

        let destination = SlackDestination::new(format!("{}/services/hook", server.uri()));
        let err = destination
            .publish(&monitor_config::SnsSettings::default(), None, "alert fired", &ctx(), &HashSet::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Rejected { status: 404, .. }));
    }
}
