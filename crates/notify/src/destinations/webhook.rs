//! Generic HTTPS webhook destination.
//!
//! Posts a JSON body to an arbitrary HTTPS endpoint: `{"subject": ...,
//! "message": ...}`.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::{Destination, DestinationContext};

use super::host_denied;

/// A plain HTTPS webhook that accepts a JSON body.
pub struct WebhookDestination {
    url: String,
    client: reqwest::Client,
}

impl WebhookDestination {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    message: &'a str,
    monitor_id: &'a str,
    trigger_id: &'a str,
}

#[async_trait]
impl Destination for WebhookDestination {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn publish(
        &self,
        _aws: &monitor_config::SnsSettings,
        subject: Option<&str>,
        message: &str,
        ctx: &DestinationContext,
        host_deny_list: &HashSet<String>,
    ) -> Result<String, DispatchError> {
        if host_denied(&self.url, host_deny_list) {
            return Err(DispatchError::HostDenied(self.url.clone()));
        }

        let payload = WebhookPayload {
            subject,
            message,
            monitor_id: &ctx.monitor_id,
            trigger_id: &ctx.trigger_id,
        };

        debug!(url = %self.url, "publishing webhook destination");

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if response.status().is_success() {
            let message_id = response
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| format!("webhook-{}", ctx.action_id));
            Ok(message_id)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "webhook destination rejected publish");
            Err(DispatchError::Rejected {
                destination: self.url.clone(),
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

    #[tokio::test]
    async fn successful_publish_returns_request_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-request-id", "req-123"))
            .mount(&server)
            .await;

        let destination = WebhookDestination::new(format!("{}/hook", server.uri()));
        let message_id = destination
            .publish(
                &monitor_config::SnsSettings::default(),
                Some("subject"),
                "message body",
                &ctx(),
                &HashSet::new(),
            )
            .await
            .unwrap();

        assert_eq!(message_id, "req-123");
    }

    #[tokio::test]
    async fn missing_request_id_header_falls_back_to_action_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let destination = WebhookDestination::new(format!("{}/hook", server.uri()));
        let message_id = destination
            .publish(&monitor_config::SnsSettings::default(), None, "message", &ctx(), &HashSet::new())
            .await
            .unwrap();

        assert_eq!(message_id, "webhook-a1");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_as_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let destination = WebhookDestination::new(format!("{}/hook", server.uri()));
        let err = destination
            .publish(&monitor_config::SnsSettings::default(), None, "message", &ctx(), &HashSet::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn denied_host_is_rejected_before_any_request_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        let deny_list: HashSet<String> = [host].into_iter().collect();

        let destination = WebhookDestination::new(format!("{}/hook", server.uri()));
        let err = destination
            .publish(&monitor_config::SnsSettings::default(), None, "message", &ctx(), &deny_list)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::HostDenied(_)));
    }
}
