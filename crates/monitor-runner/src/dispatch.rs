//! Renders and publishes a trigger's actions: throttle check, template
//! render, allow-list/host-deny-list enforcement, then delegate to a
//! [`notify::Destination`].

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use monitor_config::DestinationSettings;
use notify::{Destination, DestinationContext, DestinationKind};
use tracing::warn;

use crate::error::DispatchError;
use crate::model::{Action, ActionExecutionResult, ActionRunResult, Alert, AlertState};

/// True if `action`'s throttle window has elapsed (or it has none), meaning
/// it should actually run this time rather than be suppressed.
#[must_use]
pub fn is_action_actionable(
    action: &Action,
    prior_result: Option<&ActionExecutionResult>,
    now: DateTime<Utc>,
) -> bool {
    let Some(throttle) = action.throttle else {
        return true;
    };
    if !throttle.enabled {
        return true;
    }
    let Some(prior) = prior_result else {
        return true;
    };
    now >= prior.last_execution_time + throttle.unit.to_duration(throttle.value)
}

/// True unless the trigger's alert is acknowledged and nothing new went
/// wrong this run: an acknowledged alert suppresses repeat notifications
/// but a new error still needs to reach someone.
#[must_use]
pub fn is_trigger_actionable(alert_error: Option<&str>, prior_alert: Option<&Alert>) -> bool {
    match prior_alert {
        Some(alert) if alert.state == AlertState::Acknowledged => alert_error.is_some(),
        _ => true,
    }
}

fn build_destination(
    config: &notify::DestinationConfig,
) -> Result<Box<dyn Destination>, DispatchError> {
    match config.kind {
        DestinationKind::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| DispatchError::Destination(notify::DispatchError::Other(
                    format!("destination {} missing webhook_url", config.id),
                )))?;
            Ok(Box::new(notify::destinations::WebhookDestination::new(url)))
        }
        DestinationKind::Slack => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| DispatchError::Destination(notify::DispatchError::Other(
                    format!("destination {} missing webhook_url", config.id),
                )))?;
            Ok(Box::new(notify::destinations::SlackDestination::new(url)))
        }
        DestinationKind::Sns => {
            let topic_arn = config
                .sns_topic_arn
                .clone()
                .ok_or_else(|| DispatchError::Destination(notify::DispatchError::Other(
                    format!("destination {} missing sns_topic_arn", config.id),
                )))?;
            let role_arn = config.sns_role_arn.clone().unwrap_or_default();
            Ok(Box::new(notify::destinations::SnsDestination::new(topic_arn, role_arn)))
        }
    }
}

/// Rendered and (unless dryrun) published content of one action attempt.
struct ActionOutput {
    subject: String,
    message: String,
    message_id: Option<String>,
}

pub struct ActionDispatcher<'a, R> {
    registry: &'a R,
    templates: Handlebars<'a>,
}

impl<'a, R: notify::DestinationRegistry> ActionDispatcher<'a, R> {
    #[must_use]
    pub fn new(registry: &'a R) -> Self {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        Self { registry, templates }
    }

    /// Render and publish one action. `actionable` decides whether this is
    /// a real attempt or a throttled no-op; `vars` is the template render
    /// context (trigger result fields, input documents, etc). `dryrun`
    /// renders templates (so a preview still surfaces template errors) but
    /// skips the destination lookup and publish call entirely.
    pub async fn run_action(
        &self,
        action: &Action,
        settings: &DestinationSettings,
        vars: &serde_json::Value,
        ctx: &DestinationContext,
        actionable: bool,
        dryrun: bool,
        now: DateTime<Utc>,
    ) -> ActionRunResult {
        if !actionable {
            return ActionRunResult {
                action_id: action.id.clone(),
                name: action.name.clone(),
                output: std::collections::HashMap::new(),
                throttled: true,
                execution_time: None,
                error: None,
            };
        }

        match self.try_run(action, settings, vars, ctx, dryrun, now).await {
            Ok(result) => {
                let mut out = std::collections::HashMap::new();
                out.insert("subject".to_string(), result.subject);
                out.insert("message".to_string(), result.message);
                if let Some(id) = result.message_id {
                    out.insert("message_id".to_string(), id);
                }
                ActionRunResult {
                    action_id: action.id.clone(),
                    name: action.name.clone(),
                    output: out,
                    throttled: false,
                    execution_time: Some(now),
                    error: None,
                }
            }
            Err(e) => {
                warn!(action = %action.id, error = %e, "action dispatch failed");
                ActionRunResult {
                    action_id: action.id.clone(),
                    name: action.name.clone(),
                    output: std::collections::HashMap::new(),
                    throttled: false,
                    execution_time: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_run(
        &self,
        action: &Action,
        settings: &DestinationSettings,
        vars: &serde_json::Value,
        ctx: &DestinationContext,
        dryrun: bool,
        _now: DateTime<Utc>,
    ) -> Result<ActionOutput, DispatchError> {
        let subject = match &action.subject_template {
            Some(template) => self
                .templates
                .render_template(template, vars)
                .map_err(crate::error::TemplateError::from)?,
            None => String::new(),
        };
        let message = self
            .templates
            .render_template(&action.message_template, vars)
            .map_err(crate::error::TemplateError::from)?;
        if message.trim().is_empty() {
            return Err(DispatchError::MessageMissing);
        }

        if dryrun {
            return Ok(ActionOutput { subject, message, message_id: None });
        }

        let config = self
            .registry
            .lookup(&action.destination_id)
            .await
            .map_err(DispatchError::Destination)?;

        if !settings.allow_list.is_empty() && !settings.allow_list.contains(config.kind.as_str()) {
            return Err(DispatchError::TypeNotAllowed(config.kind));
        }

        let destination = build_destination(&config)?;
        let subject_arg = if subject.is_empty() { None } else { Some(subject.as_str()) };
        let message_id = destination
            .publish(
                &settings.sns,
                subject_arg,
                &message,
                ctx,
                &settings.host_deny_list,
            )
            .await
            .map_err(DispatchError::Destination)?;

        Ok(ActionOutput { subject, message, message_id: Some(message_id) })
    }
}
