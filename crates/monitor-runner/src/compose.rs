//! Pure alert state-machine function: computes the next alert (or none)
//! from the previous alert, this run's trigger result, and any monitor/
//! trigger-level error, with no I/O of its own.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{
    Alert, AlertErrorEntry, AlertState, ActionExecutionResult, ActionRunResult, TriggerRunResult,
    CURRENT_SCHEMA_VERSION, MAX_ERROR_HISTORY,
};

/// Everything the composer needs about the trigger being evaluated and its
/// prior alert, aside from the run's own result.
pub struct ComposeContext<'a> {
    pub monitor_id: &'a str,
    pub trigger_id: &'a str,
    pub prior_alert: Option<&'a Alert>,
    pub now: DateTime<Utc>,
}

/// The first non-null of a monitor-level and trigger-level error; monitor
/// error wins when both are present.
#[must_use]
pub fn resolve_alert_error<'a>(monitor_error: Option<&'a str>, trigger_error: Option<&'a str>) -> Option<&'a str> {
    monitor_error.or(trigger_error)
}

fn merge_action_results(
    prior: Option<&Alert>,
    trigger_result: &TriggerRunResult,
    now: DateTime<Utc>,
) -> Vec<ActionExecutionResult> {
    let mut merged = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(prior) = prior {
        for entry in &prior.action_execution_results {
            seen.insert(entry.action_id.clone());
            match trigger_result.action_results.get(&entry.action_id) {
                None => merged.push(entry.clone()),
                Some(result) if result.throttled => merged.push(ActionExecutionResult {
                    action_id: entry.action_id.clone(),
                    last_execution_time: entry.last_execution_time,
                    throttled_count: entry.throttled_count + 1,
                }),
                Some(result) => merged.push(ActionExecutionResult {
                    action_id: entry.action_id.clone(),
                    last_execution_time: result.execution_time.unwrap_or(now),
                    throttled_count: entry.throttled_count,
                }),
            }
        }
    }

    for (action_id, result) in &trigger_result.action_results {
        if seen.contains(action_id) {
            continue;
        }
        merged.push(ActionExecutionResult {
            action_id: action_id.clone(),
            last_execution_time: result.execution_time.unwrap_or(now),
            throttled_count: u32::from(result.throttled),
        });
    }

    merged
}

fn merge_error_history(
    prior: Option<&Alert>,
    alert_error: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<AlertErrorEntry> {
    let prior_history = prior.map(|a| a.error_history.clone()).unwrap_or_default();

    match alert_error {
        None => prior_history,
        Some(message) => {
            let mut history = vec![AlertErrorEntry {
                message: message.to_string(),
                timestamp: now,
            }];
            history.extend(prior_history);
            history.truncate(MAX_ERROR_HISTORY);
            history
        }
    }
}

/// Compute the next alert state, or `None` if nothing should be written
/// for this trigger this run.
///
/// `triggered`/`alert_error` drive the state transition; `action_results`
/// is `trigger_result.action_results` and is folded into the returned
/// alert's `action_execution_results` regardless of the outcome above.
#[must_use]
pub fn compose(
    ctx: &ComposeContext<'_>,
    triggered: bool,
    alert_error: Option<&str>,
    action_results: &HashMap<String, ActionRunResult>,
) -> Option<Alert> {
    let trigger_result_stub = TriggerRunResult {
        trigger_name: String::new(),
        triggered,
        error: None,
        action_results: action_results.clone(),
    };

    let prior = ctx.prior_alert;

    // Acknowledged alerts are never touched unless a new error appears.
    if let Some(prior) = prior {
        if prior.state == AlertState::Acknowledged && alert_error.is_none() {
            return None;
        }
    }

    let merged_results = merge_action_results(prior, &trigger_result_stub, ctx.now);
    let merged_history = merge_error_history(prior, alert_error, ctx.now);

    // A brand-new alert needs an id of its own here, not left for the
    // cluster to assign on index: the saved document's `_source` (which
    // embeds this id) is the only copy `load_current_alerts` ever reads
    // back, since search results aren't merged with `_id`. An empty id
    // would round-trip as a permanently-empty id, breaking the delete-by-id
    // bulk op once the alert eventually completes.
    let base = |state: AlertState| Alert {
        id: prior.map_or_else(|| uuid::Uuid::new_v4().to_string(), |a| a.id.clone()),
        monitor_id: ctx.monitor_id.to_string(),
        trigger_id: ctx.trigger_id.to_string(),
        start_time: prior.map_or(ctx.now, |a| a.start_time),
        last_notification_time: prior.and_then(|a| a.last_notification_time),
        end_time: prior.and_then(|a| a.end_time),
        state,
        error_message: None,
        error_history: merged_history.clone(),
        action_execution_results: merged_results.clone(),
        schema_version: CURRENT_SCHEMA_VERSION,
    };

    match (triggered, alert_error, prior) {
        (false, None, None) => None,
        (false, None, Some(_)) => Some(Alert {
            end_time: Some(ctx.now),
            error_message: None,
            ..base(AlertState::Completed)
        }),
        (true, None, None) => Some(Alert {
            last_notification_time: Some(ctx.now),
            ..base(AlertState::Active)
        }),
        (true, None, Some(_)) => Some(Alert {
            last_notification_time: Some(ctx.now),
            error_message: None,
            ..base(AlertState::Active)
        }),
        (_, Some(message), None) => Some(Alert {
            last_notification_time: Some(ctx.now),
            error_message: Some(message.to_string()),
            ..base(AlertState::Error)
        }),
        (_, Some(message), Some(_)) => Some(Alert {
            last_notification_time: Some(ctx.now),
            error_message: Some(message.to_string()),
            ..base(AlertState::Error)
        }),
    }
}
