//! Data model shared across the pipeline: monitor definitions, alerts, and
//! the per-run result types returned up to the caller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel monitor id marking an unsaved or dryrun/test monitor. A monitor
/// with this id is never persisted to the alert store.
pub const NO_ID: &str = "__NO_ID__";

/// Maximum number of entries kept in an alert's error history, newest first.
pub const MAX_ERROR_HISTORY: usize = 10;

/// The owning user of a monitor, carrying the backend roles used to scope
/// search access during input collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorUser {
    pub name: String,
    pub backend_roles: Vec<String>,
}

/// A query-shaped input executed against the cluster each run. Only
/// `SearchInput` is understood by the pipeline; any other variant is
/// rejected at collection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Input {
    Search {
        /// Handlebars-templated query body, rendered with
        /// `{period_start, period_end}`.
        query_template: String,
        indices: Vec<String>,
    },
    /// Any input variant the pipeline does not understand.
    Unsupported { kind: String },
}

/// How a throttle's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleUnit {
    Minutes,
}

impl ThrottleUnit {
    #[must_use]
    pub fn to_duration(self, value: i64) -> chrono::Duration {
        match self {
            Self::Minutes => chrono::Duration::minutes(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Throttle {
    pub value: i64,
    pub unit: ThrottleUnit,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub name: String,
    pub destination_id: String,
    pub subject_template: Option<String>,
    pub message_template: String,
    pub throttle: Option<Throttle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: String,
    pub name: String,
    /// Boolean expression evaluated over the trigger execution context.
    pub condition: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub owner: Option<MonitorUser>,
    pub inputs: Vec<Input>,
    pub triggers: Vec<Trigger>,
    /// True for anomaly-detector monitors: input collection stashes the
    /// security context and adds a backend-role filter instead of running
    /// under an injected one.
    pub is_ad_monitor: bool,
}

impl Monitor {
    #[must_use]
    pub fn is_unsaved(&self) -> bool {
        self.id == NO_ID
    }
}

/// A scheduled job as the upstream scheduler hands it to `runJob`. The
/// runner's pipeline only understands monitor jobs; other scheduled job
/// kinds the same scheduler may dispatch (e.g. report generation) are
/// rejected at the entry point rather than silently ignored.
#[derive(Debug, Clone)]
pub enum Job {
    Monitor(Monitor),
    Other(String),
}

/// Lifecycle state of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Active,
    Acknowledged,
    Completed,
    Error,
    Deleted,
}

/// One entry in an alert's bounded error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertErrorEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-action delivery bookkeeping carried on the alert across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionResult {
    pub action_id: String,
    pub last_execution_time: DateTime<Utc>,
    pub throttled_count: u32,
}

/// The durable record of a trigger's firing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Cluster-assigned on first insert; callers constructing a fresh alert
    /// leave this empty and the store fills it in.
    pub id: String,
    pub monitor_id: String,
    pub trigger_id: String,
    pub start_time: DateTime<Utc>,
    pub last_notification_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: AlertState,
    pub error_message: Option<String>,
    pub error_history: Vec<AlertErrorEntry>,
    pub action_execution_results: Vec<ActionExecutionResult>,
    pub schema_version: i32,
}

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Result of one action's dispatch attempt within a trigger run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRunResult {
    pub action_id: String,
    pub name: String,
    pub output: HashMap<String, String>,
    pub throttled: bool,
    pub execution_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of evaluating one trigger and (if actionable) running its actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRunResult {
    pub trigger_name: String,
    pub triggered: bool,
    pub error: Option<String>,
    pub action_results: HashMap<String, ActionRunResult>,
}

/// Result of collecting one input: the generic key-value documents the
/// search produced, or the error that aborted collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputRunResult {
    pub results: Vec<HashMap<String, serde_json::Value>>,
    pub error: Option<String>,
}

/// The full result of one `runMonitor` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRunResult {
    pub monitor_name: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub error: Option<String>,
    pub input_results: Vec<InputRunResult>,
    pub trigger_results: HashMap<String, TriggerRunResult>,
}

impl MonitorRunResult {
    #[must_use]
    pub fn with_error(monitor_name: String, period_start: DateTime<Utc>, period_end: DateTime<Utc>, error: String) -> Self {
        Self {
            monitor_name,
            period_start,
            period_end,
            error: Some(error),
            input_results: Vec::new(),
            trigger_results: HashMap::new(),
        }
    }
}
