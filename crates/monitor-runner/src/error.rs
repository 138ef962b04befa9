//! Error taxonomy for the runner: fatal errors abort the current monitor
//! run; everything else is recorded on the appropriate result type and the
//! pipeline continues.

use thiserror::Error;

/// Errors that abort a `runMonitor` invocation outright (no alerts written).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unsupported input variant: {0}")]
    UnsupportedInput(String),
    #[error("attempted to persist an alert in state {0:?}, which the runner never writes")]
    IllegalAlertState(crate::model::AlertState),
    #[error("failed to ensure alert/history indices: {0}")]
    IndexSetup(#[source] ClusterError),
    #[error("failed to load current alerts: {0}")]
    LoadAlerts(#[source] ClusterError),
    #[error("failed to save alerts: {0}")]
    SaveAlerts(#[source] ClusterError),
    #[error("invalid job type: {0}")]
    InvalidJobType(String),
    #[error("job was cancelled before it produced a result")]
    JobCancelled,
}

/// Errors surfaced by cluster I/O (search, bulk, index management).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("cluster returned non-OK status {status}: {body}")]
    NonOk { status: u16, body: String },
    #[error("bulk item failed: {0}")]
    BulkItemFailed(String),
    #[error("failed to parse cluster response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised compiling or rendering a handlebars template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template compilation failed: {0}")]
    Compile(#[from] handlebars::TemplateError),
    #[error("template rendering failed: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Errors raised dispatching a single action.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("message content missing after rendering")]
    MessageMissing,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("destination type {0:?} is not in the allow-list")]
    TypeNotAllowed(notify::DestinationKind),
    #[error(transparent)]
    Destination(#[from] notify::DispatchError),
}
