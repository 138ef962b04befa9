//! Executes a monitor's inputs against the cluster and converts responses
//! into generic key-value documents for the trigger evaluator.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::ClusterClient;
use crate::error::RunnerError;
use crate::model::{Input, InputRunResult, Monitor, MonitorUser};

/// Legacy admin roles used when a monitor has no owning user.
const LEGACY_ADMIN_ROLES: &[&str] = &["all_access", "security_manager"];

/// The security context a search executes under.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub monitor_id: String,
    pub roles: Vec<String>,
    /// True when the calling thread's context was stashed rather than an
    /// explicit context injected (the anomaly-detector variant).
    pub stashed: bool,
}

impl SecurityContext {
    fn injected(monitor: &Monitor) -> Self {
        let roles = monitor
            .owner
            .as_ref()
            .map(|u: &MonitorUser| u.backend_roles.clone())
            .unwrap_or_else(|| LEGACY_ADMIN_ROLES.iter().map(|s| (*s).to_string()).collect());
        Self {
            monitor_id: monitor.id.clone(),
            roles,
            stashed: false,
        }
    }

    fn stashed_for_ad(monitor: &Monitor) -> Self {
        let roles = monitor
            .owner
            .as_ref()
            .map(|u: &MonitorUser| u.backend_roles.clone())
            .unwrap_or_default();
        Self {
            monitor_id: monitor.id.clone(),
            roles,
            stashed: true,
        }
    }
}

/// Collects all of a monitor's inputs for one run.
pub struct InputCollector<'a, C> {
    cluster: &'a C,
    templates: Handlebars<'a>,
}

impl<'a, C: ClusterClient> InputCollector<'a, C> {
    #[must_use]
    pub fn new(cluster: &'a C) -> Self {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        Self { cluster, templates }
    }

    /// Collect every input of `monitor` for `[period_start, period_end)`.
    ///
    /// An unsupported input variant is fatal to the whole run (spec.md §7):
    /// it propagates as `Err` rather than being recorded per-input, the same
    /// way an invalid job type aborts `run_job` outright. Search/template
    /// failures on an otherwise-supported input stay non-fatal and are
    /// captured on that input's own `InputRunResult.error`.
    pub async fn collect(
        &self,
        monitor: &Monitor,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<InputRunResult>, RunnerError> {
        let security = if monitor.is_ad_monitor {
            SecurityContext::stashed_for_ad(monitor)
        } else {
            SecurityContext::injected(monitor)
        };

        let mut results = Vec::with_capacity(monitor.inputs.len());
        for input in &monitor.inputs {
            results.push(
                self.collect_one(input, &security, monitor, period_start, period_end)
                    .await?,
            );
        }
        Ok(results)
    }

    async fn collect_one(
        &self,
        input: &Input,
        security: &SecurityContext,
        monitor: &Monitor,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<InputRunResult, RunnerError> {
        let (query_template, indices) = match input {
            Input::Search { query_template, indices } => (query_template, indices),
            Input::Unsupported { kind } => {
                return Err(RunnerError::UnsupportedInput(kind.clone()));
            }
        };

        let params = serde_json::json!({
            "period_start": period_start.timestamp_millis(),
            "period_end": period_end.timestamp_millis(),
        });

        let rendered = match self.templates.render_template(query_template, &params) {
            Ok(rendered) => rendered,
            Err(e) => {
                return Ok(InputRunResult {
                    results: Vec::new(),
                    error: Some(format!("query template render error: {e}")),
                })
            }
        };

        let mut query: Value = match serde_json::from_str(&rendered) {
            Ok(q) => q,
            Err(e) => {
                return Ok(InputRunResult {
                    results: Vec::new(),
                    error: Some(format!("rendered query is not valid JSON: {e}")),
                })
            }
        };

        if monitor.is_ad_monitor {
            apply_backend_role_filter(&mut query, &security.roles);
            debug!(monitor = %monitor.id, "running AD input under stashed context");
        }

        match self
            .cluster
            .search(indices, &query, &monitor.id)
            .await
        {
            Ok(hits) => Ok(InputRunResult {
                results: hits,
                error: None,
            }),
            Err(e) => {
                warn!(monitor = %monitor.id, error = %e, "input search failed");
                Ok(InputRunResult {
                    results: Vec::new(),
                    error: Some(e.to_string()),
                })
            }
        }
    }
}

/// Rewrites `query` to add a `terms` filter on the monitor owner's backend
/// roles, used by the anomaly-detector variant to scope results without an
/// injected security context.
fn apply_backend_role_filter(query: &mut Value, roles: &[String]) {
    if roles.is_empty() {
        return;
    }
    let role_set: HashSet<&str> = roles.iter().map(String::as_str).collect();
    if let Some(obj) = query.as_object_mut() {
        obj.insert(
            "_ad_backend_role_filter".to_string(),
            serde_json::json!({ "terms": { "backend_roles": role_set.into_iter().collect::<Vec<_>>() } }),
        );
    }
}
