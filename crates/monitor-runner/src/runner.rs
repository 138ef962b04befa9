//! Orchestrates one monitor's full run: collect inputs, evaluate triggers,
//! dispatch actions, compose the next alert state, and persist it. Also
//! owns the supervisory scope that runs a monitor on its own schedule
//! until told to stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use monitor_config::SettingsWatcher;
use notify::DestinationContext;
use tracing::{info, warn};

use crate::alert_store::AlertStore;
use crate::cluster::ClusterClient;
use crate::compose::{compose, resolve_alert_error, ComposeContext};
use crate::dispatch::{is_action_actionable, is_trigger_actionable, ActionDispatcher};
use crate::error::RunnerError;
use crate::input::InputCollector;
use crate::model::{Job, Monitor, MonitorRunResult, TriggerRunResult};
use crate::trigger::{TriggerCompiler, TriggerExecutionContext};

/// Ties the pipeline's stages together for a single monitor definition.
pub struct MonitorRunner<C, R> {
    cluster: Arc<C>,
    config: monitor_config::StaticConfig,
    settings: Arc<SettingsWatcher>,
    registry: Arc<R>,
    /// Compiled trigger conditions, reused across repeated invocations of
    /// the same monitor (e.g. successive `run_monitor_loop` ticks) so the
    /// script is parsed once rather than on every run.
    trigger_compiler: TriggerCompiler,
}

impl<C, R> MonitorRunner<C, R>
where
    C: ClusterClient,
    R: notify::DestinationRegistry,
{
    #[must_use]
    pub fn new(
        cluster: Arc<C>,
        config: monitor_config::StaticConfig,
        settings: Arc<SettingsWatcher>,
        registry: Arc<R>,
    ) -> Self {
        Self { cluster, config, settings, registry, trigger_compiler: TriggerCompiler::new() }
    }

    /// Run `monitor` once over `[period_start, period_end)`, returning the
    /// full result even on partial failure; only a failure to ensure
    /// indices or load prior alerts aborts the run outright. `dryrun`
    /// suppresses both action publishes and alert persistence, matching
    /// the preview/test API's contract.
    pub async fn run_monitor(
        &self,
        monitor: &Monitor,
        period_start: chrono::DateTime<Utc>,
        period_end: chrono::DateTime<Utc>,
        dryrun: bool,
    ) -> MonitorRunResult {
        if period_start == period_end {
            warn!(monitor = %monitor.id, "periodStart == periodEnd; likely a one-shot execution");
        }

        let collector = InputCollector::new(self.cluster.as_ref());
        let input_results = match collector.collect(monitor, period_start, period_end).await {
            Ok(results) => results,
            Err(e) => {
                warn!(monitor = %monitor.id, error = %e, "failed to collect monitor inputs");
                return MonitorRunResult::with_error(
                    monitor.name.clone(),
                    period_start,
                    period_end,
                    e.to_string(),
                );
            }
        };

        let store = AlertStore::new(self.cluster.as_ref(), &self.config);
        let trigger_ids: Vec<String> = monitor.triggers.iter().map(|t| t.id.clone()).collect();

        let prior_alerts = if monitor.is_unsaved() {
            HashMap::new()
        } else {
            if let Err(e) = store.ensure_indices().await {
                warn!(monitor = %monitor.id, error = %e, "failed to ensure alert/history indices");
                return MonitorRunResult::with_error(
                    monitor.name.clone(),
                    period_start,
                    period_end,
                    e.to_string(),
                );
            }
            match store.load_current_alerts(&monitor.id, &trigger_ids).await {
                Ok(alerts) => alerts,
                Err(e) => {
                    warn!(monitor = %monitor.id, error = %e, "failed to load current alerts");
                    return MonitorRunResult::with_error(
                        monitor.name.clone(),
                        period_start,
                        period_end,
                        e.to_string(),
                    );
                }
            }
        };

        let settings_snapshot = self.settings.load();
        let dispatcher = ActionDispatcher::new(self.registry.as_ref());

        let mut trigger_results = HashMap::new();
        let mut alerts_to_save = Vec::new();

        for trigger in &monitor.triggers {
            let period_start_millis = period_start.timestamp_millis();
            let period_end_millis = period_end.timestamp_millis();
            let exec_ctx = TriggerExecutionContext {
                monitor_id: &monitor.id,
                trigger_id: &trigger.id,
                period_start_millis,
                period_end_millis,
                input_results: &input_results,
            };
            let (triggered, trigger_error) = self.trigger_compiler.evaluate(trigger, &exec_ctx);
            let prior_alert = prior_alerts.get(&trigger.id);
            let alert_error = resolve_alert_error(None, trigger_error.as_deref());
            let trigger_actionable = is_trigger_actionable(alert_error, prior_alert);

            let mut action_results = HashMap::new();
            if triggered && trigger_actionable {
                let now = Utc::now();
                let vars = serde_json::json!({
                    "monitor_name": monitor.name,
                    "trigger_name": trigger.name,
                    "period_start": period_start_millis,
                    "period_end": period_end_millis,
                    "ctx": exec_ctx.as_template_arg(),
                });
                for action in &trigger.actions {
                    let prior_result = prior_alert.and_then(|alert| {
                        alert
                            .action_execution_results
                            .iter()
                            .find(|r| r.action_id == action.id)
                    });
                    let actionable = is_action_actionable(action, prior_result, now);
                    let dest_ctx = DestinationContext {
                        monitor_id: monitor.id.clone(),
                        trigger_id: trigger.id.clone(),
                        action_id: action.id.clone(),
                    };
                    let result = dispatcher
                        .run_action(
                            action,
                            &settings_snapshot.destinations,
                            &vars,
                            &dest_ctx,
                            actionable,
                            dryrun,
                            now,
                        )
                        .await;
                    action_results.insert(action.id.clone(), result);
                }
            }

            let compose_ctx = ComposeContext {
                monitor_id: &monitor.id,
                trigger_id: &trigger.id,
                prior_alert,
                now: Utc::now(),
            };
            if let Some(alert) = compose(&compose_ctx, triggered, alert_error, &action_results) {
                alerts_to_save.push(alert);
            }

            trigger_results.insert(
                trigger.id.clone(),
                TriggerRunResult {
                    trigger_name: trigger.name.clone(),
                    triggered,
                    error: trigger_error,
                    action_results,
                },
            );
        }

        if !dryrun && !monitor.is_unsaved() && !alerts_to_save.is_empty() {
            if let Err(e) = store.save(&alerts_to_save, settings_snapshot.alert_backoff).await {
                warn!(monitor = %monitor.id, error = %e, "failed to persist alerts for this run");
            }
        }

        MonitorRunResult {
            monitor_name: monitor.name.clone(),
            period_start,
            period_end,
            error: None,
            input_results,
            trigger_results,
        }
    }

    /// Moves a monitor's alerts after it is reindexed or deleted. Indexing
    /// calls this with the new definition in hand; deletion with `None`.
    pub async fn on_monitor_changed(&self, monitor_id: &str, new_monitor: Option<&Monitor>) {
        let store = AlertStore::new(self.cluster.as_ref(), &self.config);
        let backoff = self.settings.load().move_alerts_backoff;
        if let Err(e) = store.move_alerts(monitor_id, backoff).await {
            warn!(monitor_id, error = %e, "failed to move alerts after monitor change");
        }
        let _ = new_monitor;
    }
}

/// Runs one monitor on a fixed interval until `stop` fires, independent of
/// any other monitor's schedule.
pub async fn run_monitor_loop<C, R>(
    runner: Arc<MonitorRunner<C, R>>,
    monitor: Monitor,
    interval: Duration,
    mut stop: tokio::sync::watch::Receiver<bool>,
) where
    C: ClusterClient + 'static,
    R: notify::DestinationRegistry + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => {
                info!(monitor = %monitor.id, "stopping monitor loop");
                return;
            }
            _ = ticker.tick() => {
                let period_end = Utc::now();
                let period_start = period_end - chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::minutes(1));
                let result = runner.run_monitor(&monitor, period_start, period_end, false).await;
                if let Some(error) = &result.error {
                    warn!(monitor = %monitor.id, error, "monitor run completed with error");
                } else {
                    info!(monitor = %monitor.id, triggers = result.trigger_results.len(), "monitor run completed");
                }
            }
        }
    }
}

/// The supervisory scope the external scheduler's entry points run under.
///
/// `start()`-equivalent is simply constructing one: it owns an empty
/// [`tokio::task::JoinSet`] that `run_job`/`post_index`/`post_delete` spawn
/// child tasks onto. Child failures (panics, errors) are isolated to that
/// task; they neither cancel siblings nor the supervisor itself, which is
/// `JoinSet`'s native behavior rather than bespoke logic. `stop()` is the
/// only way to cancel in-flight work, and it cancels everything still
/// running at its next suspension point.
pub struct MonitorSupervisor<C, R> {
    runner: Arc<MonitorRunner<C, R>>,
    tasks: tokio::task::JoinSet<()>,
}

impl<C, R> MonitorSupervisor<C, R>
where
    C: ClusterClient + 'static,
    R: notify::DestinationRegistry + 'static,
{
    #[must_use]
    pub fn new(runner: Arc<MonitorRunner<C, R>>) -> Self {
        Self { runner, tasks: tokio::task::JoinSet::new() }
    }

    /// Spawns and awaits one monitor run under the supervisor, so a
    /// `stop()` mid-run still cancels it at its next suspension point.
    /// Only `Job::Monitor` is understood; any other job kind the scheduler
    /// might dispatch to the same endpoint is rejected outright.
    pub async fn run_job(
        &mut self,
        job: Job,
        period_start: chrono::DateTime<Utc>,
        period_end: chrono::DateTime<Utc>,
        dryrun: bool,
    ) -> Result<MonitorRunResult, RunnerError> {
        let Job::Monitor(monitor) = job else {
            return Err(RunnerError::InvalidJobType(
                "runJob only accepts Monitor jobs".to_string(),
            ));
        };

        let runner = Arc::clone(&self.runner);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.tasks.spawn(async move {
            let result = runner.run_monitor(&monitor, period_start, period_end, dryrun).await;
            let _ = tx.send(result);
        });

        rx.await.map_err(|_| RunnerError::JobCancelled)
    }

    /// Triggers alert-move for a reindexed monitor. Errors are logged, not
    /// propagated, matching the scheduler callback contract.
    pub fn post_index(&mut self, monitor: Monitor) {
        let runner = Arc::clone(&self.runner);
        let monitor_id = monitor.id.clone();
        self.tasks.spawn(async move {
            runner.on_monitor_changed(&monitor_id, Some(&monitor)).await;
        });
    }

    /// Triggers alert-move for a deleted monitor. Errors are logged, not
    /// propagated, matching the scheduler callback contract.
    pub fn post_delete(&mut self, monitor_id: String) {
        let runner = Arc::clone(&self.runner);
        self.tasks.spawn(async move {
            runner.on_monitor_changed(&monitor_id, None).await;
        });
    }

    /// Cancels every in-flight monitor run at its next suspension point.
    /// Partial state (a publish that already succeeded, a save that
    /// hasn't) may remain; no compensating action is attempted.
    pub fn stop(&mut self) {
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{BulkOp, BulkResponse};
    use crate::error::ClusterError;
    use crate::model::{Input, MonitorUser, Trigger};
    use notify::InMemoryDestinationRegistry;
    use std::collections::HashMap as StdHashMap;

    struct StubCluster;

    #[async_trait::async_trait]
    impl ClusterClient for StubCluster {
        async fn search(
            &self,
            _indices: &[String],
            _query: &serde_json::Value,
            _routing: &str,
        ) -> Result<Vec<StdHashMap<String, serde_json::Value>>, ClusterError> {
            let mut doc = StdHashMap::new();
            doc.insert("count".to_string(), serde_json::json!(5));
            Ok(vec![doc])
        }
        async fn bulk(&self, _ops: &[BulkOp]) -> Result<BulkResponse, ClusterError> {
            Ok(BulkResponse { items: Vec::new() })
        }
        async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    fn monitor() -> Monitor {
        Monitor {
            id: crate::model::NO_ID.to_string(),
            name: "test-monitor".to_string(),
            owner: Some(MonitorUser { name: "alice".to_string(), backend_roles: vec!["analyst".to_string()] }),
            inputs: vec![Input::Search {
                query_template: r#"{"query":{"match_all":{}}}"#.to_string(),
                indices: vec!["logs-*".to_string()],
            }],
            triggers: vec![Trigger {
                id: "t1".to_string(),
                name: "high count".to_string(),
                condition: "count >= 5".to_string(),
                actions: Vec::new(),
            }],
            is_ad_monitor: false,
        }
    }

    fn saved_monitor() -> Monitor {
        let mut m = monitor();
        m.id = "m1".to_string();
        m
    }

    #[tokio::test]
    async fn unsaved_monitor_runs_without_touching_alert_store() {
        let cluster = Arc::new(StubCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = MonitorRunner::new(cluster, config, settings, registry);

        let now = Utc::now();
        let result = runner
            .run_monitor(&monitor(), now - chrono::Duration::minutes(1), now, false)
            .await;

        assert!(result.error.is_none());
        let trigger_result = result.trigger_results.get("t1").unwrap();
        assert!(trigger_result.triggered);
    }

    struct FailingEnsureCluster;

    #[async_trait::async_trait]
    impl ClusterClient for FailingEnsureCluster {
        async fn search(
            &self,
            _indices: &[String],
            _query: &serde_json::Value,
            _routing: &str,
        ) -> Result<Vec<StdHashMap<String, serde_json::Value>>, ClusterError> {
            Ok(Vec::new())
        }
        async fn bulk(&self, _ops: &[BulkOp]) -> Result<BulkResponse, ClusterError> {
            Ok(BulkResponse { items: Vec::new() })
        }
        async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
            Err(ClusterError::NonOk { status: 503, body: "unavailable".to_string() })
        }
    }

    #[tokio::test]
    async fn failed_index_setup_aborts_the_run_without_writing_alerts() {
        let cluster = Arc::new(FailingEnsureCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = MonitorRunner::new(cluster, config, settings, registry);

        let now = Utc::now();
        let result = runner
            .run_monitor(&saved_monitor(), now - chrono::Duration::minutes(1), now, false)
            .await;

        assert!(result.error.is_some());
        assert!(result.trigger_results.is_empty());
    }

    #[tokio::test]
    async fn dryrun_suppresses_alert_persistence() {
        let cluster = Arc::new(StubCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = MonitorRunner::new(cluster, config, settings, registry);

        let now = Utc::now();
        let result = runner
            .run_monitor(&saved_monitor(), now - chrono::Duration::minutes(1), now, true)
            .await;

        assert!(result.error.is_none());
        let trigger_result = result.trigger_results.get("t1").unwrap();
        assert!(trigger_result.triggered);
    }

    #[tokio::test]
    async fn supervisor_rejects_non_monitor_jobs() {
        let cluster = Arc::new(StubCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = Arc::new(MonitorRunner::new(cluster, config, settings, registry));
        let mut supervisor = MonitorSupervisor::new(runner);

        let now = Utc::now();
        let result = supervisor
            .run_job(Job::Other("report".to_string()), now, now, false)
            .await;

        assert!(matches!(result, Err(RunnerError::InvalidJobType(_))));
    }

    #[tokio::test]
    async fn supervisor_runs_a_monitor_job_and_returns_its_result() {
        let cluster = Arc::new(StubCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = Arc::new(MonitorRunner::new(cluster, config, settings, registry));
        let mut supervisor = MonitorSupervisor::new(runner);

        let now = Utc::now();
        let result = supervisor
            .run_job(Job::Monitor(monitor()), now - chrono::Duration::minutes(1), now, false)
            .await
            .unwrap();

        assert!(result.trigger_results.get("t1").unwrap().triggered);
    }

    #[tokio::test]
    async fn supervisor_post_delete_does_not_panic_the_supervisor() {
        let cluster = Arc::new(StubCluster);
        let config = monitor_config::StaticConfig::default();
        let settings = Arc::new(SettingsWatcher::new(monitor_config::RunnerSettings::default()));
        let registry = Arc::new(InMemoryDestinationRegistry::new());
        let runner = Arc::new(MonitorRunner::new(cluster, config, settings, registry));
        let mut supervisor = MonitorSupervisor::new(runner);

        supervisor.post_delete("m1".to_string());
        supervisor.stop();
    }
}
