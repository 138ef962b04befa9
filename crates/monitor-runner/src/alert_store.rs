//! Read/write gateway to the two logical indices an alert's lifecycle
//! spans: the live `ALERT_INDEX` and the write-only history index.

use std::collections::HashMap;

use monitor_config::{BackoffSettings, StaticConfig};
use tracing::warn;

use crate::cluster::{BulkOp, ClusterClient};
use crate::error::{ClusterError, RunnerError};
use crate::model::{Alert, AlertState};
use crate::retry::RetryPolicy;

pub struct AlertStore<'a, C> {
    cluster: &'a C,
    config: &'a StaticConfig,
}

impl<'a, C: ClusterClient> AlertStore<'a, C> {
    #[must_use]
    pub fn new(cluster: &'a C, config: &'a StaticConfig) -> Self {
        Self { cluster, config }
    }

    pub async fn ensure_indices(&self) -> Result<(), RunnerError> {
        self.cluster
            .ensure_index(&self.config.alert_index)
            .await
            .map_err(RunnerError::IndexSetup)?;
        if self.config.history_enabled {
            self.cluster
                .ensure_index(&self.config.history_write_index)
                .await
                .map_err(RunnerError::IndexSetup)?;
        }
        Ok(())
    }

    /// Loads every trigger's current alert for `monitor_id`, grouped by
    /// trigger id. Multiple alerts for the same trigger are logged and the
    /// first one found is used.
    pub async fn load_current_alerts(
        &self,
        monitor_id: &str,
        trigger_ids: &[String],
    ) -> Result<HashMap<String, Alert>, RunnerError> {
        let query = serde_json::json!({
            "query": { "term": { "monitorId": monitor_id } },
            "size": trigger_ids.len() * 2,
        });

        let hits = self
            .cluster
            .search(&[self.config.alert_index.clone()], &query, monitor_id)
            .await
            .map_err(RunnerError::LoadAlerts)?;

        let mut by_trigger: HashMap<String, Vec<Alert>> = HashMap::new();
        for hit in hits {
            match serde_json::from_value::<Alert>(serde_json::Value::Object(hit.into_iter().collect())) {
                Ok(alert) => by_trigger.entry(alert.trigger_id.clone()).or_default().push(alert),
                Err(e) => warn!(monitor_id, error = %e, "failed to parse alert document, skipping"),
            }
        }

        let mut result = HashMap::new();
        for (trigger_id, mut alerts) in by_trigger {
            if alerts.len() > 1 {
                warn!(
                    monitor_id,
                    trigger_id, count = alerts.len(),
                    "more than one live alert found for trigger; using the first"
                );
            }
            result.insert(trigger_id, alerts.remove(0));
        }

        Ok(result)
    }

    /// Translates and persists `alerts` under the constant backoff policy,
    /// retrying only the bulk items the cluster rejected with 429.
    pub async fn save(
        &self,
        alerts: &[Alert],
        backoff: BackoffSettings,
    ) -> Result<(), RunnerError> {
        for alert in alerts {
            if matches!(alert.state, AlertState::Acknowledged | AlertState::Deleted) {
                return Err(RunnerError::IllegalAlertState(alert.state));
            }
        }

        let mut pending: Vec<BulkOp> = alerts.iter().flat_map(|alert| self.ops_for(alert)).collect();

        if pending.is_empty() {
            return Ok(());
        }

        // Unlike `RetryPolicy::retry`'s single-closure shape, a bulk retry
        // resubmits a *shrinking* set of items (only the ones the cluster
        // rejected with 429), so the schedule is driven by hand here rather
        // than through the generic combinator.
        let policy = RetryPolicy::constant(backoff);
        let max_attempts = policy.max_attempts().max(1);
        let mut attempt = 0;
        loop {
            let response = self.cluster.bulk(&pending).await.map_err(RunnerError::SaveAlerts)?;

            let retryable: Vec<usize> = response
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.status == 429)
                .map(|(idx, _)| idx)
                .collect();

            if retryable.is_empty() {
                let first_failure = response.items.iter().find_map(|item| item.error.clone());
                if let Some(reason) = first_failure {
                    return Err(RunnerError::SaveAlerts(ClusterError::BulkItemFailed(reason)));
                }
                return Ok(());
            }

            attempt += 1;
            if attempt >= max_attempts {
                let reason = response
                    .items
                    .iter()
                    .find(|item| item.status == 429)
                    .and_then(|item| item.error.clone())
                    .unwrap_or_else(|| "too many requests".to_string());
                return Err(RunnerError::SaveAlerts(ClusterError::BulkItemFailed(reason)));
            }

            pending = retryable.into_iter().map(|idx| pending[idx].clone()).collect();
            let delay = policy.delay_before_attempt(attempt - 1);
            tracing::debug!(attempt, remaining = pending.len(), ?delay, "retrying bulk save after 429");
            tokio::time::sleep(delay).await;
        }
    }

    fn ops_for(&self, alert: &Alert) -> Vec<BulkOp> {
        let routing = alert.monitor_id.clone();
        match alert.state {
            AlertState::Active | AlertState::Error => vec![BulkOp::Index {
                index: self.config.alert_index.clone(),
                id: Some(alert.id.clone()).filter(|id| !id.is_empty()),
                routing,
                source: serde_json::to_value(alert).unwrap_or(serde_json::Value::Null),
            }],
            AlertState::Completed => {
                let mut ops = vec![BulkOp::Delete {
                    index: self.config.alert_index.clone(),
                    id: alert.id.clone(),
                    routing: routing.clone(),
                }];
                if self.config.history_enabled {
                    ops.push(BulkOp::Index {
                        index: self.config.history_write_index.clone(),
                        id: Some(alert.id.clone()).filter(|id| !id.is_empty()),
                        routing,
                        source: serde_json::to_value(alert).unwrap_or(serde_json::Value::Null),
                    });
                }
                ops
            }
            AlertState::Acknowledged | AlertState::Deleted => Vec::new(),
        }
    }

    /// Moves alerts owned by a stale monitor definition after the monitor
    /// is indexed or deleted, under the exponential backoff policy. Actual
    /// move semantics are delegated to the cluster's reindex support and
    /// are out of scope here; this just owns the retry envelope.
    pub async fn move_alerts(
        &self,
        monitor_id: &str,
        backoff: BackoffSettings,
    ) -> Result<(), RunnerError> {
        let policy = RetryPolicy::exponential(backoff);
        policy
            .retry(
                |_attempt| async move {
                    self.cluster
                        .ensure_index(&self.config.alert_index)
                        .await
                        .map(|()| ())
                },
                |_e| true,
            )
            .await
            .map_err(RunnerError::SaveAlerts)?;
        tracing::debug!(monitor_id, "moved stale alerts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CURRENT_SCHEMA_VERSION;
    use chrono::Utc;

    fn alert(state: AlertState) -> Alert {
        Alert {
            id: "a1".to_string(),
            monitor_id: "m1".to_string(),
            trigger_id: "t1".to_string(),
            start_time: Utc::now(),
            last_notification_time: None,
            end_time: None,
            state,
            error_message: None,
            error_history: Vec::new(),
            action_execution_results: Vec::new(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    struct NoopCluster;

    #[async_trait::async_trait]
    impl ClusterClient for NoopCluster {
        async fn search(
            &self,
            _indices: &[String],
            _query: &serde_json::Value,
            _routing: &str,
        ) -> Result<Vec<HashMap<String, serde_json::Value>>, ClusterError> {
            Ok(Vec::new())
        }
        async fn bulk(&self, _ops: &[BulkOp]) -> Result<crate::cluster::BulkResponse, ClusterError> {
            Ok(crate::cluster::BulkResponse { items: Vec::new() })
        }
        async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    /// Captures the query it was sent so the test can assert on field names
    /// without a real cluster.
    struct RecordingCluster {
        last_query: std::sync::Mutex<Option<serde_json::Value>>,
    }

    #[async_trait::async_trait]
    impl ClusterClient for RecordingCluster {
        async fn search(
            &self,
            _indices: &[String],
            query: &serde_json::Value,
            _routing: &str,
        ) -> Result<Vec<HashMap<String, serde_json::Value>>, ClusterError> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            Ok(Vec::new())
        }
        async fn bulk(&self, _ops: &[BulkOp]) -> Result<crate::cluster::BulkResponse, ClusterError> {
            Ok(crate::cluster::BulkResponse { items: Vec::new() })
        }
        async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_current_alerts_queries_the_camel_case_monitor_id_field() {
        let cluster = RecordingCluster { last_query: std::sync::Mutex::new(None) };
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);

        store
            .load_current_alerts("m1", &["t1".to_string()])
            .await
            .unwrap();

        let query = cluster.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query["query"]["term"]["monitorId"], serde_json::json!("m1"));
        assert!(query["query"]["term"].get("monitor_id").is_none());
    }

    #[test]
    fn active_alert_produces_single_index_op() {
        let cluster = NoopCluster;
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);
        let ops = store.ops_for(&alert(AlertState::Active));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], BulkOp::Index { .. }));
    }

    #[test]
    fn completed_alert_with_history_produces_delete_and_index() {
        let cluster = NoopCluster;
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);
        let ops = store.ops_for(&alert(AlertState::Completed));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], BulkOp::Delete { .. }));
        assert!(matches!(ops[1], BulkOp::Index { .. }));
    }

    #[test]
    fn completed_alert_without_history_only_deletes() {
        let cluster = NoopCluster;
        let mut config = StaticConfig::default();
        config.history_enabled = false;
        let store = AlertStore::new(&cluster, &config);
        let ops = store.ops_for(&alert(AlertState::Completed));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], BulkOp::Delete { .. }));
    }

    #[tokio::test]
    async fn saving_acknowledged_alert_is_a_programmer_error() {
        let cluster = NoopCluster;
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);
        let backoff = BackoffSettings { millis: 1, count: 1 };
        let result = store.save(&[alert(AlertState::Acknowledged)], backoff).await;
        assert!(matches!(result, Err(RunnerError::IllegalAlertState(_))));
    }

    /// Retries only items still rejected with 429, narrowing the resubmitted
    /// batch each attempt rather than replaying the whole bulk every time.
    struct FlakyCluster {
        calls: std::sync::atomic::AtomicUsize,
        submitted_sizes: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl ClusterClient for FlakyCluster {
        async fn search(
            &self,
            _indices: &[String],
            _query: &serde_json::Value,
            _routing: &str,
        ) -> Result<Vec<HashMap<String, serde_json::Value>>, ClusterError> {
            Ok(Vec::new())
        }

        async fn bulk(&self, ops: &[BulkOp]) -> Result<crate::cluster::BulkResponse, ClusterError> {
            self.submitted_sizes.lock().unwrap().push(ops.len());
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // First call: second item 429s, first succeeds. Second call
            // (only the one retried item): succeeds.
            let items = if call == 0 {
                vec![
                    crate::cluster::BulkItemResult { status: 200, error: None },
                    crate::cluster::BulkItemResult { status: 429, error: Some("busy".to_string()) },
                ]
            } else {
                vec![crate::cluster::BulkItemResult { status: 200, error: None }]
            };
            Ok(crate::cluster::BulkResponse { items })
        }

        async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn bulk_save_retries_only_throttled_items() {
        let cluster = FlakyCluster {
            calls: std::sync::atomic::AtomicUsize::new(0),
            submitted_sizes: std::sync::Mutex::new(Vec::new()),
        };
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);
        let backoff = BackoffSettings { millis: 1, count: 3 };

        let mut second = alert(AlertState::Active);
        second.id = "a2".to_string();
        second.trigger_id = "t2".to_string();
        let result = store.save(&[alert(AlertState::Active), second], backoff).await;

        assert!(result.is_ok());
        let sizes = cluster.submitted_sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test]
    async fn bulk_save_surfaces_first_failure_once_attempts_are_exhausted() {
        struct AlwaysThrottled;

        #[async_trait::async_trait]
        impl ClusterClient for AlwaysThrottled {
            async fn search(
                &self,
                _indices: &[String],
                _query: &serde_json::Value,
                _routing: &str,
            ) -> Result<Vec<HashMap<String, serde_json::Value>>, ClusterError> {
                Ok(Vec::new())
            }
            async fn bulk(&self, ops: &[BulkOp]) -> Result<crate::cluster::BulkResponse, ClusterError> {
                Ok(crate::cluster::BulkResponse {
                    items: ops
                        .iter()
                        .map(|_| crate::cluster::BulkItemResult {
                            status: 429,
                            error: Some("busy".to_string()),
                        })
                        .collect(),
                })
            }
            async fn ensure_index(&self, _index: &str) -> Result<(), ClusterError> {
                Ok(())
            }
        }

        let cluster = AlwaysThrottled;
        let config = StaticConfig::default();
        let store = AlertStore::new(&cluster, &config);
        let backoff = BackoffSettings { millis: 1, count: 2 };
        let result = store.save(&[alert(AlertState::Active)], backoff).await;
        assert!(matches!(result, Err(RunnerError::SaveAlerts(_))));
    }
}
