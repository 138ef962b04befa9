//! Single-writer-atomic settings snapshot with background reload.
//!
//! Settings updates apply atomically; an in-flight monitor run keeps the
//! snapshot it started with. `SettingsWatcher` wraps an
//! `ArcSwap<RunnerSettings>` so readers can `load()` a cheap `Arc` clone
//! without ever holding a lock across an await point, and a background
//! poll loop periodically re-reads the source and swaps the new snapshot
//! in, broadcasting the change over a `watch` channel for anything that
//! wants to react to a reload rather than just pick it up on next read.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::settings::RunnerSettings;

/// Anything that can produce a fresh `RunnerSettings` snapshot: a cluster
/// settings API call, a config file re-read, or (in tests) a fixed value.
#[async_trait]
pub trait SettingsSource: Send + Sync + 'static {
    async fn load(&self) -> Result<RunnerSettings, ConfigError>;
}

/// Holds the live settings snapshot and (optionally) a background poller
/// that keeps it fresh.
pub struct SettingsWatcher {
    current: Arc<ArcSwap<RunnerSettings>>,
    changed_tx: watch::Sender<u64>,
    generation: std::sync::atomic::AtomicU64,
}

impl SettingsWatcher {
    /// Create a watcher seeded with an initial snapshot.
    #[must_use]
    pub fn new(initial: RunnerSettings) -> Self {
        let (changed_tx, _rx) = watch::channel(0);
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            changed_tx,
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Snapshot the current settings. Cheap (an `Arc` clone) and safe to
    /// call on the hot path; callers should snapshot once per `runMonitor`
    /// invocation and thread the snapshot through rather than re-loading.
    #[must_use]
    pub fn load(&self) -> Arc<RunnerSettings> {
        self.current.load_full()
    }

    /// Subscribe to reload notifications (the new generation number, not
    /// the settings themselves — subscribers call `load()` for that).
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    /// Atomically replace the settings snapshot.
    pub fn apply(&self, new: RunnerSettings) {
        self.current.store(Arc::new(new));
        let gen = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        // No receivers is not an error: notifications are best-effort.
        let _ = self.changed_tx.send(gen);
    }

    /// Spawn a background task that polls `source` every `interval` and
    /// applies whatever it returns. Source errors are logged and leave the
    /// previous snapshot live (a transient settings-API outage should not
    /// stall monitor runs using stale-but-valid settings).
    pub fn spawn_poll_loop<S: SettingsSource>(
        self: &Arc<Self>,
        source: S,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match source.load().await {
                    Ok(settings) => {
                        debug!("applied reloaded runner settings");
                        watcher.apply(settings);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to reload runner settings, keeping previous snapshot");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(RunnerSettings);

    #[async_trait]
    impl SettingsSource for FixedSource {
        async fn load(&self) -> Result<RunnerSettings, ConfigError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SettingsSource for FailingSource {
        async fn load(&self) -> Result<RunnerSettings, ConfigError> {
            Err(ConfigError::SourceUnavailable("down".to_string()))
        }
    }

    #[test]
    fn apply_replaces_snapshot_atomically() {
        let watcher = SettingsWatcher::new(RunnerSettings::default());
        let before = watcher.load();
        assert_eq!(before.alert_backoff.count, 3);

        let mut updated = RunnerSettings::default();
        updated.alert_backoff.count = 9;
        watcher.apply(updated);

        let after = watcher.load();
        assert_eq!(after.alert_backoff.count, 9);
        // The snapshot taken before the reload is untouched.
        assert_eq!(before.alert_backoff.count, 3);
    }

    #[tokio::test]
    async fn poll_loop_applies_source_updates() {
        let mut settings = RunnerSettings::default();
        settings.alert_backoff.count = 7;
        let watcher = Arc::new(SettingsWatcher::new(RunnerSettings::default()));
        let handle = watcher.spawn_poll_loop(FixedSource(settings), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(watcher.load().alert_backoff.count, 7);
        handle.abort();
    }

    #[tokio::test]
    async fn poll_loop_keeps_previous_snapshot_on_source_failure() {
        let watcher = Arc::new(SettingsWatcher::new(RunnerSettings::default()));
        let handle = watcher.spawn_poll_loop(FailingSource, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(watcher.load().alert_backoff.count, 3);
        handle.abort();
    }

    #[test]
    fn subscribers_see_generation_bump() {
        let watcher = SettingsWatcher::new(RunnerSettings::default());
        let mut rx = watcher.subscribe();
        watcher.apply(RunnerSettings::default());
        assert!(rx.has_changed().unwrap_or(false));
    }
}
