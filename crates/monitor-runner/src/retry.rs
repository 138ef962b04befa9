//! Two named backoff shapes shared by the alert store: constant (alert
//! saves) and exponential (alert moves on monitor reconfigure).
//!
//! Both read their `(delay, attempts)` from a settings snapshot taken once
//! at the start of an operation; an in-flight retry sequence keeps that
//! snapshot even if settings reload mid-sequence.

use std::time::Duration;

use monitor_config::BackoffSettings;
use tracing::debug;

/// A retry schedule: how long to wait before the Nth retry.
#[derive(Debug, Clone, Copy)]
pub enum RetryPolicy {
    /// Fixed delay between every attempt.
    Constant { delay: Duration, max_attempts: u32 },
    /// Delay doubles after every attempt, starting from `initial_delay`.
    Exponential {
        initial_delay: Duration,
        max_attempts: u32,
    },
}

impl RetryPolicy {
    #[must_use]
    pub fn constant(settings: BackoffSettings) -> Self {
        Self::Constant {
            delay: Duration::from_millis(settings.millis),
            max_attempts: settings.count,
        }
    }

    #[must_use]
    pub fn exponential(settings: BackoffSettings) -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(settings.millis),
            max_attempts: settings.count,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Constant { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }

    pub(crate) fn delay_before_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant { delay, .. } => *delay,
            Self::Exponential { initial_delay, .. } => {
                initial_delay.saturating_mul(1 << attempt.min(20))
            }
        }
    }

    /// Run `op`, retrying per this schedule while `should_retry(&error)` is
    /// true and attempts remain. Returns the last error once attempts are
    /// exhausted or the predicate rejects it.
    pub async fn retry<T, E, Fut>(
        &self,
        mut op: impl FnMut(u32) -> Fut,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts().max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt >= max_attempts || !should_retry(&error) {
                        return Err(error);
                    }
                    let delay = self.delay_before_attempt(attempt - 1);
                    debug!(attempt, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
