//! Hot-reloadable runner settings.
//!
//! These are the settings the upstream cluster's settings API exposes as a
//! flat dotted-key map (`alert.backoff.millis`, `destination.allow.list`,
//! ...). [`RunnerSettings::from_dotted`] parses that shape; the nested
//! struct is what the rest of the runner actually reads.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A single retry schedule's tunables: how long to wait before the first
/// retry, and how many attempts (including the initial one) to allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    pub millis: u64,
    pub count: u32,
}

impl BackoffSettings {
    const fn new(millis: u64, count: u32) -> Self {
        Self { millis, count }
    }
}

/// SNS static-credential publish mode.
///
/// Modeled as part of the settings snapshot, read fresh on every publish,
/// rather than as process-global mutable state: a reload mid-run never
/// changes the credentials an in-flight publish sees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnsSettings {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub enabled: bool,
}

impl SnsSettings {
    /// The key used to cache/lookup a per-credential SNS client.
    ///
    /// Insertion and lookup must use exactly the same key or the cache
    /// silently misses and rebuilds a client every call. Using this single
    /// function for both sides makes that divergence impossible:
    /// `accessKey|secretKey` when static-credential mode is on, otherwise
    /// the destination's resolved role ARN.
    #[must_use]
    pub fn client_cache_key(&self, role_arn: &str) -> String {
        if self.enabled {
            format!(
                "{}|{}",
                self.access_key.as_deref().unwrap_or_default(),
                self.secret_key.as_deref().unwrap_or_default()
            )
        } else {
            role_arn.to_string()
        }
    }
}

/// Destination-level policy: which destination types may be used, and which
/// publish hosts are forbidden regardless of destination type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSettings {
    pub allow_list: HashSet<String>,
    pub host_deny_list: HashSet<String>,
    pub sns: SnsSettings,
}

/// The full hot-reloadable settings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Backoff for `AlertStore::save` bulk retries (constant shape).
    pub alert_backoff: BackoffSettings,
    /// Backoff for `AlertStore::move_alerts` (exponential shape).
    pub move_alerts_backoff: BackoffSettings,
    pub destinations: DestinationSettings,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            alert_backoff: BackoffSettings::new(1_000, 3),
            move_alerts_backoff: BackoffSettings::new(1_000, 3),
            destinations: DestinationSettings::default(),
        }
    }
}

impl RunnerSettings {
    /// Parse from the cluster's flat dotted-key settings map, falling back
    /// to defaults for anything absent or unparsable.
    #[must_use]
    pub fn from_dotted(map: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();

        if let Some(v) = map.get("alert.backoff.millis").and_then(|s| s.parse().ok()) {
            settings.alert_backoff.millis = v;
        }
        if let Some(v) = map.get("alert.backoff.count").and_then(|s| s.parse().ok()) {
            settings.alert_backoff.count = v;
        }
        if let Some(v) = map
            .get("move.alerts.backoff.millis")
            .and_then(|s| s.parse().ok())
        {
            settings.move_alerts_backoff.millis = v;
        }
        if let Some(v) = map
            .get("move.alerts.backoff.count")
            .and_then(|s| s.parse().ok())
        {
            settings.move_alerts_backoff.count = v;
        }
        if let Some(v) = map.get("destination.allow.list") {
            settings.destinations.allow_list = split_csv(v);
        }
        if let Some(v) = map.get("destination.host.deny.list") {
            settings.destinations.host_deny_list = split_csv(v);
        }
        if let Some(v) = map.get("destination.sns.access.key") {
            settings.destinations.sns.access_key = Some(v.clone());
        }
        if let Some(v) = map.get("destination.sns.secret.key") {
            settings.destinations.sns.secret_key = Some(v.clone());
        }
        if let Some(v) = map.get("destination.sns.enabled") {
            settings.destinations.sns.enabled = v.eq_ignore_ascii_case("true");
        }

        settings
    }
}

fn split_csv(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.alert_backoff.count, 3);
        assert!(settings.destinations.allow_list.is_empty());
        assert!(!settings.destinations.sns.enabled);
    }

    #[test]
    fn from_dotted_parses_known_keys() {
        let mut map = HashMap::new();
        map.insert("alert.backoff.millis".to_string(), "500".to_string());
        map.insert("alert.backoff.count".to_string(), "5".to_string());
        map.insert(
            "destination.allow.list".to_string(),
            "slack, webhook ,sns".to_string(),
        );
        map.insert("destination.sns.enabled".to_string(), "true".to_string());

        let settings = RunnerSettings::from_dotted(&map);
        assert_eq!(settings.alert_backoff.millis, 500);
        assert_eq!(settings.alert_backoff.count, 5);
        assert!(settings.destinations.allow_list.contains("slack"));
        assert!(settings.destinations.allow_list.contains("webhook"));
        assert!(settings.destinations.sns.enabled);
    }

    #[test]
    fn from_dotted_ignores_unparsable_values() {
        let mut map = HashMap::new();
        map.insert("alert.backoff.millis".to_string(), "not-a-number".to_string());
        let settings = RunnerSettings::from_dotted(&map);
        assert_eq!(settings.alert_backoff.millis, RunnerSettings::default().alert_backoff.millis);
    }

    #[test]
    fn sns_cache_key_matches_on_insert_and_lookup() {
        let sns = SnsSettings {
            access_key: Some("AKIA".to_string()),
            secret_key: Some("shh".to_string()),
            enabled: true,
        };
        let insert_key = sns.client_cache_key("arn:aws:iam::123:role/unused");
        let lookup_key = sns.client_cache_key("arn:aws:iam::123:role/unused");
        assert_eq!(insert_key, lookup_key);
        assert_eq!(insert_key, "AKIA|shh");
    }

    #[test]
    fn sns_cache_key_falls_back_to_role_arn_when_disabled() {
        let sns = SnsSettings::default();
        assert_eq!(
            sns.client_cache_key("arn:aws:iam::123:role/x"),
            "arn:aws:iam::123:role/x"
        );
    }
}
