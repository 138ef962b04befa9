//! Concrete destination implementations.

pub mod slack;
pub mod sns;
pub mod webhook;

pub use slack::SlackDestination;
pub use sns::SnsDestination;
pub use webhook::WebhookDestination;

use std::collections::HashSet;

/// Returns true if `url` resolves to a host on `deny_list`.
///
/// Checked before the HTTP call is issued: a denied host must never see a
/// request, not even one that's expected to fail downstream. Matches exact
/// host and suffix (`deny "internal.example.com"` also denies
/// `metadata.internal.example.com`).
#[must_use]
pub fn host_denied(url: &str, deny_list: &HashSet<String>) -> bool {
    if deny_list.is_empty() {
        return false;
    }
    let Ok(parsed) = url::Url::parse(url) else {
        // An unparsable destination URL cannot be proven safe; treat it as
        // non-denied here and let the HTTP client reject it on its own.
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    deny_list
        .iter()
        .any(|denied| host == denied || host.ends_with(&format!(".{denied}")))
}
