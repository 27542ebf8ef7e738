//! Failure notifications.

use async_trait::async_trait;
use std::str::FromStr;

use crate::db::Target;

/// When a target that stays over the error threshold is notified again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Notify on every sweep while the error streak is at or above the threshold.
    #[default]
    RepeatEverySweep,
    /// Notify the first time a target crosses the threshold, then never again
    /// while the monitor is running.
    EdgeTriggered,
    /// Notify once per failure streak; a healthy probe re-arms the alert.
    RearmAfterRecovery,
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "repeat" => Ok(NotifyPolicy::RepeatEverySweep),
            "once" => Ok(NotifyPolicy::EdgeTriggered),
            "rearm" => Ok(NotifyPolicy::RearmAfterRecovery),
            other => Err(format!("unknown notify policy: {}", other)),
        }
    }
}

/// Receives alerts for targets whose error streak reached the threshold.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &Target);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, target: &Target) {
        tracing::warn!("{}", format_alert(target));
    }
}

/// Human-readable alert text for a failing target.
pub fn format_alert(target: &Target) -> String {
    let last_checked = target
        .last_checked
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "API failing: {} ({}) consecutive errors: {}, last error: {}, last checked: {}",
        target.name,
        target.url,
        target.error_count,
        target.last_error.as_deref().unwrap_or("unknown error"),
        last_checked
    )
}
