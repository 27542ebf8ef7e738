//! Configuration module for apiwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::monitor::NotifyPolicy;

/// Rejected configuration values.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("check interval must be between 1 and 86400 seconds, got {0}")]
    CheckInterval(u64),
    #[error("error threshold must be between 1 and 100, got {0}")]
    ErrorThreshold(u32),
    #[error("request timeout must be in (0, 300] seconds, got {0}")]
    RequestTimeout(f64),
}

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between health sweeps (default: 60)
    pub check_interval_secs: u64,
    /// Consecutive errors before notifying (default: 3)
    pub error_threshold: u32,
    /// Default per-request timeout in seconds for new targets (default: 10)
    pub request_timeout_secs: f64,
    /// When to repeat notifications for a failing target
    pub notify_policy: NotifyPolicy,
    /// Upper bound of random delay before each probe in a sweep, in ms (default: 100)
    pub probe_jitter_ms: u64,
    /// Path to the SQLite database file (default: "apiwatch.db")
    pub db_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            error_threshold: 3,
            request_timeout_secs: 10.0,
            notify_policy: NotifyPolicy::default(),
            probe_jitter_ms: 100,
            db_path: "apiwatch.db".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APIWATCH_CHECK_INTERVAL`: seconds between sweeps (default: 60)
    /// - `APIWATCH_MAX_ERROR_COUNT`: notification threshold (default: 3)
    /// - `APIWATCH_REQUEST_TIMEOUT`: request timeout in seconds (default: 10)
    /// - `APIWATCH_NOTIFY_POLICY`: `repeat`, `once` or `rearm` (default: repeat)
    /// - `APIWATCH_PROBE_JITTER_MS`: max jitter before each probe (default: 100)
    /// - `APIWATCH_DB_PATH`: database file path (default: "apiwatch.db")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = parse_env("APIWATCH_CHECK_INTERVAL") {
            cfg.check_interval_secs = v;
        }
        if let Some(v) = parse_env("APIWATCH_MAX_ERROR_COUNT") {
            cfg.error_threshold = v;
        }
        if let Some(v) = parse_env("APIWATCH_REQUEST_TIMEOUT") {
            cfg.request_timeout_secs = v;
        }
        if let Some(v) = parse_env("APIWATCH_NOTIFY_POLICY") {
            cfg.notify_policy = v;
        }
        if let Some(v) = parse_env("APIWATCH_PROBE_JITTER_MS") {
            cfg.probe_jitter_ms = v;
        }
        if let Ok(db_path) = env::var("APIWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg
    }

    /// Check that all values are within their accepted ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=86400).contains(&self.check_interval_secs) {
            return Err(ConfigError::CheckInterval(self.check_interval_secs));
        }
        if !(1..=100).contains(&self.error_threshold) {
            return Err(ConfigError::ErrorThreshold(self.error_threshold));
        }
        if !(self.request_timeout_secs > 0.0 && self.request_timeout_secs <= 300.0) {
            return Err(ConfigError::RequestTimeout(self.request_timeout_secs));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_jitter(&self) -> Duration {
        Duration::from_millis(self.probe_jitter_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
