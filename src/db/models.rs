//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::stats::Summary;

/// Health state of a monitored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            other => Err(format!("unknown health status: {}", other)),
        }
    }
}

/// Which HTTP status codes count as a healthy probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedStatus {
    /// Any status in [200, 300).
    #[default]
    Success2xx,
    /// An explicit allow-list of status codes.
    Codes(Vec<u16>),
}

impl ExpectedStatus {
    pub fn accepts(&self, code: u16) -> bool {
        match self {
            ExpectedStatus::Success2xx => is_success_code(code),
            ExpectedStatus::Codes(codes) => codes.contains(&code),
        }
    }
}

/// Returns true for status codes in [200, 300).
pub fn is_success_code(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Load campaign parameters attached to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressConfig {
    /// Requests issued concurrently per round.
    pub concurrency: u32,
    /// Total wall-clock duration of the campaign in seconds.
    pub duration_secs: f64,
    /// Pause between rounds in seconds.
    pub pause_secs: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            duration_secs: 10.0,
            pause_secs: 1.0,
        }
    }
}

/// A monitored endpoint: configuration plus its mutable health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body_template: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout: f64,
    pub expected_status: ExpectedStatus,
    pub stress: Option<StressConfig>,

    pub status: HealthStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_response: Option<String>,
    pub last_latency_ms: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body_template: None,
            timeout: 10.0,
            expected_status: ExpectedStatus::default(),
            stress: None,
            status: HealthStatus::Unknown,
            error_count: 0,
            last_error: None,
            last_response: None,
            last_latency_ms: None,
            last_checked: None,
        }
    }
}

impl Target {
    /// Apply a health update in place, as the store would persist it.
    pub fn apply(&mut self, update: &HealthUpdate) {
        self.status = update.status;
        self.error_count = update.error_count;
        self.last_error = update.last_error.clone();
        self.last_response = update.last_response.clone();
        self.last_latency_ms = Some(update.last_latency_ms);
        self.last_checked = Some(update.last_checked);
    }
}

/// Health fields produced by one probe, to be persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub status: HealthStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_response: Option<String>,
    pub last_latency_ms: f64,
    pub last_checked: DateTime<Utc>,
}

/// Result of a single request attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: HealthStatus,
    /// Elapsed time in milliseconds.
    pub latency_ms: f64,
    /// HTTP status code, or 0 if the call never completed.
    pub status_code: u16,
    /// Response body, truncated and possibly pretty-printed.
    pub body: Option<String>,
    /// Size of the full response body in bytes, before truncation.
    pub response_size: usize,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl Outcome {
    /// An unhealthy outcome for a call that never produced a response.
    pub fn failed(error: impl Into<String>, latency_ms: f64, time: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms,
            status_code: 0,
            body: None,
            response_size: 0,
            error: Some(error.into()),
            time,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// One completed load campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub target_id: i64,
    pub config: StressConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Measured wall-clock duration in seconds.
    pub elapsed_secs: f64,
    /// True if the campaign ended early because of a stop request.
    pub stopped: bool,
    pub outcomes: Vec<Outcome>,
    pub summary: Summary,
    pub error: Option<String>,
}
