//! Aggregate statistics over a set of request outcomes.
//!
//! Everything here is a pure function of its inputs, so a summary can be
//! recomputed from a stored outcome list at any time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::db::{is_success_code, Outcome};

/// Bucket for failed outcomes that carry no error label.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// How an outcome is decided to be a success when aggregating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessRule {
    /// HTTP status code in [200, 300).
    #[default]
    StatusCode,
    /// The healthy/unhealthy label stored on the outcome.
    Label,
}

impl SuccessRule {
    fn is_success(&self, outcome: &Outcome) -> bool {
        match self {
            SuccessRule::StatusCode => is_success_code(outcome.status_code),
            SuccessRule::Label => outcome.is_healthy(),
        }
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Summary statistics for a campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Percentage of successful outcomes, in [0, 100].
    pub success_rate: f64,
    pub min_latency_ms: f64,
    pub mean_latency_ms: f64,
    pub median_latency_ms: f64,
    pub max_latency_ms: f64,
    pub percentiles: LatencyPercentiles,
    pub requests_per_second: f64,
    /// Error label -> occurrence count, over failed outcomes only.
    pub errors: BTreeMap<String, usize>,
}

/// Summarize outcomes, classifying success by status code.
pub fn summarize(outcomes: &[Outcome], elapsed: Duration) -> Summary {
    summarize_with(outcomes, elapsed, SuccessRule::StatusCode)
}

/// Summarize outcomes using the given success rule.
pub fn summarize_with(outcomes: &[Outcome], elapsed: Duration, rule: SuccessRule) -> Summary {
    if outcomes.is_empty() {
        return Summary::default();
    }

    let total_count = outcomes.len();
    let mut success_count = 0;
    let mut errors: BTreeMap<String, usize> = BTreeMap::new();

    for outcome in outcomes {
        if rule.is_success(outcome) {
            success_count += 1;
        } else {
            let label = outcome.error.as_deref().unwrap_or(UNKNOWN_ERROR);
            *errors.entry(label.to_string()).or_insert(0) += 1;
        }
    }

    let mut latencies: Vec<f64> = outcomes.iter().map(|o| o.latency_ms.max(0.0)).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    let sum: f64 = latencies.iter().sum();

    Summary {
        total_count,
        success_count,
        failure_count: total_count - success_count,
        success_rate: success_count as f64 / total_count as f64 * 100.0,
        min_latency_ms: latencies[0],
        mean_latency_ms: sum / total_count as f64,
        median_latency_ms: median_sorted(&latencies),
        max_latency_ms: latencies[total_count - 1],
        percentiles: LatencyPercentiles {
            p50: percentile_sorted(&latencies, 50.0),
            p90: percentile_sorted(&latencies, 90.0),
            p95: percentile_sorted(&latencies, 95.0),
            p99: percentile_sorted(&latencies, 99.0),
        },
        requests_per_second: requests_per_second(total_count, elapsed),
        errors,
    }
}

/// Nearest-rank percentile: index = floor(p/100 * (n-1)), clamped to the slice.
///
/// Returns 0 for empty input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, p)
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let last = sorted.len() - 1;
    let rank = (p / 100.0 * last as f64).floor();
    let idx = if rank.is_nan() || rank < 0.0 {
        0
    } else {
        (rank as usize).min(last)
    };
    sorted[idx]
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Requests per second over the campaign wall-clock time; 0 when no time elapsed.
pub fn requests_per_second(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}
