//! HTTP probe implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{validate_target, Payload, PayloadRegistry, ProbeError, Prober};
use crate::db::{HealthStatus, Outcome, Target};

/// Maximum number of response body bytes kept on an outcome.
pub const MAX_BODY_BYTES: usize = 2000;

/// Timeout used when a target has none configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENT: &str = concat!("apiwatch/", env!("CARGO_PKG_VERSION"));

/// Error label for requests that exceeded their timeout.
pub const ERR_TIMEOUT: &str = "timeout";
/// Error label for requests that could not connect.
pub const ERR_CONNECTION: &str = "connection error";

/// Executes single HTTP requests for targets.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    payloads: Arc<PayloadRegistry>,
    /// Upper bound applied on top of each target's own timeout.
    timeout_cap: Option<Duration>,
}

impl HttpProber {
    /// Create a prober for periodic health checks.
    pub fn new(payloads: Arc<PayloadRegistry>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            payloads,
            timeout_cap: None,
        })
    }

    /// Create a prober sized for a load campaign.
    ///
    /// The idle pool holds `2 * concurrency` connections per host and every
    /// request is bounded by `session_timeout` in addition to the target's
    /// own timeout.
    pub fn for_campaign(
        payloads: Arc<PayloadRegistry>,
        concurrency: u32,
        session_timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let pool_size = (concurrency as usize).saturating_mul(2).max(1);
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(pool_size)
            .timeout(session_timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            payloads,
            timeout_cap: Some(session_timeout),
        })
    }

    /// The timeout that will actually apply to a request for `target`.
    pub fn effective_timeout(&self, target: &Target) -> Duration {
        let own = target_timeout(target);
        match self.timeout_cap {
            Some(cap) => own.min(cap),
            None => own,
        }
    }

    /// Perform one request and classify the result.
    pub async fn execute(&self, target: &Target) -> Outcome {
        let time = Utc::now();

        let method = match validate_target(target) {
            Ok(m) => m,
            Err(e) => return Outcome::failed(e.to_string(), 0.0, time),
        };

        let timeout = self.effective_timeout(target);
        let mut request = self
            .client
            .request(method.to_reqwest(), &target.url)
            .timeout(timeout);

        for (name, value) in &target.headers {
            request = request.header(name, value);
        }

        match self
            .payloads
            .payload_for(method, &target.url, target.body_template.as_deref())
        {
            Payload::None => {}
            Payload::Json(value) => request = request.json(&value),
            Payload::Raw(text) => request = request.body(text),
        }

        let start = Instant::now();

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return classify_error(&e, timeout, time),
        };

        let status_code = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_content_type)
            .unwrap_or(false);

        // Read the full body to measure complete transfer time
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return classify_error(&e, timeout, time),
        };

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let text = String::from_utf8_lossy(&bytes);
        let body = format_body(truncate_body(&text, MAX_BODY_BYTES), is_json);

        let (status, error) = if target.expected_status.accepts(status_code) {
            (HealthStatus::Healthy, None)
        } else {
            (HealthStatus::Unhealthy, Some(format!("HTTP {}", status_code)))
        };

        tracing::debug!(
            "Probe {} {} -> {} in {:.1}ms",
            method,
            target.url,
            status_code,
            latency_ms
        );

        Outcome {
            status,
            latency_ms,
            status_code,
            body: Some(body),
            response_size: bytes.len(),
            error,
            time,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target) -> Outcome {
        self.execute(target).await
    }
}

fn target_timeout(target: &Target) -> Duration {
    if target.timeout > 0.0 {
        Duration::try_from_secs_f64(target.timeout).unwrap_or(DEFAULT_TIMEOUT)
    } else {
        DEFAULT_TIMEOUT
    }
}

fn classify_error(err: &reqwest::Error, timeout: Duration, time: DateTime<Utc>) -> Outcome {
    if err.is_timeout() {
        Outcome::failed(ERR_TIMEOUT, timeout.as_secs_f64() * 1000.0, time)
    } else if err.is_connect() {
        Outcome::failed(ERR_CONNECTION, 0.0, time)
    } else {
        Outcome::failed(err.to_string(), 0.0, time)
    }
}

/// Cut `text` to at most `max` bytes without splitting a character.
pub fn truncate_body(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Media types are case-insensitive.
fn is_json_content_type(value: &str) -> bool {
    value
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("application/json")
}

/// Pretty-print JSON bodies; anything that fails to parse is kept as is.
fn format_body(text: &str, is_json: bool) -> String {
    if is_json {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prober() -> HttpProber {
        HttpProber::new(Arc::new(PayloadRegistry::empty())).unwrap()
    }

    #[tokio::test]
    async fn test_http_probe_invalid_address() {
        let target = Target {
            url: "http://256.256.256.256".to_string(),
            timeout: 0.1,
            ..Default::default()
        };
        let outcome = prober().execute(&target).await;
        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert_eq!(outcome.status_code, 0);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_method_is_unhealthy() {
        let target = Target {
            url: "http://127.0.0.1:9".to_string(),
            method: "TRACE".to_string(),
            ..Default::default()
        };
        let outcome = prober().execute(&target).await;
        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert_eq!(outcome.latency_ms, 0.0);
        assert_eq!(outcome.error.as_deref(), Some("unsupported HTTP method: TRACE"));
    }

    #[test]
    fn test_truncate_body_char_boundary() {
        assert_eq!(truncate_body("hello", 10), "hello");
        assert_eq!(truncate_body("hello", 3), "hel");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_body("aé", 2), "a");
    }

    #[test]
    fn test_json_content_type_ignores_case() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn test_format_body() {
        assert_eq!(format_body(r#"{"a":1}"#, true), "{\n  \"a\": 1\n}");
        assert_eq!(format_body(r#"{"a":"#, true), r#"{"a":"#);
        assert_eq!(format_body(r#"{"a":1}"#, false), r#"{"a":1}"#);
    }

    #[test]
    fn test_effective_timeout_is_tighter() {
        let campaign = HttpProber::for_campaign(
            Arc::new(PayloadRegistry::empty()),
            4,
            Duration::from_secs(30),
        )
        .unwrap();

        let slow = Target {
            timeout: 60.0,
            ..Default::default()
        };
        assert_eq!(campaign.effective_timeout(&slow), Duration::from_secs(30));

        let fast = Target {
            timeout: 2.0,
            ..Default::default()
        };
        assert_eq!(campaign.effective_timeout(&fast), Duration::from_secs(2));

        let unset = Target {
            timeout: 0.0,
            ..Default::default()
        };
        assert_eq!(prober().effective_timeout(&unset), DEFAULT_TIMEOUT);
    }
}
