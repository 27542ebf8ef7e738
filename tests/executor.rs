mod common;

use apiwatch::db::{HealthStatus, Target};
use apiwatch::probe::{
    HttpProber, PayloadRegistry, PayloadRule, Prober, ERR_CONNECTION, ERR_TIMEOUT, MAX_BODY_BYTES,
    USER_AGENT,
};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn prober() -> HttpProber {
    HttpProber::new(Arc::new(PayloadRegistry::with_builtin_rules())).unwrap()
}

fn target(url: String, method: &str) -> Target {
    Target {
        id: 1,
        name: "mock".to_string(),
        url,
        method: method.to_string(),
        timeout: 5.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn healthy_json_response_is_pretty_printed() {
    let base = common::spawn_server().await;
    let outcome = prober().probe(&target(format!("{}/ok", base), "GET")).await;

    assert_eq!(outcome.status, HealthStatus::Healthy);
    assert_eq!(outcome.status_code, 200);
    assert!(outcome.error.is_none());
    assert!(outcome.latency_ms >= 0.0);

    let body = outcome.body.unwrap();
    assert!(body.contains("\n  \"status\": \"ok\""));
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["items"], json!([1, 2, 3]));
}

#[tokio::test]
async fn non_2xx_is_unhealthy_with_status_label() {
    let base = common::spawn_server().await;
    let outcome = prober().probe(&target(format!("{}/fail", base), "GET")).await;

    assert_eq!(outcome.status, HealthStatus::Unhealthy);
    assert_eq!(outcome.status_code, 503);
    assert_eq!(outcome.error.as_deref(), Some("HTTP 503"));
    assert_eq!(outcome.body.as_deref(), Some("down"));
}

#[tokio::test]
async fn timeout_reports_configured_timeout() {
    let base = common::spawn_server().await;
    let mut slow = target(format!("{}/slow", base), "GET");
    slow.timeout = 0.2;

    let outcome = prober().probe(&slow).await;
    assert_eq!(outcome.status, HealthStatus::Unhealthy);
    assert_eq!(outcome.status_code, 0);
    assert_eq!(outcome.error.as_deref(), Some(ERR_TIMEOUT));
    assert!((outcome.latency_ms - 200.0).abs() < 1e-6);
}

#[tokio::test]
async fn connection_failure_is_labelled() {
    let url = common::closed_url().await;
    let outcome = prober().probe(&target(url, "GET")).await;

    assert_eq!(outcome.status, HealthStatus::Unhealthy);
    assert_eq!(outcome.status_code, 0);
    assert_eq!(outcome.latency_ms, 0.0);
    assert_eq!(outcome.error.as_deref(), Some(ERR_CONNECTION));
}

#[tokio::test]
async fn timestamp_placeholders_are_filled_at_send_time() {
    let base = common::spawn_server().await;
    let mut post = target(format!("{}/echo", base), "POST");
    post.body_template = Some(
        r#"{"ts": "__TIMESTAMP__", "nested": {"ts": "{{timestamp}}"}, "keep": {"ts": 5}}"#.to_string(),
    );

    let before = Utc::now().timestamp_millis();
    let outcome = prober().probe(&post).await;
    let after = Utc::now().timestamp_millis();
    assert_eq!(outcome.status, HealthStatus::Healthy);

    let sent: Value = serde_json::from_str(outcome.body.as_deref().unwrap()).unwrap();
    for ts in [sent["ts"].as_i64().unwrap(), sent["nested"]["ts"].as_i64().unwrap()] {
        assert!(ts >= before - 1000 && ts <= after + 1000, "ts {} not near now", ts);
    }
    assert_eq!(sent["keep"]["ts"], 5);
}

#[tokio::test]
async fn unparseable_template_is_sent_verbatim() {
    let base = common::spawn_server().await;
    let mut put = target(format!("{}/echo", base), "PUT");
    put.body_template = Some("plain text {{timestamp}}".to_string());

    let outcome = prober().probe(&put).await;
    assert_eq!(outcome.body.as_deref(), Some("plain text {{timestamp}}"));
}

#[tokio::test]
async fn missing_template_uses_url_rule_then_default() {
    let base = common::spawn_server().await;

    let mut registry = PayloadRegistry::empty();
    registry.register(PayloadRule::new(
        "echo-rule",
        vec![Regex::new(r"/echo\?kind=rule").unwrap()],
        |ts| json!({"rule": true, "ts": ts}),
    ));
    let prober = HttpProber::new(Arc::new(registry)).unwrap();

    let ruled = prober
        .probe(&target(format!("{}/echo?kind=rule", base), "POST"))
        .await;
    let sent: Value = serde_json::from_str(ruled.body.as_deref().unwrap()).unwrap();
    assert_eq!(sent["rule"], true);

    let fallback = prober.probe(&target(format!("{}/echo", base), "PATCH")).await;
    let sent: Value = serde_json::from_str(fallback.body.as_deref().unwrap()).unwrap();
    assert_eq!(sent["test"], true);
    assert!(sent["timestamp"].is_number());
}

#[tokio::test]
async fn caller_headers_are_sent() {
    let base = common::spawn_server().await;
    let mut with_headers = target(format!("{}/headers", base), "GET");
    let mut headers = BTreeMap::new();
    headers.insert("X-Api-Key".to_string(), "secret".to_string());
    with_headers.headers = headers;

    let outcome = prober().probe(&with_headers).await;
    assert_eq!(
        outcome.body.as_deref(),
        Some(format!("secret|{}", USER_AGENT).as_str())
    );
}

#[tokio::test]
async fn caller_user_agent_overrides_default() {
    let base = common::spawn_server().await;
    let mut with_agent = target(format!("{}/headers", base), "GET");
    with_agent
        .headers
        .insert("User-Agent".to_string(), "custom-agent/1.0".to_string());

    let outcome = prober().probe(&with_agent).await;
    assert_eq!(outcome.body.as_deref(), Some("|custom-agent/1.0"));
}

#[tokio::test]
async fn json_content_type_matches_any_case() {
    let base = common::spawn_server().await;
    let outcome = prober()
        .probe(&target(format!("{}/mixed-case-json", base), "GET"))
        .await;

    assert_eq!(outcome.body.as_deref(), Some("{\n  \"a\": 2,\n  \"b\": 1\n}"));
}

#[tokio::test]
async fn large_bodies_are_truncated() {
    let base = common::spawn_server().await;
    let outcome = prober().probe(&target(format!("{}/big", base), "GET")).await;

    assert_eq!(outcome.response_size, 5000);
    assert_eq!(outcome.body.as_deref().map(str::len), Some(MAX_BODY_BYTES));
}

#[tokio::test]
async fn invalid_json_body_falls_back_to_text() {
    let base = common::spawn_server().await;
    let outcome = prober().probe(&target(format!("{}/bad-json", base), "GET")).await;

    assert_eq!(outcome.status, HealthStatus::Healthy);
    assert_eq!(outcome.body.as_deref(), Some("{not json"));
}

#[tokio::test]
async fn invalid_url_never_touches_the_network() {
    let outcome = prober().probe(&target("localhost/ok".to_string(), "GET")).await;
    assert_eq!(outcome.status, HealthStatus::Unhealthy);
    assert_eq!(outcome.error.as_deref(), Some("invalid url: localhost/ok"));
}
