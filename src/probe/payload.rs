//! Request payload construction.
//!
//! The body sent with a probe is chosen in three steps: the method table
//! decides whether the method carries a body at all, a target's own body
//! template wins if present, and otherwise the first matching URL rule (or the
//! generic default) provides one.

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::HttpMethod;

/// Key whose value is refreshed with the current time.
pub const TIMESTAMP_KEY: &str = "ts";

/// Placeholder values that mark a timestamp to be filled in at send time.
pub const TIMESTAMP_PLACEHOLDERS: &[&str] = &["{{timestamp}}", "__TIMESTAMP__"];

/// A hard-coded timestamp found in old saved templates; treated as a placeholder.
pub const STALE_TIMESTAMP: i64 = 1569221884613;

/// The body to send with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Json(Value),
    Raw(String),
}

/// Inputs available when building a payload.
pub struct PayloadContext<'a> {
    pub url: &'a str,
    pub template: Option<&'a str>,
    pub now_ms: i64,
}

type PayloadBuilder = fn(&PayloadContext<'_>, &PayloadRegistry) -> Payload;

/// Method -> payload construction.
const METHOD_PAYLOADS: &[(HttpMethod, PayloadBuilder)] = &[
    (HttpMethod::Get, no_body),
    (HttpMethod::Head, no_body),
    (HttpMethod::Options, no_body),
    (HttpMethod::Delete, no_body),
    (HttpMethod::Post, templated_body),
    (HttpMethod::Put, templated_body),
    (HttpMethod::Patch, templated_body),
];

fn no_body(_ctx: &PayloadContext<'_>, _registry: &PayloadRegistry) -> Payload {
    Payload::None
}

fn templated_body(ctx: &PayloadContext<'_>, registry: &PayloadRegistry) -> Payload {
    if let Some(template) = ctx.template.filter(|t| !t.trim().is_empty()) {
        return render_template(template, ctx.now_ms);
    }

    match registry.lookup(ctx.url) {
        Some(rule) => Payload::Json(rule.build(ctx.now_ms)),
        None => Payload::Json(default_payload()),
    }
}

/// Current time in epoch milliseconds.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a body template, refreshing timestamp markers.
///
/// Templates that are not valid JSON are sent verbatim.
pub fn render_template(template: &str, now_ms: i64) -> Payload {
    match serde_json::from_str::<Value>(template) {
        Ok(mut value) => {
            stamp_timestamps(&mut value, now_ms);
            Payload::Json(value)
        }
        Err(_) => Payload::Raw(template.to_string()),
    }
}

/// Recursively replace `ts` marker values with `now_ms`.
pub fn stamp_timestamps(value: &mut Value, now_ms: i64) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key == TIMESTAMP_KEY && is_timestamp_marker(v) {
                    *v = Value::from(now_ms);
                } else {
                    stamp_timestamps(v, now_ms);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                stamp_timestamps(item, now_ms);
            }
        }
        _ => {}
    }
}

fn is_timestamp_marker(value: &Value) -> bool {
    match value {
        Value::String(s) => TIMESTAMP_PLACEHOLDERS.contains(&s.as_str()),
        Value::Number(n) => n.as_i64() == Some(STALE_TIMESTAMP),
        _ => false,
    }
}

/// Generic test payload for body-carrying methods without a template.
pub fn default_payload() -> Value {
    let now = Utc::now();
    json!({
        "test": true,
        "timestamp": now.timestamp_millis() as f64 / 1000.0,
    })
}

/// A URL-matched default payload.
#[derive(Clone)]
pub struct PayloadRule {
    name: String,
    patterns: Vec<Regex>,
    build: Arc<dyn Fn(i64) -> Value + Send + Sync>,
}

impl PayloadRule {
    /// Create a rule that matches when every pattern matches the URL.
    pub fn new<F>(name: &str, patterns: Vec<Regex>, build: F) -> Self
    where
        F: Fn(i64) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            patterns,
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, url: &str) -> bool {
        !self.patterns.is_empty() && self.patterns.iter().all(|p| p.is_match(url))
    }

    pub fn build(&self, now_ms: i64) -> Value {
        (self.build)(now_ms)
    }
}

impl fmt::Debug for PayloadRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRule")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .finish()
    }
}

/// Ordered list of URL payload rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    rules: Vec<PayloadRule>,
}

impl PayloadRegistry {
    /// A registry with no rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in rules.
    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::empty();
        registry.register(bounding_box_rule());
        registry
    }

    /// Append a rule after the existing ones.
    pub fn register(&mut self, rule: PayloadRule) {
        self.rules.push(rule);
    }

    pub fn lookup(&self, url: &str) -> Option<&PayloadRule> {
        self.rules.iter().find(|r| r.matches(url))
    }

    /// Build the body for a request.
    pub fn payload_for(&self, method: HttpMethod, url: &str, template: Option<&str>) -> Payload {
        let ctx = PayloadContext {
            url,
            template,
            now_ms: epoch_millis(),
        };
        let build = METHOD_PAYLOADS
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, b)| *b)
            .unwrap_or(no_body);
        build(&ctx, self)
    }
}

/// Station search endpoints that take a bounding box.
fn bounding_box_rule() -> PayloadRule {
    static VENDOR: OnceLock<Regex> = OnceLock::new();
    static BBOX: OnceLock<Regex> = OnceLock::new();
    let vendor = VENDOR.get_or_init(|| Regex::new(r"(?i)ionex").unwrap());
    let bbox = BBOX.get_or_init(|| Regex::new(r"boundingBox").unwrap());

    PayloadRule::new("bounding-box-search", vec![vendor.clone(), bbox.clone()], |now_ms| {
        json!({
            "topRight": { "lat": 25.098480744152837, "lon": 121.63874437309272 },
            "bottomLeft": { "lat": 25.015207286647275, "lon": 121.58853342033387 },
            "location": { "lat": 25.015207286647275, "lon": 121.58853342033387 },
            "from": 0,
            "size": 200,
            "lang": "en",
            "stationTypes": ["ENERGY", "RENTAL"],
            "app": "com.noodoe.nex.user.dev",
            "dn": "70C21539-18B2-4399-A1CC-C8718AE7966C",
            "dm": "iPhone14,2",
            "vn": "1.0.0",
            "ts": now_ms,
            "tz": 480,
            "cn": "TW"
        })
    })
}
