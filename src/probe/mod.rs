//! Probe module: issues single HTTP requests against targets.
//!
//! Network failures never surface as errors here; they are recorded on the
//! returned [`Outcome`]. [`ProbeError`] is reserved for target configuration
//! that is rejected before any request is made.

mod http;
mod payload;

pub use http::*;
pub use payload::*;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::db::{Outcome, Target};

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("http client error: {0}")]
    Client(String),
}

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(ProbeError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Check a target's URL and method before any network activity.
pub fn validate_target(target: &Target) -> Result<HttpMethod, ProbeError> {
    if !(target.url.starts_with("http://") || target.url.starts_with("https://")) {
        return Err(ProbeError::InvalidUrl(target.url.clone()));
    }
    target.method.parse()
}

/// Something that can perform one request against a target.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Perform exactly one request. Never fails; failures are outcome data.
    async fn probe(&self, target: &Target) -> Outcome;
}
