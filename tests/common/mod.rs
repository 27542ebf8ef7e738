//! Mock HTTP endpoints for integration tests.

#![allow(dead_code)]

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

async fn ok() -> impl IntoResponse {
    Json(json!({ "status": "ok", "items": [1, 2, 3] }))
}

async fn fail() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "down")
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

async fn big() -> impl IntoResponse {
    "x".repeat(5000)
}

async fn bad_json() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "{not json")
}

async fn mixed_case_json() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "Application/JSON")], r#"{"b":1,"a":2}"#)
}

async fn echo(body: String) -> impl IntoResponse {
    body
}

async fn echo_headers(headers: HeaderMap) -> impl IntoResponse {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    format!("{}|{}", key, agent)
}

/// Start a mock API on an ephemeral port and return its base URL.
pub async fn spawn_server() -> String {
    let app = Router::new()
        .route("/ok", get(ok))
        .route("/fail", get(fail))
        .route("/slow", get(slow))
        .route("/big", get(big))
        .route("/bad-json", get(bad_json))
        .route("/mixed-case-json", get(mixed_case_json))
        .route("/echo", post(echo).put(echo).patch(echo))
        .route("/headers", get(echo_headers));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// A local URL with nothing listening on it.
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}
