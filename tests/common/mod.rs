#![allow(dead_code)]

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use tenanthub_api::app::{self, AppState};
use tenanthub_api::config::AppConfig;

pub const SECRET: &str = "integration-secret";

/// App state over a minimal resolved configuration
pub fn test_state() -> AppState {
    let config = AppConfig::from_document(
        "test",
        json!({
            "auth": { "secret": SECRET, "expiresIn": 3600 },
            "diagnostics": { "timeoutSecs": 1 },
        }),
    )
    .expect("test configuration is valid");
    AppState::new(config)
}

pub fn test_app(state: &AppState) -> Router {
    app::router(state.clone())
}

/// Send one request through the router and decode the JSON body
pub async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("valid request")
}

pub fn with_auth(method: &str, uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", authorization)
        .header("user-agent", "integration-tests")
        .header("x-forwarded-for", "198.51.100.4")
        .body(Body::empty())
        .expect("valid request")
}
