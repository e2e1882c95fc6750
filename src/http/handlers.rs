//! Health, shutdown and fallback handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json};
use serde::Serialize;
use serde_json::json;

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::upstream::UpstreamInfo;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub bitbucket_connected: bool,
    pub bitbucket_server_info: Option<UpstreamInfo>,
    pub degraded_mode: bool,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connection = state.connection.load();
    metrics::record_http_request("health", 200);
    Json(HealthResponse {
        status: if connection.degraded_mode { "degraded" } else { "ok" },
        bitbucket_connected: connection.upstream_connected,
        bitbucket_server_info: connection.upstream_info.clone(),
        degraded_mode: connection.degraded_mode,
    })
}

/// `POST /shutdown`: answers first, then stops the server in the background.
pub async fn shutdown(State(state): State<AppState>) -> Response {
    if let Some(server) = state.server() {
        tracing::info!("Shutdown requested over HTTP");
        tokio::spawn(async move { server.stop().await });
    }
    metrics::record_http_request("shutdown", 202);
    (StatusCode::ACCEPTED, Json(json!({"status": "shutting down"}))).into_response()
}

pub async fn not_found() -> Response {
    metrics::record_http_request("fallback", 404);
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

pub async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

/// Errors raised by the middleware stack (request timeout) as JSON.
pub async fn middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        metrics::record_http_request("timeout", 408);
        error_response(StatusCode::REQUEST_TIMEOUT, "Request Timeout")
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

pub fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({"error": error}))).into_response()
}
