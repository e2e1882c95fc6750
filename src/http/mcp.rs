//! `/mcp` route: JSON-RPC over HTTP POST.
//!
//! Only POST reaches the protocol handler on `/mcp` and `/mcp/*`. JSON-RPC
//! messages travel in the request body, so other methods get a JSON 405 from
//! the router.
//!
//! Timeouts come from the router's middleware as a JSON 408.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::protocol::{codes, dispatch_raw, JsonRpcResponse};

/// Statuses follow the JSON-RPC error: malformed input is 400, a closed
/// protocol server is 503, everything else 200.
fn status_for(response: &JsonRpcResponse) -> StatusCode {
    match response.error.as_ref().map(|e| e.code) {
        Some(codes::PARSE_ERROR | codes::INVALID_REQUEST) => StatusCode::BAD_REQUEST,
        Some(codes::SERVER_CLOSED) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

pub async fn handle(State(state): State<AppState>, body: Bytes) -> Response {
    let raw = String::from_utf8_lossy(&body);
    match dispatch_raw(state.protocol.as_ref(), &raw).await {
        Some(response) => {
            let status = status_for(&response);
            metrics::record_http_request("mcp", status.as_u16());
            (status, Json(response)).into_response()
        }
        None => {
            metrics::record_http_request("mcp", 202);
            StatusCode::ACCEPTED.into_response()
        }
    }
}
