//! Streaming routes backed by the event bridge.
//!
//! Both routes attach to the bridge before responding and emit a "ready"
//! frame first, so clients can tell "subscribed" from "first event".

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::events::{http_stream_channel, sse_channel};
use crate::http::handlers::error_response;
use crate::http::server::AppState;
use crate::observability::metrics;

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HttpStreamQuery {
    #[serde(rename = "resourceId")]
    pub resource_id: Option<String>,
}

/// `GET /transports/sse?topic=<t>`
pub async fn sse(State(state): State<AppState>, Query(query): Query<SseQuery>) -> Response {
    let Some(topic) = query.topic.filter(|t| !t.is_empty()) else {
        metrics::record_http_request("sse", 400);
        return error_response(StatusCode::BAD_REQUEST, "Missing topic");
    };

    let subscription = state.bridge.subscribe(sse_channel(&topic));
    tracing::debug!(topic = %topic, "SSE client attached");
    metrics::record_http_request("sse", 200);

    let ready = Event::default()
        .event("ready")
        .data(json!({"topic": topic}).to_string());
    let messages = subscription
        .into_stream()
        .map(|payload| Event::default().event("message").data(payload.to_string()));
    let stream = stream::once(async move { ready })
        .chain(messages)
        .map(Ok::<_, Infallible>);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response()
}

/// `GET /transports/http-stream?resourceId=<id>`: newline-delimited JSON.
pub async fn http_stream(
    State(state): State<AppState>,
    Query(query): Query<HttpStreamQuery>,
) -> Response {
    let Some(resource_id) = query.resource_id.filter(|id| !id.is_empty()) else {
        metrics::record_http_request("http_stream", 400);
        return error_response(StatusCode::BAD_REQUEST, "Missing resourceId");
    };

    let subscription = state.bridge.subscribe(http_stream_channel(&resource_id));
    tracing::debug!(resource_id = %resource_id, "Stream client attached");
    metrics::record_http_request("http_stream", 200);

    let ready = json!({"status": "ready", "resourceId": resource_id});
    let stream = stream::once(async move { ready })
        .chain(subscription.into_stream())
        .map(|line| Ok::<_, Infallible>(Bytes::from(format!("{line}\n"))));

    (
        [
            (CONTENT_TYPE, "application/x-ndjson"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
