//! MCP protocol layer (JSON-RPC 2.0).
//!
//! # Data Flow
//! ```text
//! stdio line / POST /mcp body
//!     → dispatch_raw (parse, validate envelope)
//!     → ProtocolHandler::handle (mcp.rs)
//!     → JsonRpcResponse (None for notifications)
//! ```

pub mod mcp;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use mcp::McpProtocol;
pub use stdio::serve_stdio;

pub const JSONRPC_VERSION: &str = "2.0";

pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Implementation-defined: the protocol server has been closed.
    pub const SERVER_CLOSED: i32 = -32000;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("protocol server is closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            ProtocolError::InvalidParams(_) => codes::INVALID_PARAMS,
            ProtocolError::Closed => codes::SERVER_CLOSED,
            ProtocolError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn into_response(self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}

/// Handles decoded JSON-RPC requests for every transport.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Returns `None` for notifications.
    async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse>;

    /// Stop serving; later requests fail with [`codes::SERVER_CLOSED`].
    async fn close(&self);

    /// Accept requests again after `close()`, e.g. when the server restarts.
    fn reopen(&self) {}
}

/// Decode one raw message and hand it to `handler`.
///
/// Malformed input yields a JSON-RPC error response with a null id.
pub async fn dispatch_raw(handler: &dyn ProtocolHandler, raw: &str) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                Value::Null,
                codes::PARSE_ERROR,
                format!("parse error: {e}"),
            ))
        }
    };
    dispatch_value(handler, value).await
}

pub async fn dispatch_value(handler: &dyn ProtocolHandler, value: Value) -> Option<JsonRpcResponse> {
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                id,
                codes::INVALID_REQUEST,
                format!("invalid request: {e}"),
            ))
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Some(JsonRpcResponse::error(
            id,
            codes::INVALID_REQUEST,
            "invalid request: jsonrpc must be \"2.0\"",
        ));
    }
    handler.handle(request).await
}
