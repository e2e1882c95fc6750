//! MCP request handling.
//!
//! Supported methods: `initialize`, `ping`, `tools/list`, `tools/call`.
//! Notifications (`notifications/*`) are accepted and never answered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ProtocolError, ProtocolHandler};
use crate::services::VectorSearch;
use crate::upstream::UpstreamConnectionManager;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "bitbucket-mcp-server";

const SEARCH_TOOL: &str = "search_api_operations";
const SERVER_INFO_TOOL: &str = "get_server_info";
const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct McpProtocol {
    search: Arc<dyn VectorSearch>,
    upstream: Arc<UpstreamConnectionManager>,
    closed: AtomicBool,
}

impl McpProtocol {
    pub fn new(search: Arc<dyn VectorSearch>, upstream: Arc<UpstreamConnectionManager>) -> Self {
        Self {
            search,
            upstream,
            closed: AtomicBool::new(false),
        }
    }

    fn tools() -> Value {
        json!([
            {
                "name": SEARCH_TOOL,
                "description": "Find Bitbucket API operations matching a natural-language query",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1}
                    },
                    "required": ["query"]
                }
            },
            {
                "name": SERVER_INFO_TOOL,
                "description": "Report the connected Bitbucket server's version and edition",
                "inputSchema": {"type": "object", "properties": {}}
            }
        ])
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": Self::tools()})),
            "tools/call" => {
                let call: ToolCall = serde_json::from_value(params.unwrap_or(Value::Null))
                    .map_err(|e| ProtocolError::InvalidParams(e.to_string()))?;
                self.call_tool(call).await
            }
            other => Err(ProtocolError::MethodNotFound(other.to_string())),
        }
    }

    async fn call_tool(&self, call: ToolCall) -> Result<Value, ProtocolError> {
        match call.name.as_str() {
            SEARCH_TOOL => {
                let args: SearchArgs = serde_json::from_value(call.arguments)
                    .map_err(|e| ProtocolError::InvalidParams(e.to_string()))?;
                let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
                match self.search.search(&args.query, limit).await {
                    Ok(matches) => Ok(tool_result(json!(matches), false)),
                    Err(e) => Ok(tool_result(json!({"error": e.to_string()}), true)),
                }
            }
            SERVER_INFO_TOOL => match self.upstream.get_json(crate::upstream::PROBE_PATHS[0]).await {
                Ok(payload) => Ok(tool_result(payload, false)),
                Err(e) => Ok(tool_result(json!({"error": e.to_string(), "kind": e.kind()}), true)),
            },
            other => Err(ProtocolError::InvalidParams(format!("unknown tool: {other}"))),
        }
    }
}

/// Tool results carry their payload as a text content block.
fn tool_result(payload: Value, is_error: bool) -> Value {
    json!({
        "content": [{"type": "text", "text": payload.to_string()}],
        "isError": is_error
    })
}

#[async_trait]
impl ProtocolHandler for McpProtocol {
    async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let Some(id) = id else {
            tracing::debug!(method = %method, "Notification received");
            return None;
        };

        if self.closed.load(Ordering::SeqCst) {
            return Some(ProtocolError::Closed.into_response(id));
        }

        let response = match self.dispatch(&method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::debug!(method = %method, error = %e, "Request failed");
                e.into_response(id)
            }
        };
        Some(response)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("MCP protocol closed");
        }
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::protocol::{codes, dispatch_raw};
    use crate::services::{default_operations, InMemorySearch, ManagedService};
    use crate::upstream::{UpstreamClient, UpstreamFailure};

    struct Offline;

    #[async_trait]
    impl UpstreamClient for Offline {
        fn host(&self) -> &str {
            "http://localhost:7990"
        }

        async fn get_json(&self, _path: &str) -> Result<Value, UpstreamFailure> {
            Err(UpstreamFailure::status(401, "no"))
        }
    }

    async fn protocol() -> McpProtocol {
        let search = Arc::new(InMemorySearch::new(default_operations()));
        search.init().await.unwrap();
        let upstream = Arc::new(UpstreamConnectionManager::new(
            Arc::new(Offline),
            ConnectionConfig::default(),
            None,
        ));
        McpProtocol::new(search, upstream)
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let mcp = protocol().await;
        let init = dispatch_raw(&mcp, r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .await
            .unwrap();
        assert_eq!(init.result.unwrap()["serverInfo"]["name"], SERVER_NAME);

        let list = dispatch_raw(&mcp, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(list.result.unwrap()["tools"][0]["name"], SEARCH_TOOL);
    }

    #[tokio::test]
    async fn test_search_tool() {
        let mcp = protocol().await;
        let response = mcp
            .handle(JsonRpcRequest::new(
                json!(7),
                "tools/call",
                Some(json!({"name": SEARCH_TOOL, "arguments": {"query": "list branches", "limit": 1}})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let matches: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(matches[0]["id"], "list-branches");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_tool_error() {
        let mcp = protocol().await;
        let response = mcp
            .handle(JsonRpcRequest::new(
                json!(8),
                "tools/call",
                Some(json!({"name": SERVER_INFO_TOOL})),
            ))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_errors_and_notifications() {
        let mcp = protocol().await;
        let parse = dispatch_raw(&mcp, "{not json").await.unwrap();
        assert_eq!(parse.error.unwrap().code, codes::PARSE_ERROR);

        let missing = dispatch_raw(&mcp, r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#)
            .await
            .unwrap();
        assert_eq!(missing.error.unwrap().code, codes::METHOD_NOT_FOUND);

        let note = dispatch_raw(&mcp, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        assert!(note.is_none());
    }

    #[tokio::test]
    async fn test_closed_rejects() {
        let mcp = protocol().await;
        mcp.close().await;
        let response = mcp
            .handle(JsonRpcRequest::new(json!(1), "ping", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::SERVER_CLOSED);

        mcp.reopen();
        let response = mcp
            .handle(JsonRpcRequest::new(json!(2), "ping", None))
            .await
            .unwrap();
        assert!(!response.is_error());
    }
}
