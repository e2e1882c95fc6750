//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitbucket_mcp_server::config::ServerConfig;
use bitbucket_mcp_server::protocol::{JsonRpcRequest, JsonRpcResponse, ProtocolHandler};
use bitbucket_mcp_server::services::{ManagedService, SearchMatch, ServiceError, VectorSearch};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A raw-TCP HTTP upstream that answers from a closure and records paths.
pub struct MockUpstream {
    pub addr: SocketAddr,
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

/// Start a programmable mock upstream on an ephemeral port.
///
/// `respond` receives the request path and the zero-based request index.
pub async fn start_mock_upstream<F>(respond: F) -> MockUpstream
where
    F: Fn(&str, u32) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let paths = Arc::new(Mutex::new(Vec::new()));
    let counter = Arc::new(AtomicU32::new(0));
    let respond = Arc::new(respond);

    let recorded = Arc::clone(&paths);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let respond = Arc::clone(&respond);
                    let recorded = Arc::clone(&recorded);
                    let counter = Arc::clone(&counter);
                    tokio::spawn(async move {
                        let Some(path) = read_request_path(&mut socket).await else {
                            return;
                        };
                        let index = counter.fetch_add(1, Ordering::SeqCst);
                        recorded.lock().unwrap().push(path.clone());

                        let (status, body) = respond(&path, index);
                        let status_text = match status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            403 => "403 Forbidden",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockUpstream { addr, paths }
}

async fn read_request_path(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    let line = head.lines().next()?;
    line.split_whitespace().nth(1).map(str::to_string)
}

pub fn properties_body() -> String {
    r#"{"version":"8.9.0","buildNumber":"8009000","displayName":"Bitbucket","deploymentType":"Server"}"#
        .to_string()
}

/// Config for tests: ephemeral port, no stdio, fast retries.
pub fn test_config(upstream_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.upstream.host = upstream_url.to_string();
    config.upstream.username = "ci".into();
    config.upstream.password = "secret".into();
    config.upstream.request_timeout_secs = 2;
    config.listener.port = 0;
    config.listener.drain_timeout_secs = 2;
    config.connection.retry_base_delay_ms = 10;
    config.connection.reconnect_delay_secs = 1;
    config.transports.stdio_enabled = false;
    config.transports.sse_keep_alive_secs = 1;
    config
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Read a streaming body until `needle` shows up or the deadline passes.
pub async fn read_until(res: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buffer.contains(needle) {
            match res.chunk().await.unwrap() {
                Some(chunk) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for stream data");
}

/// Search service that counts lifecycle calls.
#[derive(Default)]
pub struct CountingSearch {
    pub inits: AtomicU32,
    pub disposes: AtomicU32,
}

#[async_trait]
impl ManagedService for CountingSearch {
    fn name(&self) -> &'static str {
        "counting-search"
    }

    async fn init(&self) -> Result<(), ServiceError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) {
        // Widen the teardown window so concurrent stops overlap.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorSearch for CountingSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchMatch>, ServiceError> {
        Ok(Vec::new())
    }
}

/// Protocol handler that counts `close()` calls and echoes the method.
#[derive(Default)]
pub struct CountingProtocol {
    pub closes: AtomicU32,
}

#[async_trait]
impl ProtocolHandler for CountingProtocol {
    async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id?;
        Some(JsonRpcResponse::success(
            id,
            serde_json::json!({"method": request.method}),
        ))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
