//! HTTP client for the Bitbucket REST API.
//!
//! # Responsibilities
//! - Issue authenticated GET requests against the configured host
//! - Report failures as raw [`UpstreamFailure`]s; classification happens in
//!   the connection manager

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::config::UpstreamConfig;
use crate::upstream::error::{NetworkCode, UpstreamError, UpstreamFailure};

/// Longest response body excerpt carried in a failure message.
const BODY_EXCERPT_LEN: usize = 200;

/// Minimal upstream surface the core needs.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Configured base URL; used for deployment type inference.
    fn host(&self) -> &str;

    /// GET `path` (relative to the host) and decode the JSON body.
    async fn get_json(&self, path: &str) -> Result<Value, UpstreamFailure>;
}

/// `reqwest`-backed client using basic credentials.
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("bitbucket-mcp-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::classify(network_failure(&e)))?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_json(&self, path: &str) -> Result<Value, UpstreamFailure> {
        let url = format!("{}{}", self.host, path);
        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await.map_err(|e| network_failure(&e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            tracing::debug!(url = %url, status = %status, "Upstream returned error status");
            return Err(UpstreamFailure::status(
                status.as_u16(),
                format!("GET {path} returned {status}: {excerpt}"),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            UpstreamFailure::status(status.as_u16(), format!("GET {path} returned invalid JSON: {e}"))
        })
    }
}

/// Map a transport error (no HTTP response) to a network code.
fn network_failure(err: &reqwest::Error) -> UpstreamFailure {
    let code = if err.is_timeout() {
        NetworkCode::TimedOut
    } else if err.is_connect() {
        connect_code(err)
    } else if err.is_request() || err.is_body() {
        NetworkCode::Aborted
    } else {
        NetworkCode::Other
    };
    UpstreamFailure::network(code, err.to_string())
}

fn connect_code(err: &reqwest::Error) -> NetworkCode {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionRefused => NetworkCode::Refused,
                io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
                    NetworkCode::Aborted
                }
                io::ErrorKind::TimedOut => NetworkCode::TimedOut,
                _ => NetworkCode::Other,
            };
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            return NetworkCode::NotFound;
        }
        source = cause.source();
    }
    NetworkCode::Refused
}
