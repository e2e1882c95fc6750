//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::AuthMethod;

/// Root configuration for the MCP server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Bitbucket host and credentials.
    pub upstream: UpstreamConfig,

    /// HTTP listener settings (bind address, port retry).
    pub listener: ListenerConfig,

    /// Connect retry and reconnect scheduling.
    pub connection: ConnectionConfig,

    /// Circuit breaker for outbound upstream calls.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Inbound authentication for `/mcp`.
    pub auth: AuthConfig,

    /// Stdio and streaming transport settings.
    pub transports: TransportsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Upstream Bitbucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the Bitbucket instance (e.g., "https://bitbucket.example.com").
    pub host: String,

    /// Username for basic authentication.
    pub username: String,

    /// Password or app token for basic authentication.
    pub password: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:7990".to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind; loopback by default.
    pub host: String,

    /// TCP port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Total bind attempts when the port is already in use.
    pub max_port_attempts: u32,

    /// Delay between bind attempts in milliseconds.
    pub port_retry_delay_ms: u64,

    /// Timeout for non-streaming requests in seconds.
    pub request_timeout_secs: u64,

    /// Maximum time to wait for in-flight connections during shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_port_attempts: 3,
            port_retry_delay_ms: 5_000,
            request_timeout_secs: 30,
            drain_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    /// `host:port` string handed to the socket binder.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream connection policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retries after the first failed connect attempt.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Delay before a scheduled reconnect fires, in seconds.
    pub reconnect_delay_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            retry_base_delay_ms: 1_000,
            reconnect_delay_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Route upstream calls through a breaker.
    pub enabled: bool,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Failure percentage that trips the breaker (strictly exceeded).
    pub error_threshold_percentage: f64,

    /// Minimum calls in the rolling window before the breaker may trip.
    pub volume_threshold: u32,

    /// Time spent open before a half-open trial, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Rolling statistics window in milliseconds.
    pub rolling_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            error_threshold_percentage: 50.0,
            volume_threshold: 1,
            reset_timeout_ms: 30_000,
            rolling_window_ms: 10_000,
        }
    }
}

/// Inbound authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require authentication on `/mcp` routes.
    pub enabled: bool,

    /// Fallback chain used when a request does not specify one.
    pub default_order: Vec<AuthMethod>,

    /// Accepted OAuth2 access tokens.
    pub oauth2_tokens: Vec<String>,

    /// Accepted bearer tokens.
    pub bearer_tokens: Vec<String>,

    /// Accepted `X-API-Key` values.
    pub api_keys: Vec<String>,

    /// Accepted basic credentials.
    pub basic_users: Vec<BasicUser>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_order: AuthMethod::DEFAULT_ORDER.to_vec(),
            oauth2_tokens: Vec::new(),
            bearer_tokens: Vec::new(),
            api_keys: Vec::new(),
            basic_users: Vec::new(),
        }
    }
}

/// A username/password pair accepted by basic authentication.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicUser {
    pub username: String,
    pub password: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportsConfig {
    /// Serve MCP over stdin/stdout.
    pub stdio_enabled: bool,

    /// SSE keep-alive comment interval in seconds.
    pub sse_keep_alive_secs: u64,

    /// Per-subscriber buffer before events are dropped for a slow client.
    pub stream_buffer: usize,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            stdio_enabled: true,
            sse_keep_alive_secs: 15,
            stream_buffer: 64,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "json".
    pub log_format: String,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = ServerConfig::default();
        assert_eq!(config.connection.retry_attempts, 2);
        assert_eq!(config.connection.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.connection.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.listener.max_port_attempts, 3);
        assert_eq!(config.listener.port_retry_delay_ms, 5_000);
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.circuit_breaker.volume_threshold, 1);
        assert_eq!(config.auth.default_order, AuthMethod::DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [upstream]
            host = "https://bitbucket.org"

            [auth]
            enabled = true
            default_order = ["apiKey", "basic"]
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.host, "https://bitbucket.org");
        assert_eq!(config.upstream.request_timeout_secs, 30);
        assert_eq!(config.auth.default_order, vec![AuthMethod::ApiKey, AuthMethod::Basic]);
        assert_eq!(config.listener.port, 3000);
    }
}
