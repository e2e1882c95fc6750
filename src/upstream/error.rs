//! Upstream error taxonomy and failure classification.

use std::fmt;
use thiserror::Error;

use crate::resilience::{CircuitBreakerError, Retryable};

/// Transport-level failure codes for requests that got no HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCode {
    Aborted,
    Refused,
    NotFound,
    TimedOut,
    Other,
}

impl NetworkCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCode::Aborted => "ECONNABORTED",
            NetworkCode::Refused => "ECONNREFUSED",
            NetworkCode::NotFound => "ENOTFOUND",
            NetworkCode::TimedOut => "ETIMEDOUT",
            NetworkCode::Other => "EUNKNOWN",
        }
    }
}

impl fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unclassified failure as observed by an [`UpstreamClient`](super::UpstreamClient).
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFailure {
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Network code, when no response arrived.
    pub code: Option<NetworkCode>,
    pub message: String,
}

impl UpstreamFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    pub fn network(code: NetworkCode, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Classified upstream errors. Retry policy keys off the variant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("rate limited by upstream: {message}")]
    RateLimit { message: String },

    #[error("connection error: {message}")]
    Connection {
        message: String,
        status: Option<u16>,
        code: Option<NetworkCode>,
    },

    #[error("upstream service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },
}

impl UpstreamError {
    /// Map a raw failure onto the taxonomy:
    /// 401/403 → Authentication, 429 → RateLimit, ≥500 or no response →
    /// Connection, anything else → Service.
    pub fn classify(failure: UpstreamFailure) -> Self {
        let UpstreamFailure {
            status,
            code,
            message,
        } = failure;

        match status {
            Some(status @ (401 | 403)) => UpstreamError::Authentication { status, message },
            Some(429) => UpstreamError::RateLimit { message },
            Some(status) if status >= 500 => UpstreamError::Connection {
                message,
                status: Some(status),
                code,
            },
            Some(status) => UpstreamError::Service { status, message },
            None => UpstreamError::Connection {
                message,
                status: None,
                code,
            },
        }
    }

    /// Returned when every probe candidate answered 404.
    pub fn undetectable() -> Self {
        UpstreamError::Connection {
            message: "unable to detect server information".to_string(),
            status: None,
            code: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Authentication { .. } => "authentication",
            UpstreamError::RateLimit { .. } => "rate_limit",
            UpstreamError::Connection { .. } => "connection",
            UpstreamError::Service { .. } => "service",
            UpstreamError::CircuitOpen { .. } => "circuit_open",
        }
    }
}

impl Retryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Connection { .. })
    }
}

impl From<CircuitBreakerError<UpstreamError>> for UpstreamError {
    fn from(err: CircuitBreakerError<UpstreamError>) -> Self {
        match err {
            CircuitBreakerError::Open { name } => UpstreamError::CircuitOpen { name },
            CircuitBreakerError::Timeout { name, after } => UpstreamError::Connection {
                message: format!("call through '{name}' timed out after {after:?}"),
                status: None,
                code: Some(NetworkCode::TimedOut),
            },
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}
