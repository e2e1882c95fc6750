//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module catches values that parse
//! but cannot work (empty host, zero attempts, percentages out of range).
//! Returns every problem found, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("upstream.host '{0}' is not a valid URL")]
    InvalidHost(String),

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("circuit_breaker.error_threshold_percentage must be within 0..=100, got {0}")]
    ThresholdOutOfRange(f64),

    #[error("auth.enabled is set but no credentials are configured")]
    NoCredentials,

    #[error("observability.log_format must be 'pretty' or 'json', got '{0}'")]
    UnknownLogFormat(String),
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.upstream.host) {
        Ok(url) if url.has_host() => {}
        _ => errors.push(ValidationError::InvalidHost(config.upstream.host.clone())),
    }

    let positives: [(&'static str, u64); 5] = [
        ("listener.max_port_attempts", config.listener.max_port_attempts.into()),
        ("upstream.request_timeout_secs", config.upstream.request_timeout_secs),
        ("circuit_breaker.timeout_ms", config.circuit_breaker.timeout_ms),
        ("circuit_breaker.rolling_window_ms", config.circuit_breaker.rolling_window_ms),
        ("transports.stream_buffer", config.transports.stream_buffer as u64),
    ];
    for (field, value) in positives {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }

    let pct = config.circuit_breaker.error_threshold_percentage;
    if !(0.0..=100.0).contains(&pct) {
        errors.push(ValidationError::ThresholdOutOfRange(pct));
    }

    let auth = &config.auth;
    if auth.enabled
        && auth.oauth2_tokens.is_empty()
        && auth.bearer_tokens.is_empty()
        && auth.api_keys.is_empty()
        && auth.basic_users.is_empty()
    {
        errors.push(ValidationError::NoCredentials);
    }

    let format = config.observability.log_format.as_str();
    if format != "pretty" && format != "json" {
        errors.push(ValidationError::UnknownLogFormat(format.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ServerConfig::default();
        config.upstream.host = "not a url".into();
        config.listener.max_port_attempts = 0;
        config.circuit_breaker.error_threshold_percentage = 150.0;
        config.auth.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NoCredentials));
        assert!(errors.contains(&ValidationError::MustBePositive {
            field: "listener.max_port_attempts"
        }));
    }
}
