//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ServerConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay well-known environment variables onto `config`.
///
/// `lookup` abstracts the environment so callers can inject values.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BITBUCKET_URL") {
        config.upstream.host = host;
    }
    if let Some(username) = lookup("BITBUCKET_USERNAME") {
        config.upstream.username = username;
    }
    // An app token takes precedence over a plain password.
    if let Some(password) = lookup("BITBUCKET_TOKEN").or_else(|| lookup("BITBUCKET_PASSWORD")) {
        config.upstream.password = password;
    }
    if let Some(port) = lookup("MCP_HTTP_PORT") {
        config.listener.port = port.parse().map_err(|_| ConfigError::Env {
            var: "MCP_HTTP_PORT",
            value: port.clone(),
        })?;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    Ok(())
}
