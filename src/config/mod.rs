//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (BITBUCKET_URL, MCP_HTTP_PORT, ...)
//!     → CLI flags (main.rs)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, BasicUser, CircuitBreakerConfig, ConnectionConfig, ListenerConfig,
    ObservabilityConfig, ServerConfig, TransportsConfig, UpstreamConfig,
};
