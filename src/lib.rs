//! Bitbucket MCP server: resilient upstream connection and transport layer.

pub mod auth;
pub mod config;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod services;
pub mod upstream;

pub use config::ServerConfig;
pub use http::{TransportError, TransportServer};
pub use lifecycle::Shutdown;
