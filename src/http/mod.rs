//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, tracing, router)
//!     → /health, /shutdown        → handlers.rs
//!     → /mcp, /mcp/*              → auth.rs (when enabled) → mcp.rs → protocol
//!     → /transports/{sse,http-stream} → streaming.rs ← EventBridge
//!     → anything else             → 404 JSON
//! ```

pub mod auth;
pub mod handlers;
pub mod mcp;
pub mod server;
pub mod streaming;

pub use server::{AppState, Components, TransportError, TransportServer, UPSTREAM_TOPIC};
