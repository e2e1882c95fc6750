//! Upstream (Bitbucket REST API) connectivity.
//!
//! # Data Flow
//! ```text
//! TransportServer::start()
//!     → manager.rs (connect: probe with retries, classify failures)
//!         → client.rs (GET over reqwest, basic auth)
//!     → ConnectionEvent listeners (update ConnectionState)
//!
//! Outbound call:
//!     → manager.rs (call: optional circuit breaker)
//!         → error.rs (classify) → report_failure → reconnect loop
//! ```
//!
//! # Design Decisions
//! - Capability probing bypasses the breaker so connect retries are not
//!   short-circuited by a breaker that trips on one failure
//! - Only connection-class errors retry or reconnect

pub mod client;
pub mod error;
pub mod manager;

pub use client::{HttpUpstreamClient, UpstreamClient};
pub use error::{NetworkCode, UpstreamError, UpstreamFailure};
pub use manager::{
    infer_upstream_info, ConnectionEvent, ServerType, UpstreamConnectionManager, UpstreamInfo,
    PROBE_PATHS,
};
