//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (http/server.rs):
//!     Stopped → Starting → services, stdio, HTTP bind, upstream connect → Running
//!
//! Stop (shutdown.rs):
//!     Running → Stopping → trigger shutdown → drain HTTP → close transports
//!         → dispose upstream & services → Stopped
//!
//! Signals (signals.rs, binary only):
//!     SIGTERM/SIGINT → TransportServer::stop()
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a deadline; the serve task is aborted after it
//! - ConnectionState is written only by upstream lifecycle events

pub mod shutdown;
pub mod signals;
pub mod state;

pub use shutdown::Shutdown;
pub use state::{ConnectionState, ServerState};
