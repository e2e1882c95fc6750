//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect to upstream:
//!     → retries.rs (retry transient failures on a RetrySchedule)
//!     → backoff.rs (base * 2^attempt between tries)
//!
//! Call upstream after connecting:
//!     → circuit_breaker.rs (fail fast while open, per-call timeout)
//! ```
//!
//! # Design Decisions
//! - Timeouts live in the breaker; every guarded call has a deadline
//! - Only connection-class errors are retried
//! - The breaker owns its transitions; callers only observe them

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitEvent, CircuitState};
pub use retries::{retry_with_backoff, RetrySchedule, Retryable};
