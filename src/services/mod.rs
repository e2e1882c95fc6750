//! Long-lived services owned by the transport server.
//!
//! Each service is constructed once, passed by reference, and moved through
//! an explicit `init()` / `dispose()` lifecycle by the server.

pub mod search;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use search::{default_operations, InMemorySearch};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service '{0}' is not initialized")]
    NotReady(&'static str),

    #[error("service '{name}' failed: {message}")]
    Failed { name: &'static str, message: String },
}

#[async_trait]
pub trait ManagedService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn init(&self) -> Result<(), ServiceError>;

    /// Release resources. Must tolerate being called without `init()`.
    async fn dispose(&self);
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub id: String,
    pub description: String,
    pub score: f64,
}

/// Semantic search over API operations.
#[async_trait]
pub trait VectorSearch: ManagedService {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchMatch>, ServiceError>;
}
