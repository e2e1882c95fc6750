//! Authentication fallback chain.
//!
//! # Resolution
//! ```text
//! for method in (order if non-empty else default_order):
//!     no strategy registered        → skip
//!     strategy.can_handle() == false → skip
//!     no credential for method       → skip
//!     authenticate(credential):
//!         Ok(authenticated)   → done, method_used = method
//!         Ok(rejected) | Err  → next method
//! exhausted → { authenticated: false, method_used: None }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::metrics;

/// Supported authentication schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "bearer")]
    Bearer,
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "basic")]
    Basic,
}

impl AuthMethod {
    pub const DEFAULT_ORDER: [AuthMethod; 4] = [
        AuthMethod::OAuth2,
        AuthMethod::Bearer,
        AuthMethod::ApiKey,
        AuthMethod::Basic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth2 => "oauth2",
            AuthMethod::Bearer => "bearer",
            AuthMethod::ApiKey => "apiKey",
            AuthMethod::Basic => "basic",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential payload for one method.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(<redacted>)"),
            Credential::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: <redacted> }}")
            }
        }
    }
}

/// Per-request credentials keyed by method. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct CredentialsBundle {
    entries: HashMap<AuthMethod, Credential>,
}

impl CredentialsBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method: AuthMethod, credential: Credential) {
        self.entries.insert(method, credential);
    }

    pub fn with(mut self, method: AuthMethod, credential: Credential) -> Self {
        self.insert(method, credential);
        self
    }

    pub fn get(&self, method: AuthMethod) -> Option<&Credential> {
        self.entries.get(&method)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: String,
}

/// What a single strategy decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub user: Option<AuthenticatedUser>,
}

impl AuthOutcome {
    pub fn accepted(user: AuthenticatedUser) -> Self {
        Self {
            authenticated: true,
            user: Some(user),
        }
    }

    pub fn rejected() -> Self {
        Self {
            authenticated: false,
            user: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential shape not supported by {0} strategy")]
    UnsupportedCredential(AuthMethod),

    #[error("authentication backend failed: {0}")]
    Backend(String),
}

/// A pluggable authentication scheme.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn authenticate(&self, credential: &Credential) -> Result<AuthOutcome, AuthError>;

    fn can_handle(&self, _credentials: &CredentialsBundle) -> bool {
        true
    }
}

/// Result of the whole fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResolution {
    pub authenticated: bool,
    pub user: Option<AuthenticatedUser>,
    pub method_used: Option<AuthMethod>,
}

impl AuthResolution {
    fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            user: None,
            method_used: None,
        }
    }
}

/// Holds strategies and tries them in priority order.
pub struct AuthOrchestrator {
    strategies: HashMap<AuthMethod, Arc<dyn AuthStrategy>>,
    default_order: Vec<AuthMethod>,
}

impl AuthOrchestrator {
    pub fn new(default_order: Vec<AuthMethod>) -> Self {
        Self {
            strategies: HashMap::new(),
            default_order,
        }
    }

    /// Register a strategy, replacing any previous one for the same method.
    pub fn register_strategy(&mut self, strategy: Arc<dyn AuthStrategy>) {
        let method = strategy.method();
        if self.strategies.insert(method, strategy).is_some() {
            tracing::debug!(method = %method, "Replaced auth strategy");
        }
    }

    pub fn registered_methods(&self) -> Vec<AuthMethod> {
        self.default_order
            .iter()
            .copied()
            .filter(|m| self.strategies.contains_key(m))
            .collect()
    }

    /// Try each method in `order` (or the default order when empty) until
    /// one authenticates. Never fails.
    pub async fn authenticate_with_fallback(
        &self,
        credentials: &CredentialsBundle,
        order: &[AuthMethod],
    ) -> AuthResolution {
        let order = if order.is_empty() {
            self.default_order.as_slice()
        } else {
            order
        };

        for &method in order {
            let Some(strategy) = self.strategies.get(&method) else {
                continue;
            };
            if !strategy.can_handle(credentials) {
                tracing::trace!(method = %method, "Strategy declined credentials");
                continue;
            }
            let Some(credential) = credentials.get(method) else {
                continue;
            };

            match strategy.authenticate(credential).await {
                Ok(outcome) if outcome.authenticated => {
                    metrics::record_auth_attempt(method.as_str(), "success");
                    tracing::debug!(method = %method, "Authenticated");
                    return AuthResolution {
                        authenticated: true,
                        user: outcome.user,
                        method_used: Some(method),
                    };
                }
                Ok(_) => {
                    metrics::record_auth_attempt(method.as_str(), "rejected");
                    tracing::debug!(method = %method, "Credentials rejected, trying next method");
                }
                Err(e) => {
                    metrics::record_auth_attempt(method.as_str(), "error");
                    tracing::warn!(method = %method, error = %e, "Auth strategy failed, trying next method");
                }
            }
        }

        AuthResolution::unauthenticated()
    }
}
