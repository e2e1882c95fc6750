//! Config-backed authentication strategies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::orchestrator::{
    AuthError, AuthMethod, AuthOrchestrator, AuthOutcome, AuthStrategy, AuthenticatedUser, Credential,
    CredentialsBundle,
};
use crate::config::AuthConfig;

/// Accepts a fixed set of opaque tokens (OAuth2, bearer or API key).
pub struct StaticTokenStrategy {
    method: AuthMethod,
    tokens: Vec<String>,
}

impl StaticTokenStrategy {
    pub fn new(method: AuthMethod, tokens: Vec<String>) -> Self {
        Self { method, tokens }
    }
}

#[async_trait]
impl AuthStrategy for StaticTokenStrategy {
    fn method(&self) -> AuthMethod {
        self.method
    }

    async fn authenticate(&self, credential: &Credential) -> Result<AuthOutcome, AuthError> {
        let Credential::Token(token) = credential else {
            return Err(AuthError::UnsupportedCredential(self.method));
        };
        Ok(match self.tokens.iter().position(|t| t == token) {
            // The index identifies the token without echoing it.
            Some(index) => AuthOutcome::accepted(AuthenticatedUser {
                id: format!("{}:{}", self.method, index),
            }),
            None => AuthOutcome::rejected(),
        })
    }
}

/// Username/password pairs.
pub struct BasicCredentialStrategy {
    users: HashMap<String, String>,
}

impl BasicCredentialStrategy {
    pub fn new(users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AuthStrategy for BasicCredentialStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::Basic
    }

    async fn authenticate(&self, credential: &Credential) -> Result<AuthOutcome, AuthError> {
        let Credential::Basic { username, password } = credential else {
            return Err(AuthError::UnsupportedCredential(AuthMethod::Basic));
        };
        Ok(match self.users.get(username) {
            Some(expected) if expected == password => {
                AuthOutcome::accepted(AuthenticatedUser { id: username.clone() })
            }
            _ => AuthOutcome::rejected(),
        })
    }

    fn can_handle(&self, credentials: &CredentialsBundle) -> bool {
        matches!(
            credentials.get(AuthMethod::Basic),
            Some(Credential::Basic { username, .. }) if !username.is_empty()
        )
    }
}

impl AuthOrchestrator {
    /// Build an orchestrator with one strategy per configured credential list.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut orchestrator = AuthOrchestrator::new(config.default_order.clone());

        let token_lists = [
            (AuthMethod::OAuth2, &config.oauth2_tokens),
            (AuthMethod::Bearer, &config.bearer_tokens),
            (AuthMethod::ApiKey, &config.api_keys),
        ];
        for (method, tokens) in token_lists {
            if !tokens.is_empty() {
                orchestrator.register_strategy(Arc::new(StaticTokenStrategy::new(method, tokens.clone())));
            }
        }

        if !config.basic_users.is_empty() {
            let users = config
                .basic_users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()));
            orchestrator.register_strategy(Arc::new(BasicCredentialStrategy::new(users)));
        }

        tracing::debug!(methods = ?orchestrator.registered_methods(), "Auth strategies registered");
        orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicUser;

    fn config() -> AuthConfig {
        AuthConfig {
            enabled: true,
            default_order: AuthMethod::DEFAULT_ORDER.to_vec(),
            oauth2_tokens: vec![],
            bearer_tokens: vec!["b-1".into(), "b-2".into()],
            api_keys: vec!["key-1".into()],
            basic_users: vec![BasicUser {
                username: "ci".into(),
                password: "hunter2".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_configured_strategies() {
        let orchestrator = AuthOrchestrator::from_config(&config());
        assert_eq!(
            orchestrator.registered_methods(),
            vec![AuthMethod::Bearer, AuthMethod::ApiKey, AuthMethod::Basic]
        );

        let bearer = CredentialsBundle::new().with(AuthMethod::Bearer, Credential::Token("b-2".into()));
        let resolution = orchestrator.authenticate_with_fallback(&bearer, &[]).await;
        assert_eq!(resolution.method_used, Some(AuthMethod::Bearer));
        assert_eq!(resolution.user.unwrap().id, "bearer:1");
    }

    #[tokio::test]
    async fn test_basic_credentials() {
        let orchestrator = AuthOrchestrator::from_config(&config());
        let good = CredentialsBundle::new().with(
            AuthMethod::Basic,
            Credential::Basic {
                username: "ci".into(),
                password: "hunter2".into(),
            },
        );
        let bad = CredentialsBundle::new().with(
            AuthMethod::Basic,
            Credential::Basic {
                username: "ci".into(),
                password: "wrong".into(),
            },
        );

        assert!(orchestrator.authenticate_with_fallback(&good, &[]).await.authenticated);
        assert!(!orchestrator.authenticate_with_fallback(&bad, &[]).await.authenticated);
    }

    #[tokio::test]
    async fn test_wrong_credential_shape_is_an_error() {
        let strategy = StaticTokenStrategy::new(AuthMethod::ApiKey, vec!["k".into()]);
        let result = strategy
            .authenticate(&Credential::Basic {
                username: "a".into(),
                password: "b".into(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::UnsupportedCredential(AuthMethod::ApiKey))));
    }
}
