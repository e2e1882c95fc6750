//! Credential extraction and the `/mcp` authentication middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::auth::{AuthMethod, Credential, CredentialsBundle};
use crate::http::handlers::error_response;
use crate::http::server::AppState;
use crate::observability::metrics;

pub const X_API_KEY: &str = "x-api-key";

/// Build the per-request credential bundle from headers.
///
/// A bearer token is offered to both the OAuth2 and bearer strategies.
pub fn extract_credentials(headers: &HeaderMap) -> CredentialsBundle {
    let mut bundle = CredentialsBundle::new();

    if let Some(value) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ").map(str::trim) {
            if !token.is_empty() {
                bundle.insert(AuthMethod::OAuth2, Credential::Token(token.to_string()));
                bundle.insert(AuthMethod::Bearer, Credential::Token(token.to_string()));
            }
        } else if let Some(encoded) = value.strip_prefix("Basic ") {
            if let Some(credential) = decode_basic(encoded.trim()) {
                bundle.insert(AuthMethod::Basic, credential);
            }
        }
    }

    if let Some(key) = headers.get(X_API_KEY).and_then(|h| h.to_str().ok()) {
        if !key.is_empty() {
            bundle.insert(AuthMethod::ApiKey, Credential::Token(key.to_string()));
        }
    }

    bundle
}

fn decode_basic(encoded: &str) -> Option<Credential> {
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(Credential::Basic {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Rejects unauthenticated requests with 401 JSON when auth is enabled.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if !state.auth_enabled {
        return next.run(request).await;
    }

    let credentials = extract_credentials(request.headers());
    if credentials.is_empty() {
        metrics::record_http_request("mcp", 401);
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let resolution = state.auth.authenticate_with_fallback(&credentials, &[]).await;
    if !resolution.authenticated {
        tracing::debug!("Request rejected by every auth strategy");
        metrics::record_http_request("mcp", 401);
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    if let Some(user) = resolution.user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_feeds_oauth2_and_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(X_API_KEY, HeaderValue::from_static("key-1"));

        let bundle = extract_credentials(&headers);
        assert_eq!(bundle.get(AuthMethod::OAuth2), Some(&Credential::Token("abc".into())));
        assert_eq!(bundle.get(AuthMethod::Bearer), Some(&Credential::Token("abc".into())));
        assert_eq!(bundle.get(AuthMethod::ApiKey), Some(&Credential::Token("key-1".into())));
        assert!(bundle.get(AuthMethod::Basic).is_none());
    }

    #[test]
    fn test_basic_decoding() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("ci:pa:ss");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );

        let bundle = extract_credentials(&headers);
        assert_eq!(
            bundle.get(AuthMethod::Basic),
            Some(&Credential::Basic {
                username: "ci".into(),
                password: "pa:ss".into()
            })
        );
    }

    #[test]
    fn test_garbage_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(extract_credentials(&headers).is_empty());
    }
}
