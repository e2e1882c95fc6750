//! HTTP listener binding with port-conflict retry.
//!
//! # Responsibilities
//! - Bind the configured address
//! - Retry after a fixed delay while the port is in use
//! - Fail fast on every other bind error

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address} after {attempts} attempt(s): {source}")]
    Bind {
        address: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Bind `config.bind_address()`, retrying `AddrInUse` up to
/// `max_port_attempts` total attempts.
pub async fn bind_with_retry(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let address = config.bind_address();
    let max_attempts = config.max_port_attempts.max(1);
    let delay = Duration::from_millis(config.port_retry_delay_ms);

    let mut attempt = 1;
    loop {
        match TcpListener::bind(address.as_str()).await {
            Ok(listener) => {
                if let Ok(local) = listener.local_addr() {
                    tracing::info!(address = %local, attempt, "Listener bound");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < max_attempts => {
                tracing::warn!(
                    address = %address,
                    attempt,
                    max_attempts,
                    retry_in = ?delay,
                    "Address in use, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(ListenerError::Bind {
                    address,
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> ListenerConfig {
        ListenerConfig {
            port,
            max_port_attempts: 3,
            port_retry_delay_ms: 50,
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = bind_with_retry(&config(port)).await.unwrap_err();
        let ListenerError::Bind { attempts, source, .. } = err;
        assert_eq!(attempts, 3);
        assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_succeeds_once_port_frees() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(holder);
        });

        let listener = bind_with_retry(&config(port)).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let bad = ListenerConfig {
            host: "192.0.2.1".into(),
            ..config(0)
        };
        let ListenerError::Bind { attempts, .. } = bind_with_retry(&bad).await.unwrap_err();
        assert_eq!(attempts, 1);
    }
}
