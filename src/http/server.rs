//! Transport server: HTTP and stdio front ends plus lifecycle.
//!
//! # Responsibilities
//! - Compose upstream manager, protocol handler, auth, event bridge and
//!   owned services
//! - Bind the HTTP listener (with port-conflict retry) and serve the router
//! - Run the stdio transport when enabled
//! - Serialize `start()` / `stop()` and keep both idempotent
//! - Mirror upstream lifecycle events into `ConnectionState`
//!
//! # Design Decisions
//! - A failed upstream connect degrades instead of aborting startup
//! - The lifecycle lock is held for the whole start or stop, so concurrent
//!   callers wait for the in-flight operation and then observe its result
//! - Streaming routes are exempt from the request timeout

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, post};
use axum::{middleware, Router};
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthOrchestrator;
use crate::config::ServerConfig;
use crate::events::{sse_channel, EventBridge};
use crate::http::{auth, handlers, mcp, streaming};
use crate::lifecycle::{ConnectionState, ServerState, Shutdown};
use crate::net::{bind_with_retry, ListenerError};
use crate::protocol::{serve_stdio, McpProtocol, ProtocolHandler};
use crate::resilience::{CircuitBreaker, Retryable};
use crate::services::{default_operations, InMemorySearch, ServiceError, VectorSearch};
use crate::upstream::{
    ConnectionEvent, HttpUpstreamClient, UpstreamClient, UpstreamConnectionManager, UpstreamError,
};

/// SSE topic carrying upstream lifecycle events.
pub const UPSTREAM_TOPIC: &str = "upstream";

/// Fatal transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("service initialization failed: {0}")]
    Service(#[from] ServiceError),

    #[error("upstream client setup failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Collaborators the server composes. Tests swap these for stubs.
pub struct Components {
    pub client: Arc<dyn UpstreamClient>,
    pub search: Arc<dyn VectorSearch>,
    /// Defaults to [`McpProtocol`] over `search` and the upstream manager.
    pub protocol: Option<Arc<dyn ProtocolHandler>>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub(crate) server: Weak<ServerInner>,
    pub connection: Arc<ArcSwap<ConnectionState>>,
    pub protocol: Arc<dyn ProtocolHandler>,
    pub auth: Arc<AuthOrchestrator>,
    pub auth_enabled: bool,
    pub bridge: EventBridge,
    pub keep_alive: Duration,
}

impl AppState {
    /// Handle to the owning server, if it is still alive.
    pub fn server(&self) -> Option<TransportServer> {
        self.server.upgrade().map(|inner| TransportServer { inner })
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: Shutdown,
    http: JoinHandle<io::Result<()>>,
    stdio: Option<JoinHandle<io::Result<()>>>,
}

pub(crate) struct ServerInner {
    config: ServerConfig,
    upstream: Arc<UpstreamConnectionManager>,
    protocol: Arc<dyn ProtocolHandler>,
    search: Arc<dyn VectorSearch>,
    auth: Arc<AuthOrchestrator>,
    bridge: EventBridge,
    connection: Arc<ArcSwap<ConnectionState>>,
    state: watch::Sender<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    lifecycle: tokio::sync::Mutex<Option<Running>>,
}

/// Cloneable handle to the transport server.
#[derive(Clone)]
pub struct TransportServer {
    inner: Arc<ServerInner>,
}

impl TransportServer {
    /// Build a server with the HTTP upstream client and the built-in
    /// operation search.
    pub fn new(config: ServerConfig) -> Result<Self, TransportError> {
        let client = Arc::new(HttpUpstreamClient::new(&config.upstream)?);
        let search = Arc::new(InMemorySearch::new(default_operations()));
        Ok(Self::with_components(
            config,
            Components {
                client,
                search,
                protocol: None,
            },
        ))
    }

    pub fn with_components(config: ServerConfig, components: Components) -> Self {
        let breaker = config
            .circuit_breaker
            .enabled
            .then(|| CircuitBreaker::new("bitbucket", config.circuit_breaker.clone()));
        let upstream = Arc::new(UpstreamConnectionManager::new(
            components.client,
            config.connection.clone(),
            breaker,
        ));
        let protocol = components.protocol.unwrap_or_else(|| {
            Arc::new(McpProtocol::new(
                Arc::clone(&components.search),
                Arc::clone(&upstream),
            ))
        });
        let auth = Arc::new(AuthOrchestrator::from_config(&config.auth));
        let bridge = EventBridge::new(config.transports.stream_buffer);
        let (state, _) = watch::channel(ServerState::Stopped);

        Self {
            inner: Arc::new(ServerInner {
                config,
                upstream,
                protocol,
                search: components.search,
                auth,
                bridge,
                connection: Arc::new(ArcSwap::from_pointee(ConnectionState::default())),
                state,
                local_addr: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        (**self.inner.connection.load()).clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.inner.bridge
    }

    pub fn upstream(&self) -> &Arc<UpstreamConnectionManager> {
        &self.inner.upstream
    }

    /// Resolves once the server has stopped, e.g. after `POST /shutdown`.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServerState::Stopped).await;
    }

    /// Start transports and connect upstream. Returns the bound HTTP address.
    ///
    /// A no-op returning the current address while running.
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            return Ok(running.addr);
        }

        self.set_state(ServerState::Starting);
        match self.launch().await {
            Ok(running) => {
                let addr = running.addr;
                *lifecycle = Some(running);
                self.set_state(ServerState::Running);
                tracing::info!(address = %addr, "Transport server running");
                Ok(addr)
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                tracing::error!(error = %e, "Transport server failed to start");
                Err(e)
            }
        }
    }

    /// Drain and tear down everything `start()` brought up. A no-op while
    /// stopped; concurrent callers share one teardown.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return;
        };

        self.set_state(ServerState::Stopping);
        tracing::info!("Transport server stopping");
        let inner = &self.inner;

        running.shutdown.trigger();
        // Ends open SSE and chunked streams so the HTTP drain can finish.
        inner.bridge.close();

        let drain = Duration::from_secs(inner.config.listener.drain_timeout_secs);
        await_task("http", running.http, drain).await;
        if let Some(stdio) = running.stdio {
            await_task("stdio", stdio, drain).await;
        }

        inner.protocol.close().await;
        inner.upstream.dispose();
        inner.search.dispose().await;

        inner
            .connection
            .store(Arc::new(ConnectionState::default()));
        *inner
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        self.set_state(ServerState::Stopped);
        tracing::info!("Transport server stopped");
    }

    async fn launch(&self) -> Result<Running, TransportError> {
        let inner = &self.inner;
        inner.search.init().await?;
        inner.bridge.reopen();
        inner.protocol.reopen();
        // Later failure paths dispose the manager, which drops this listener.
        self.watch_upstream();

        let shutdown = Shutdown::new();
        let stdio = inner.config.transports.stdio_enabled.then(|| {
            tracing::info!("Stdio transport enabled");
            tokio::spawn(serve_stdio(
                tokio::io::stdin(),
                tokio::io::stdout(),
                Arc::clone(&inner.protocol),
                shutdown.subscribe(),
            ))
        });

        let bound = bind_with_retry(&inner.config.listener)
            .await
            .map_err(TransportError::from)
            .and_then(|listener| Ok((listener.local_addr()?, listener)));
        let (addr, listener) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                shutdown.trigger();
                if let Some(stdio) = stdio {
                    stdio.abort();
                }
                inner.upstream.dispose();
                inner.search.dispose().await;
                return Err(e);
            }
        };

        let router = build_router(&inner.config, self.app_state());
        let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown.signalled());
        let http = tokio::spawn(async move { serve.await });
        *inner
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(addr);

        inner
            .connection
            .store(Arc::new(inner.connection.load().with_running(true)));

        if let Err(e) = inner.upstream.connect().await {
            tracing::warn!(error = %e, "Starting in degraded mode");
            if e.is_retryable() {
                inner.upstream.schedule_reconnect();
            }
        }

        Ok(Running {
            addr,
            shutdown,
            http,
            stdio,
        })
    }

    /// Mirror upstream lifecycle events into `ConnectionState` and the
    /// upstream SSE topic. Listeners are dropped by `dispose()` on stop.
    fn watch_upstream(&self) {
        let connection = Arc::clone(&self.inner.connection);
        let bridge = self.inner.bridge.clone();
        self.inner.upstream.on_event(move |event| {
            if let Some(next) = connection.load().apply(event) {
                connection.store(Arc::new(next));
            }

            let payload = match event {
                ConnectionEvent::Connected(info) | ConnectionEvent::Reconnected(info) => {
                    json!({"event": event.kind(), "serverInfo": info})
                }
                ConnectionEvent::Disconnected => json!({"event": event.kind()}),
                ConnectionEvent::Error(e) => {
                    json!({"event": event.kind(), "kind": e.kind(), "message": e.to_string()})
                }
            };
            bridge.publish(&sse_channel(UPSTREAM_TOPIC), payload);
        });
    }

    fn app_state(&self) -> AppState {
        let inner = &self.inner;
        AppState {
            server: Arc::downgrade(inner),
            connection: Arc::clone(&inner.connection),
            protocol: Arc::clone(&inner.protocol),
            auth: Arc::clone(&inner.auth),
            auth_enabled: inner.config.auth.enabled,
            bridge: inner.bridge.clone(),
            keep_alive: Duration::from_secs(inner.config.transports.sse_keep_alive_secs.max(1)),
        }
    }

    fn set_state(&self, state: ServerState) {
        self.inner.state.send_replace(state);
        tracing::debug!(state = ?state, "Server state changed");
    }
}

async fn await_task(name: &'static str, mut task: JoinHandle<io::Result<()>>, deadline: Duration) {
    match tokio::time::timeout(deadline, &mut task).await {
        Ok(Ok(Ok(()))) => tracing::debug!(task = name, "Task finished"),
        Ok(Ok(Err(e))) => tracing::warn!(task = name, error = %e, "Task ended with error"),
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task panicked or was cancelled"),
        Err(_) => {
            tracing::warn!(task = name, deadline = ?deadline, "Drain deadline exceeded, aborting");
            task.abort();
        }
    }
}

/// Build the Axum router with all middleware layers.
fn build_router(config: &ServerConfig, state: AppState) -> Router {
    let protected = Router::new()
        .route("/mcp", post(mcp::handle).fallback(handlers::method_not_allowed))
        .route("/mcp/{*rest}", post(mcp::handle).fallback(handlers::method_not_allowed))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let bounded = Router::new()
        .route("/health", get(handlers::health).fallback(handlers::method_not_allowed))
        .route("/shutdown", post(handlers::shutdown).fallback(handlers::method_not_allowed))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handlers::middleware_error))
                .timeout(Duration::from_secs(config.listener.request_timeout_secs)),
        );

    let streaming = Router::new()
        .route("/transports/sse", get(streaming::sse))
        .route("/transports/http-stream", get(streaming::http_stream));

    Router::new()
        .merge(bounded)
        .merge(streaming)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
