//! Upstream connection manager.
//!
//! # Responsibilities
//! - Probe the upstream for identity and version on connect
//! - Retry connection-class failures with exponential backoff
//! - Keep at most one reconnect loop pending after a disconnect
//! - Dispatch lifecycle events to registered listeners
//! - Guard outbound calls with the optional circuit breaker
//!
//! # Lifecycle
//! ```text
//! connect() ──ok──→ Connected
//!     └──err──→ Disconnected, Error
//!
//! report_failure(Connection) while connected
//!     → Disconnected, Error, schedule_reconnect()
//!
//! reconnect loop (one task):
//!     sleep(reconnect_delay) → probe
//!         ok  → Reconnected, loop exits
//!         err → Error, sleep again (connection errors only)
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::observability::metrics;
use crate::resilience::{retry_with_backoff, CircuitBreaker, RetrySchedule, Retryable};
use crate::upstream::client::UpstreamClient;
use crate::upstream::error::{UpstreamError, UpstreamFailure};

/// Capability endpoints, tried in order until one answers.
pub const PROBE_PATHS: [&str; 4] = [
    "/rest/api/1.0/application-properties",
    "/rest/api/latest/application-properties",
    "/rest/api/1.0/server-info",
    "/rest/api/latest/server-info",
];

/// Edition of the upstream deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerType {
    Cloud,
    #[serde(rename = "Data Center")]
    DataCenter,
    Server,
}

/// Identity of the upstream, inferred from the probe payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamInfo {
    pub version: String,
    #[serde(rename = "type")]
    pub server_type: ServerType,
}

/// Lifecycle notifications.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected(UpstreamInfo),
    Disconnected,
    Reconnected(UpstreamInfo),
    Error(UpstreamError),
}

impl ConnectionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionEvent::Connected(_) => "connected",
            ConnectionEvent::Disconnected => "disconnected",
            ConnectionEvent::Reconnected(_) => "reconnected",
            ConnectionEvent::Error(_) => "error",
        }
    }
}

pub type ConnectionListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Infer identity from a probe payload.
///
/// Best-effort: an explicit `deploymentType` wins, then the host name, then
/// `Server`.
pub fn infer_upstream_info(payload: &Value, host: &str) -> UpstreamInfo {
    let deployment = payload
        .get("deploymentType")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);

    let server_type = match deployment.as_deref() {
        Some(d) if d.contains("cloud") => ServerType::Cloud,
        Some(d) if d.contains("data") => ServerType::DataCenter,
        _ if host.contains("bitbucket.org") => ServerType::Cloud,
        _ => ServerType::Server,
    };

    let version = payload
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    UpstreamInfo {
        version,
        server_type,
    }
}

/// Owns connectivity to the upstream API.
pub struct UpstreamConnectionManager {
    client: Arc<dyn UpstreamClient>,
    config: ConnectionConfig,
    breaker: Option<CircuitBreaker>,
    connected: AtomicBool,
    info: ArcSwapOption<UpstreamInfo>,
    listeners: Mutex<Vec<ConnectionListener>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by `dispose()`; reconnect loops from older generations exit.
    generation: AtomicU64,
}

impl UpstreamConnectionManager {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        config: ConnectionConfig,
        breaker: Option<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            config,
            breaker,
            connected: AtomicBool::new(false),
            info: ArcSwapOption::empty(),
            listeners: Mutex::new(Vec::new()),
            reconnect: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> Option<UpstreamInfo> {
        self.info.load_full().map(|info| (*info).clone())
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Register a lifecycle listener. Listeners run synchronously on the
    /// emitting task and must not block.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    pub fn has_pending_reconnect(&self) -> bool {
        lock(&self.reconnect)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Probe the upstream, retrying connection errors.
    ///
    /// On failure the manager is marked disconnected and `Disconnected` then
    /// `Error` are emitted before the error is returned.
    pub async fn connect(&self) -> Result<UpstreamInfo, UpstreamError> {
        match self.establish().await {
            Ok(info) => {
                self.cancel_reconnect();
                self.mark_connected(&info);
                tracing::info!(
                    version = %info.version,
                    server_type = ?info.server_type,
                    "Connected to upstream"
                );
                self.emit(&ConnectionEvent::Connected(info.clone()));
                Ok(info)
            }
            Err(e) => {
                self.mark_disconnected();
                tracing::error!(error = %e, kind = e.kind(), "Upstream connection failed");
                self.emit(&ConnectionEvent::Disconnected);
                self.emit(&ConnectionEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Schedule the reconnect loop unless one is already pending.
    pub fn schedule_reconnect(self: &Arc<Self>) {
        let mut slot = lock(&self.reconnect);
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::debug!("Reconnect already pending");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available, reconnect not scheduled");
            return;
        };

        let delay = self.config.reconnect_delay();
        let generation = self.generation.load(Ordering::SeqCst);
        tracing::info!(delay = ?delay, "Scheduling upstream reconnect");
        *slot = Some(runtime.spawn(reconnect_loop(Arc::downgrade(self), generation, delay)));
    }

    /// Cancel any pending reconnect and drop every listener. Idempotent.
    pub fn dispose(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect();
        lock(&self.listeners).clear();
        tracing::debug!("Upstream connection manager disposed");
    }

    /// React to a failed upstream call.
    ///
    /// Connection errors mark the upstream down and schedule a reconnect;
    /// other classified errors are only emitted.
    pub fn report_failure(self: &Arc<Self>, err: &UpstreamError) {
        match err {
            UpstreamError::CircuitOpen { .. } => {}
            UpstreamError::Connection { .. } => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    metrics::record_upstream_connected(false);
                    tracing::warn!(error = %err, "Upstream connection lost");
                    self.emit(&ConnectionEvent::Disconnected);
                }
                self.emit(&ConnectionEvent::Error(err.clone()));
                self.schedule_reconnect();
            }
            _ => self.emit(&ConnectionEvent::Error(err.clone())),
        }
    }

    /// Run an upstream request through the breaker (when configured).
    ///
    /// Only connection-class failures count against the breaker.
    pub async fn call<T, F, Fut>(self: &Arc<Self>, op: F) -> Result<T, UpstreamError>
    where
        F: FnOnce(Arc<dyn UpstreamClient>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let client = Arc::clone(&self.client);
        let result = match &self.breaker {
            Some(breaker) => breaker
                .call_filtered(
                    || async move { op(client).await.map_err(UpstreamError::classify) },
                    |e: &UpstreamError| e.is_retryable(),
                )
                .await
                .map_err(UpstreamError::from),
            None => op(client).await.map_err(UpstreamError::classify),
        };

        if let Err(e) = &result {
            self.report_failure(e);
        }
        result
    }

    pub async fn get_json(self: &Arc<Self>, path: &str) -> Result<Value, UpstreamError> {
        let path = path.to_string();
        self.call(move |client| async move { client.get_json(&path).await })
            .await
    }

    async fn establish(&self) -> Result<UpstreamInfo, UpstreamError> {
        let schedule = RetrySchedule::new(self.config.retry_base_delay(), self.config.retry_attempts);
        retry_with_backoff(schedule, |attempt| {
            tracing::debug!(attempt, host = self.client.host(), "Probing upstream");
            self.probe()
        })
        .await
    }

    async fn probe(&self) -> Result<UpstreamInfo, UpstreamError> {
        for path in PROBE_PATHS {
            match self.client.get_json(path).await {
                Ok(payload) => return Ok(infer_upstream_info(&payload, self.client.host())),
                Err(failure) if failure.is_not_found() => {
                    tracing::debug!(path, "Probe endpoint not found, trying next");
                }
                Err(failure) => return Err(UpstreamError::classify(failure)),
            }
        }
        Err(UpstreamError::undetectable())
    }

    fn mark_connected(&self, info: &UpstreamInfo) {
        self.info.store(Some(Arc::new(info.clone())));
        self.connected.store(true, Ordering::SeqCst);
        metrics::record_upstream_connected(true);
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        metrics::record_upstream_connected(false);
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = lock(&self.reconnect).take() {
            handle.abort();
            tracing::debug!("Pending reconnect cancelled");
        }
    }

    fn emit(&self, event: &ConnectionEvent) {
        metrics::record_connection_event(event.kind());
        // Snapshot so listeners may register or dispose while being notified.
        let listeners: Vec<ConnectionListener> = lock(&self.listeners).clone();
        for listener in listeners {
            listener(event);
        }
    }
}

async fn reconnect_loop(weak: Weak<UpstreamConnectionManager>, generation: u64, delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;

        let Some(manager) = weak.upgrade() else {
            return;
        };
        if manager.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        tracing::info!("Attempting upstream reconnect");
        let result = manager.establish().await;
        if manager.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match result {
            Ok(info) => {
                lock(&manager.reconnect).take();
                manager.mark_connected(&info);
                tracing::info!(version = %info.version, "Reconnected to upstream");
                manager.emit(&ConnectionEvent::Reconnected(info));
                return;
            }
            Err(e) => {
                manager.emit(&ConnectionEvent::Error(e.clone()));
                if !e.is_retryable() {
                    tracing::error!(error = %e, "Reconnect failed with non-retryable error, giving up");
                    lock(&manager.reconnect).take();
                    return;
                }
                tracing::warn!(error = %e, delay = ?delay, "Reconnect failed, rescheduling");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
