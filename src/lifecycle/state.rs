//! Server and connection state shared with request handlers.

use serde::Serialize;

use crate::upstream::{ConnectionEvent, UpstreamInfo};

/// Transport server lifecycle.
///
/// ```text
/// Stopped → Starting → Running → Stopping → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot read by `/health`. Replaced as a whole on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_running: bool,
    pub upstream_connected: bool,
    pub upstream_info: Option<UpstreamInfo>,
    pub degraded_mode: bool,
}

impl ConnectionState {
    /// State after applying a lifecycle event; `None` when the event does not
    /// change connectivity.
    pub fn apply(&self, event: &ConnectionEvent) -> Option<Self> {
        match event {
            ConnectionEvent::Connected(info) | ConnectionEvent::Reconnected(info) => Some(Self {
                upstream_connected: true,
                upstream_info: Some(info.clone()),
                degraded_mode: false,
                ..self.clone()
            }),
            // Server info describes a live connection; reconnect fetches it again.
            ConnectionEvent::Disconnected => Some(Self {
                upstream_connected: false,
                upstream_info: None,
                degraded_mode: true,
                ..self.clone()
            }),
            ConnectionEvent::Error(_) => None,
        }
    }

    pub fn with_running(&self, is_running: bool) -> Self {
        Self {
            is_running,
            ..self.clone()
        }
    }
}
