//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and outcomes are counted
//! - Open: upstream assumed down, calls fail fast
//! - Half-Open: one trial call decides whether to close again
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure % > threshold with >= volume_threshold calls in window
//! Open → Half-Open: reset_timeout elapsed (timer task)
//! Half-Open → Closed: trial call succeeds (counters reset)
//! Half-Open → Open: trial call fails (timer restarts)
//! ```
//!
//! Transition events are broadcast for observation only; nothing outside
//! this module can change the state.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Transition notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    Open,
    HalfOpen,
    Close,
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit '{name}' is open")]
    Open { name: String },

    /// The call exceeded the configured timeout.
    #[error("circuit '{name}' call timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The wrapped operation failed.
    #[error("{0}")]
    Inner(E),
}

struct Core {
    state: CircuitState,
    /// Outcomes inside the rolling window; `true` marks a failure.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every trip so stale reset timers do nothing.
    generation: u64,
}

struct Shared {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
    events: broadcast::Sender<CircuitEvent>,
}

/// A cloneable handle to one breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Shared>,
}

enum Admission {
    Normal,
    Trial,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Shared {
                name: name.into(),
                config,
                core: Mutex::new(Core {
                    state: CircuitState::Closed,
                    window: VecDeque::new(),
                    opened_at: None,
                    trial_in_flight: false,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.inner.events.subscribe()
    }

    /// Run `op` through the breaker.
    ///
    /// Fails fast with [`CircuitBreakerError::Open`] while open, or while a
    /// half-open trial is already running.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(op, |_| true).await
    }

    /// Like [`call`](Self::call), but errors for which `counts` returns false
    /// are passed through without being recorded as failures.
    pub async fn call_filtered<T, E, F, Fut, P>(
        &self,
        op: F,
        counts: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self.inner.admit().ok_or_else(|| CircuitBreakerError::Open {
            name: self.inner.name.clone(),
        })?;

        let mut trial = match admission {
            Admission::Trial => Some(TrialGuard {
                shared: Arc::clone(&self.inner),
                settled: false,
            }),
            Admission::Normal => None,
        };

        let outcome = match self.inner.config.timeout_ms {
            0 => op().await.map_err(CircuitBreakerError::Inner),
            ms => {
                let after = Duration::from_millis(ms);
                match tokio::time::timeout(after, op()).await {
                    Ok(result) => result.map_err(CircuitBreakerError::Inner),
                    Err(_) => Err(CircuitBreakerError::Timeout {
                        name: self.inner.name.clone(),
                        after,
                    }),
                }
            }
        };

        let is_trial = trial.is_some();
        if let Some(guard) = trial.as_mut() {
            guard.settled = true;
        }
        let failed = match &outcome {
            Ok(_) => false,
            Err(CircuitBreakerError::Inner(e)) => counts(e),
            Err(_) => true,
        };
        self.inner.record(failed, is_trial);
        outcome
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        // Never held across an await; a poisoned lock still holds valid counters.
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(self: &Arc<Self>) -> Option<Admission> {
        let mut core = self.lock();

        if core.state == CircuitState::Open {
            let reset = Duration::from_millis(self.config.reset_timeout_ms);
            let due = core.opened_at.map(|at| at.elapsed() >= reset).unwrap_or(true);
            if due {
                let generation = core.generation;
                self.enter_half_open(&mut core, generation);
            }
        }

        match core.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen if !core.trial_in_flight => {
                core.trial_in_flight = true;
                Some(Admission::Trial)
            }
            _ => None,
        }
    }

    fn record(self: &Arc<Self>, failed: bool, trial: bool) {
        let mut core = self.lock();

        if trial {
            core.trial_in_flight = false;
            if core.state != CircuitState::HalfOpen {
                return;
            }
            if failed {
                self.trip(&mut core);
            } else {
                core.state = CircuitState::Closed;
                core.window.clear();
                core.opened_at = None;
                self.emit(CircuitEvent::Close);
            }
            return;
        }

        // Late completions from calls admitted before a trip are ignored.
        if core.state != CircuitState::Closed {
            return;
        }

        let now = Instant::now();
        let window = Duration::from_millis(self.config.rolling_window_ms);
        while let Some((at, _)) = core.window.front() {
            if now.duration_since(*at) > window {
                core.window.pop_front();
            } else {
                break;
            }
        }
        core.window.push_back((now, failed));

        if !failed {
            return;
        }

        let total = core.window.len();
        let failures = core.window.iter().filter(|(_, f)| *f).count();
        let failure_pct = failures as f64 * 100.0 / total as f64;
        if total >= self.config.volume_threshold as usize
            && failure_pct > self.config.error_threshold_percentage
        {
            self.trip(&mut core);
        }
    }

    fn trip(self: &Arc<Self>, core: &mut Core) {
        core.state = CircuitState::Open;
        core.opened_at = Some(Instant::now());
        core.trial_in_flight = false;
        core.generation += 1;
        self.emit(CircuitEvent::Open);

        let reset = Duration::from_millis(self.config.reset_timeout_ms);
        let generation = core.generation;
        let weak: Weak<Shared> = Arc::downgrade(self);
        // Without a runtime the next admit() performs the transition lazily.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(reset).await;
                if let Some(shared) = weak.upgrade() {
                    let mut core = shared.lock();
                    shared.enter_half_open(&mut core, generation);
                }
            });
        }
    }

    fn enter_half_open(&self, core: &mut Core, generation: u64) {
        if core.state != CircuitState::Open || core.generation != generation {
            return;
        }
        core.state = CircuitState::HalfOpen;
        core.trial_in_flight = false;
        self.emit(CircuitEvent::HalfOpen);
    }

    fn emit(&self, event: CircuitEvent) {
        let state = match event {
            CircuitEvent::Open => CircuitState::Open,
            CircuitEvent::HalfOpen => CircuitState::HalfOpen,
            CircuitEvent::Close => CircuitState::Closed,
        };
        match event {
            CircuitEvent::Open => tracing::warn!(breaker = %self.name, "Circuit breaker opened"),
            _ => tracing::info!(breaker = %self.name, state = state.as_str(), "Circuit breaker transition"),
        }
        metrics::record_circuit_transition(&self.name, state.as_str());
        let _ = self.events.send(event);
    }
}

/// Releases the half-open slot if a trial call is dropped before finishing.
struct TrialGuard {
    shared: Arc<Shared>,
    settled: bool,
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.lock().trial_in_flight = false;
        }
    }
}
