//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an error is worth retrying (`Retryable`)
//! - Track the per-call schedule (`RetrySchedule`)
//! - Execute retries with exponential backoff
//!
//! # Design Decisions
//! - Only errors that report `is_retryable()` are retried; everything else
//!   returns immediately
//! - A schedule lives for exactly one retried operation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::{calculate_backoff, MAX_BACKOFF};

/// Errors that know whether a retry could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Ephemeral retry state for one operation.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    attempt: u32,
    base_delay: Duration,
    cap: u32,
}

impl RetrySchedule {
    /// `cap` is the number of retries allowed after the first try.
    pub fn new(base_delay: Duration, cap: u32) -> Self {
        Self {
            attempt: 0,
            base_delay,
            cap,
        }
    }

    /// Zero-based index of the try about to run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next try, advancing the schedule, or `None` once the
    /// cap is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.cap {
            return None;
        }
        let delay = calculate_backoff(self.attempt, self.base_delay, MAX_BACKOFF);
        self.attempt += 1;
        Some(delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// schedule is exhausted. `op` receives the zero-based attempt index.
pub async fn retry_with_backoff<T, E, F, Fut>(mut schedule: RetrySchedule, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    loop {
        let attempt = schedule.attempt();
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match schedule.next_delay() {
                Some(delay) => {
                    tracing::warn!(attempt, delay = ?delay, error = %e, "Retrying after transient failure");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_schedule_delays_and_cap() {
        let mut schedule = RetrySchedule::new(Duration::from_secs(1), 2);
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempt(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> =
            retry_with_backoff(RetrySchedule::new(Duration::from_secs(1), 2), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(Flaky(true))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> =
            retry_with_backoff(RetrySchedule::new(Duration::from_secs(1), 5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
