//! Exponential backoff.

use std::time::Duration;

/// Upper bound applied to every computed delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before retrying after the zero-based `attempt` failed:
/// `base * 2^attempt`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(max)
}
