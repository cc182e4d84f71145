//! Bounded retry of a whole operation
//!
//! The operation is treated as a black box: every failure is logged and
//! retried until the attempt budget is spent, regardless of its kind.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, warn};

/// Attempts made by "get info" before giving up
pub const DEFAULT_ATTEMPTS: usize = 25;

/// How often and how fast to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub attempts: usize,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// All attempts failed
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub last_error: E,
}

/// Run `operation` until it succeeds or `policy.attempts` runs are used up.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_bounded_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let delay_ms = u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX);
    let strategy = FixedInterval::from_millis(delay_ms).take(attempts - 1);

    let mut attempt = 0;
    let result = Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        let pending = operation(current);
        async move {
            let outcome = pending.await;
            match &outcome {
                Ok(_) if current > 1 => debug!(attempt = current, "Attempt succeeded after retry"),
                Ok(_) => {}
                Err(e) => warn!(attempt = current, of = attempts, error = %e, "Attempt failed"),
            }
            outcome
        }
    })
    .await;

    result.map_err(|last_error| RetryExhausted {
        attempts: attempt,
        last_error,
    })
}
