//! Bounded retry with exponential backoff
//!
//! Attempt `n` (1-based) that fails with a retryable error is followed by a
//! pause of `base_delay * multiplier^(n-1)`, capped at `max_delay`, plus up
//! to 10% random jitter. The pause is cancellable.

use crate::circuit_breaker::{CallOutcome, ClassifyOutcome};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether an error is worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry budget and backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound on any single pause
    pub max_delay: Duration,
    /// Backoff multiplier (exponential backoff)
    pub multiplier: f64,
    /// Add up to 10% random jitter to each pause
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the pause after failed attempt `attempt`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.base_delay.as_millis() as f64 * factor).min(u64::MAX as f64) as u64;
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Pause after failed attempt `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter {
            return delay;
        }

        let jitter_range = delay.as_millis() as u64 / 10;
        let jitter = if jitter_range > 0 {
            rand::rng().random_range(0..=jitter_range)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Why [`retry`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt in the budget failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-retryable error
    Aborted(E),
    /// Cancelled while pausing between attempts
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The error from the final attempt
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "Gave up after {} attempts: {}", attempts, last)
            }
            RetryError::Aborted(e) => write!(f, "{}", e),
            RetryError::Cancelled { attempts, last } => {
                write!(f, "Cancelled after {} attempts (last error: {})", attempts, last)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error())
    }
}

impl<E: ClassifyOutcome> ClassifyOutcome for RetryError<E> {
    fn breaker_outcome(&self) -> CallOutcome {
        match self {
            RetryError::Exhausted { .. } => CallOutcome::Unhealthy,
            RetryError::Aborted(e) => e.breaker_outcome(),
            RetryError::Cancelled { .. } => CallOutcome::Ignored,
        }
    }
}

/// Run `op` until it succeeds, fails terminally, or the budget runs out
///
/// `op` receives the 1-based attempt number.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let e = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !e.is_retryable() {
            return Err(RetryError::Aborted(e));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted { attempts: attempt, last: e });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, max_attempts, delay = ?delay, error = %e, "Retrying after backoff");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt, last: e });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
