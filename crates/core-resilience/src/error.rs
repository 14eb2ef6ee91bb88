//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the breaker and limiter themselves.
///
/// The wrapped operation's own error travels through
/// [`BreakerError::Inner`](crate::circuit_breaker::BreakerError) untouched;
/// this enum only covers what the primitives decide on their own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// The caller gave up while waiting for a rate-limit token
    #[error("Cancelled while waiting for a rate-limit token")]
    RateLimitCancelled,

    /// The guarded call exceeded its per-call deadline
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// Invalid construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
