//! Errors produced while fetching from the upstream API

use hansard_core_resilience::{
    BreakerError, CallOutcome, ClassifyOutcome, ResilienceError, RetryError, Retryable,
};
use std::time::Duration;
use thiserror::Error;

/// Why a fetch did not produce a body
#[derive(Debug, Error)]
pub enum FetchError {
    /// Cancelled while waiting for a rate-limit token; nothing was sent
    #[error("Cancelled while waiting for a rate-limit token")]
    RateLimitCancelled,

    /// The circuit breaker is open; nothing was sent
    #[error("Circuit breaker is open, request not sent")]
    CircuitOpen,

    /// Every attempt failed with a retryable error
    #[error("Gave up after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: Box<FetchError> },

    /// 4xx other than 429; retrying will not help
    #[error("HTTP {status} from {url}")]
    TerminalHttp { status: u16, url: String },

    /// 5xx or 429 on a single attempt
    #[error("HTTP {status} from {url} (retryable)")]
    RetryableHttp { status: u16, url: String },

    /// 2xx whose body is not the expected shape
    #[error("Cannot decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// Connection, TLS or per-request timeout failure
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The caller's cancellation token fired during the request or backoff
    #[error("Request cancelled")]
    Cancelled,

    /// The per-call deadline elapsed
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub(crate) fn transport(url: &str, err: &reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }

    /// Flatten the breaker and retry wrappers around a fetch
    pub(crate) fn from_guarded(err: BreakerError<RetryError<FetchError>>) -> Self {
        match err {
            BreakerError::Open => FetchError::CircuitOpen,
            BreakerError::Timeout(d) => FetchError::Timeout(d),
            BreakerError::Inner(RetryError::Exhausted { attempts, last }) => {
                FetchError::RetriesExhausted {
                    attempts,
                    cause: Box::new(last),
                }
            }
            BreakerError::Inner(RetryError::Aborted(e)) => e,
            BreakerError::Inner(RetryError::Cancelled { .. }) => FetchError::Cancelled,
        }
    }

    /// Caller gave up; says nothing about the upstream
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled | FetchError::RateLimitCancelled)
    }

    /// Worth trying the same unit again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimitCancelled
                | FetchError::CircuitOpen
                | FetchError::RetriesExhausted { .. }
                | FetchError::Timeout(_)
        )
    }

    /// HTTP status, if the upstream answered
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::TerminalHttp { status, .. } | FetchError::RetryableHttp { status, .. } => {
                Some(*status)
            }
            FetchError::RetriesExhausted { cause, .. } => cause.status(),
            _ => None,
        }
    }
}

impl From<ResilienceError> for FetchError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::CircuitOpen => FetchError::CircuitOpen,
            ResilienceError::RateLimitCancelled => FetchError::RateLimitCancelled,
            ResilienceError::Timeout(d) => FetchError::Timeout(d),
            ResilienceError::InvalidConfig(msg) => FetchError::InvalidRequest(msg),
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RetryableHttp { .. } | FetchError::Transport { .. }
        )
    }
}

impl ClassifyOutcome for FetchError {
    fn breaker_outcome(&self) -> CallOutcome {
        match self {
            // A 4xx is about the request, not the upstream's health
            FetchError::TerminalHttp { .. }
            | FetchError::Cancelled
            | FetchError::RateLimitCancelled
            | FetchError::CircuitOpen
            | FetchError::InvalidRequest(_) => CallOutcome::Ignored,
            FetchError::RetriesExhausted { .. }
            | FetchError::RetryableHttp { .. }
            | FetchError::Decode { .. }
            | FetchError::Transport { .. }
            | FetchError::Timeout(_) => CallOutcome::Unhealthy,
        }
    }
}
