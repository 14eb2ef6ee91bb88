//! Hansard Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the ingestion client wraps around
//! every outbound call to a slow, rate-limited public API:
//!
//! - **Rate Limiter**: Token bucket with lazy refill and cancellable waits,
//!   or GCRA through `governor` with the `governor-impl` feature
//! - **Circuit Breaker**: Fails fast while the upstream is unhealthy
//! - **Retry**: Bounded attempts with exponential, jittered backoff
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - HTTP, JSON or any particular API
//! - Storage systems
//! - Application-specific concerns
//!
//! Instances are constructed explicitly and shared by cloning (all state is
//! behind an `Arc`); there is no global state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Caller (sync orchestrator)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Wait for a token (cancellable)
//! │  (Token bucket, lazy refill)            │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Per-call timeout, one outcome/call)   │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry                             │  ← Bounded attempts
//! │  (Exponential backoff + jitter)         │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use hansard_core_resilience::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[derive(Debug)]
//! # struct Upstream;
//! # impl std::fmt::Display for Upstream {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("upstream") }
//! # }
//! # impl Retryable for Upstream { fn is_retryable(&self) -> bool { true } }
//! # impl ClassifyOutcome for Upstream {}
//! # async fn example() -> Result<(), ResilienceError> {
//! let limiter = RateLimiter::new(2.0, 5)?;
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let policy = RetryPolicy::default();
//! let cancel = CancellationToken::new();
//!
//! limiter.acquire(&cancel).await?;
//! let outcome = breaker
//!     .execute(|| async {
//!         retry(&policy, &cancel, |_attempt| async { Ok::<_, Upstream>(42) }).await
//!     })
//!     .await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CallOutcome, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, ClassifyOutcome,
};
pub use error::ResilienceError;
pub use rate_limiter::{Limiter, RateLimiter};
pub use retry::{retry, RetryError, RetryPolicy, Retryable};

#[cfg(feature = "governor-impl")]
pub use rate_limiter::governor_impl::GovernorRateLimiter;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use hansard_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{
        BreakerError, CallOutcome, CircuitBreaker, CircuitBreakerConfig, ClassifyOutcome,
    };
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::{Limiter, RateLimiter};
    pub use super::retry::{retry, RetryError, RetryPolicy, Retryable};
}
