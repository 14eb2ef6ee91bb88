//! Integration tests for the resilience primitives working together
//!
//! These tests drive the breaker through full open/half-open/closed cycles
//! and check that limiter, retry and breaker compose the way the ingestion
//! client uses them.

use hansard_core_resilience::prelude::*;
use hansard_core_resilience::CircuitState;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct UpstreamDown;

impl fmt::Display for UpstreamDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("upstream returned 503")
    }
}

impl Retryable for UpstreamDown {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl ClassifyOutcome for UpstreamDown {}

async fn failing_call(breaker: &CircuitBreaker) -> Result<(), BreakerError<UpstreamDown>> {
    breaker.execute(|| async { Err(UpstreamDown) }).await
}

async fn succeeding_call(breaker: &CircuitBreaker) -> Result<u32, BreakerError<UpstreamDown>> {
    breaker.execute(|| async { Ok(7) }).await
}

#[tokio::test]
async fn test_open_wait_trial_close_cycle() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 2,
        reset_timeout: Duration::from_millis(50),
        success_threshold: 1,
        call_timeout: Duration::from_secs(1),
    });

    // Two failures open the circuit
    assert!(failing_call(&breaker).await.is_err());
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
    assert!(failing_call(&breaker).await.is_err());
    assert!(matches!(breaker.get_state().await, CircuitState::Open { .. }));

    // Rejected while the reset timeout is running
    assert!(matches!(succeeding_call(&breaker).await, Err(BreakerError::Open)));

    tokio::time::sleep(Duration::from_millis(60)).await;

    // One success in half-open closes it
    assert_eq!(succeeding_call(&breaker).await.unwrap(), 7);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);

    // And it stays closed with a clean failure counter
    assert_eq!(succeeding_call(&breaker).await.unwrap(), 7);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
    assert_eq!(breaker.get_failure_count().await, 0);
}

#[tokio::test]
async fn test_exhausted_retries_count_as_one_breaker_failure() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 2,
        reset_timeout: Duration::from_secs(10),
        success_threshold: 1,
        call_timeout: Duration::from_secs(5),
    });
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        jitter: false,
        ..Default::default()
    };
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let result: Result<(), _> = breaker
        .execute(|| {
            let attempts = attempts.clone();
            let policy = policy.clone();
            let cancel = cancel.clone();
            async move {
                retry(&policy, &cancel, |_| {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(UpstreamDown)
                    }
                })
                .await
            }
        })
        .await;

    assert!(matches!(
        result,
        Err(BreakerError::Inner(RetryError::Exhausted { attempts: 3, .. }))
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Three HTTP-level failures, one breaker failure
    assert_eq!(breaker.get_failure_count().await, 1);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_shared_breaker_across_tasks() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 4,
        reset_timeout: Duration::from_secs(10),
        ..Default::default()
    });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move { failing_call(&breaker).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    // Exactly one transition; the calls that arrived after it were rejected
    assert!(matches!(breaker.get_state().await, CircuitState::Open { .. }));
    assert_eq!(breaker.get_failure_count().await, 4);
}

#[tokio::test]
async fn test_limiter_cancellation_never_touches_breaker() {
    let limiter = RateLimiter::new(0.01, 1).unwrap();
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 1,
        ..Default::default()
    });
    let cancel = CancellationToken::new();

    limiter.acquire(&cancel).await.unwrap();
    cancel.cancel();

    let err = limiter.acquire(&cancel).await.unwrap_err();
    assert_eq!(err, ResilienceError::RateLimitCancelled);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
    assert_eq!(breaker.get_failure_count().await, 0);
}
