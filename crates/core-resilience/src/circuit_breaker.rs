//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents hammering an upstream that is already failing.
//! It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Upstream is unhealthy, requests fail immediately
//! - HalfOpen: Letting trial calls through to see if the upstream has recovered
//!
//! The breaker never retries. Retrying is the caller's concern, and the
//! breaker only ever sees the aggregate outcome of whatever it wraps.

use crate::error::ResilienceError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately until `next_retry`
    Open { next_retry: Instant },
    /// Circuit is half-open, testing upstream recovery
    HalfOpen,
}

impl CircuitState {
    /// Short name for logs and status output
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub max_failures: usize,
    /// Duration to wait before transitioning from open to half-open
    pub reset_timeout: Duration,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: usize,
    /// Deadline applied to every guarded call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// How a finished call should be booked by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Upstream answered; counts toward closing the circuit
    Healthy,
    /// Upstream is misbehaving; counts toward opening the circuit
    Unhealthy,
    /// Says nothing about the upstream (e.g. the caller cancelled)
    Ignored,
}

/// Classification of an operation's error for breaker bookkeeping.
///
/// Errors are unhealthy by default.
pub trait ClassifyOutcome {
    fn breaker_outcome(&self) -> CallOutcome {
        CallOutcome::Unhealthy
    }
}

impl ClassifyOutcome for ResilienceError {
    fn breaker_outcome(&self) -> CallOutcome {
        match self {
            ResilienceError::CircuitOpen | ResilienceError::RateLimitCancelled => {
                CallOutcome::Ignored
            }
            _ => CallOutcome::Unhealthy,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked
    Open,
    /// The operation did not finish within the per-call timeout
    Timeout(Duration),
    /// The operation ran and failed
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Collapse breaker-originated variants into [`ResilienceError`]
    pub fn into_inner(self) -> Result<E, ResilienceError> {
        match self {
            BreakerError::Open => Err(ResilienceError::CircuitOpen),
            BreakerError::Timeout(d) => Err(ResilienceError::Timeout(d)),
            BreakerError::Inner(e) => Ok(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "{}", ResilienceError::CircuitOpen),
            BreakerError::Timeout(d) => write!(f, "{}", ResilienceError::Timeout(*d)),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Point-in-time view of the breaker, for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub last_failure: Option<Instant>,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    /// Current state of the circuit
    state: CircuitState,
    /// Consecutive failure count
    consecutive_failures: usize,
    /// Consecutive success count (used in half-open state)
    consecutive_successes: usize,
    /// When the most recent failure was recorded
    last_failure: Option<Instant>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
        }
    }
}

/// Circuit breaker for protecting against a failing upstream
///
/// Cloning is cheap and every clone shares the same state.
///
/// # Example
/// ```no_run
/// use hansard_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
///     let result = breaker
///         .execute(|| async { Ok::<_, ResilienceError>(42) })
///         .await;
///
///     assert_eq!(result.ok(), Some(42));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_name("default", config)
    }

    /// Create a named circuit breaker; the name shows up in logs
    pub fn with_name(name: &str, mut config: CircuitBreakerConfig) -> Self {
        config.max_failures = config.max_failures.max(1);
        config.success_threshold = config.success_threshold.max(1);
        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    pub async fn get_state(&self) -> CircuitState {
        let state = self.state.lock().await;
        state.state
    }

    /// Get current failure count
    pub async fn get_failure_count(&self) -> usize {
        let state = self.state.lock().await;
        state.consecutive_failures
    }

    /// Get current success count
    pub async fn get_success_count(&self) -> usize {
        let state = self.state.lock().await;
        state.consecutive_successes
    }

    /// Consistent copy of all counters
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().await;
        BreakerSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_failure: state.last_failure,
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Rejects with [`BreakerError::Open`] without invoking `op` while the
    /// circuit is open. Otherwise runs `op` under the per-call timeout and
    /// books the outcome. A timeout is booked as a failure.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyOutcome,
    {
        if self.check_and_update_state().await.is_err() {
            return Err(BreakerError::Open);
        }

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                match e.breaker_outcome() {
                    CallOutcome::Healthy => self.on_success().await,
                    CallOutcome::Unhealthy => self.on_failure().await,
                    CallOutcome::Ignored => {}
                }
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                debug!(breaker = %self.name, timeout = ?self.config.call_timeout, "Guarded call timed out");
                self.on_failure().await;
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Check circuit state and update if necessary
    async fn check_and_update_state(&self) -> Result<(), ResilienceError> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { next_retry } => {
                if Instant::now() >= next_retry {
                    // Transition to half-open for testing
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    info!(breaker = %self.name, "Circuit half-open, letting trial calls through");
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Handle successful operation
    async fn on_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;

                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    info!(breaker = %self.name, "Circuit closed, upstream recovered");
                }
            }
            // A call admitted before the circuit opened finished late; the
            // open period stands.
            CircuitState::Open { .. } => {}
        }
    }

    /// Handle failed operation
    async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.last_failure = Some(now);

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                if state.consecutive_failures >= self.config.max_failures {
                    state.state = CircuitState::Open {
                        next_retry: now + self.config.reset_timeout,
                    };
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        reset_timeout = ?self.config.reset_timeout,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state reopens the circuit
                state.state = CircuitState::Open {
                    next_retry: now + self.config.reset_timeout,
                };
                state.consecutive_successes = 0;
                warn!(breaker = %self.name, "Trial call failed, circuit reopened");
            }
            CircuitState::Open { .. } => {}
        }
    }
}
