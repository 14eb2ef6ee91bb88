//! Rate limiting for preventing upstream overload
//!
//! Token bucket with lazy, continuous refill: tokens accrue at
//! `refill_rate` per second up to `capacity`, computed on every acquire.
//! No background timer is involved.

use crate::error::ResilienceError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Rate limiter using token bucket algorithm
///
/// Clones share the same bucket.
///
/// # Example
/// ```no_run
/// use hansard_core_resilience::{RateLimiter, ResilienceError};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     // 2 requests per second, bursts of up to 5
///     let limiter = RateLimiter::new(2.0, 5)?;
///     let cancel = CancellationToken::new();
///
///     limiter.acquire(&cancel).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Maximum tokens held at once
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter, starting with a full bucket
    ///
    /// # Arguments
    /// * `requests_per_second` - Refill rate, must be positive
    /// * `burst` - Bucket capacity, must be at least 1
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self, ResilienceError> {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Err(ResilienceError::InvalidConfig(format!(
                "requests_per_second must be > 0, got {}",
                requests_per_second
            )));
        }
        if burst == 0 {
            return Err(ResilienceError::InvalidConfig(
                "burst must be >= 1".to_string(),
            ));
        }

        let capacity = f64::from(burst);
        Ok(Self {
            capacity,
            refill_rate: requests_per_second,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        })
    }

    /// Create a rate limiter with requests per second and a burst of the same size
    pub fn per_second(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        let capacity = f64::from(rps);
        Self {
            capacity,
            refill_rate: capacity,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Wait until a token is available
    ///
    /// Returns [`ResilienceError::RateLimitCancelled`] as soon as `cancel`
    /// fires. A token is never taken after cancellation. Dropping the future
    /// (e.g. on an outer timeout) likewise takes nothing.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ResilienceError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::RateLimitCancelled);
            }

            let wait = match self.try_take() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::RateLimitCancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.try_take().is_none()
    }

    /// Takes a token, or returns how long until the next one accrues.
    fn try_take(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(self.capacity, self.refill_rate);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// Tokens currently in the bucket (after refill)
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(self.capacity, self.refill_rate);
        bucket.tokens
    }

    /// Bucket capacity
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// GCRA rate limiter backed by `governor`
///
/// Lock-free alternative to [`RateLimiter`] with the same acquire contract.
/// Runs on governor's own clock, so paused Tokio time does not apply.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota, RateLimiter as InnerLimiter,
    };
    use std::fmt;
    use std::num::NonZeroU32;

    #[derive(Clone)]
    pub struct GovernorRateLimiter {
        limiter: Arc<InnerLimiter<NotKeyed, InMemoryState, DefaultClock>>,
        /// Time to replenish one permit
        period: Duration,
        burst: u32,
    }

    impl GovernorRateLimiter {
        /// Same arguments and validation as [`RateLimiter::new`]
        pub fn new(requests_per_second: f64, burst: u32) -> Result<Self, ResilienceError> {
            if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
                return Err(ResilienceError::InvalidConfig(format!(
                    "requests_per_second must be > 0, got {}",
                    requests_per_second
                )));
            }
            let max_burst = NonZeroU32::new(burst)
                .ok_or_else(|| ResilienceError::InvalidConfig("burst must be >= 1".to_string()))?;

            let period = Duration::try_from_secs_f64(1.0 / requests_per_second).map_err(|_| {
                ResilienceError::InvalidConfig(format!(
                    "requests_per_second out of range: {}",
                    requests_per_second
                ))
            })?;
            let quota = Quota::with_period(period)
                .ok_or_else(|| {
                    ResilienceError::InvalidConfig(format!(
                        "requests_per_second too high: {}",
                        requests_per_second
                    ))
                })?
                .allow_burst(max_burst);

            Ok(Self {
                limiter: Arc::new(InnerLimiter::direct(quota)),
                period,
                burst,
            })
        }

        /// Wait for a permit or cancellation
        pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ResilienceError> {
            if cancel.is_cancelled() {
                return Err(ResilienceError::RateLimitCancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResilienceError::RateLimitCancelled),
                _ = self.limiter.until_ready() => Ok(()),
            }
        }

        /// Take a permit if one is available right now
        pub fn try_acquire(&self) -> bool {
            self.limiter.check().is_ok()
        }

        pub fn capacity(&self) -> u32 {
            self.burst
        }

        pub fn period(&self) -> Duration {
            self.period
        }
    }

    impl fmt::Debug for GovernorRateLimiter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("GovernorRateLimiter")
                .field("period", &self.period)
                .field("burst", &self.burst)
                .finish()
        }
    }

}

/// The limiter a client holds, whichever algorithm backs it
#[derive(Clone, Debug)]
pub enum Limiter {
    TokenBucket(RateLimiter),
    #[cfg(feature = "governor-impl")]
    Gcra(governor_impl::GovernorRateLimiter),
}

impl Limiter {
    /// See [`RateLimiter::acquire`]
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ResilienceError> {
        match self {
            Limiter::TokenBucket(limiter) => limiter.acquire(cancel).await,
            #[cfg(feature = "governor-impl")]
            Limiter::Gcra(limiter) => limiter.acquire(cancel).await,
        }
    }

    pub fn try_acquire(&self) -> bool {
        match self {
            Limiter::TokenBucket(limiter) => limiter.try_acquire(),
            #[cfg(feature = "governor-impl")]
            Limiter::Gcra(limiter) => limiter.try_acquire(),
        }
    }

    pub fn capacity(&self) -> u32 {
        match self {
            Limiter::TokenBucket(limiter) => limiter.capacity(),
            #[cfg(feature = "governor-impl")]
            Limiter::Gcra(limiter) => limiter.capacity(),
        }
    }
}

impl From<RateLimiter> for Limiter {
    fn from(limiter: RateLimiter) -> Self {
        Limiter::TokenBucket(limiter)
    }
}
