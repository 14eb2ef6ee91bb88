/*!
 * Configuration types for Hansard
 */

use crate::error::{HansardError, Result};
#[cfg(feature = "governor-impl")]
use hansard_core_resilience::GovernorRateLimiter;
use hansard_core_resilience::{CircuitBreakerConfig, Limiter, RateLimiter, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration, one section per concern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HansardConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream API location and HTTP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is joined onto
    #[serde(default)]
    pub base_url: String,

    /// Timeout for a single HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Requests allowed back-to-back after an idle period
    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            algorithm: RateLimitAlgorithm::default(),
        }
    }
}

/// Limiter implementation behind `rate_limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Mutex-guarded token bucket
    #[default]
    TokenBucket,
    /// `governor`'s GCRA; needs the `governor-impl` feature
    Gcra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per logical request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
        }
    }
}

/// Which calls share a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker for the whole upstream
    #[default]
    Shared,
    /// One breaker per entity kind
    PerEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,

    /// Bounds one logical call, all retry attempts included
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub scope: BreakerScope,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
            call_timeout_secs: default_call_timeout_secs(),
            scope: BreakerScope::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard ceiling on pages per listing
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Polite pause between pages and between sub-units
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Deadline for one unit (a month, the roster, a proposition window)
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,

    /// Pause after a failed unit (None = breaker reset timeout)
    #[serde(default)]
    pub failure_cooldown_ms: Option<u64>,

    /// Backfill months processed at once
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Proposition window for an incremental run with no prior success
    #[serde(default = "default_proposition_lookback_days")]
    pub proposition_lookback_days: u32,

    /// Deadline for a whole run
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            unit_timeout_secs: default_unit_timeout_secs(),
            failure_cooldown_ms: None,
            max_concurrent_units: default_max_concurrent_units(),
            proposition_lookback_days: default_proposition_lookback_days(),
            run_deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, or `:memory:`
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("hansard/{}", env!("CARGO_PKG_VERSION"))
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_max_failures() -> usize {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_success_threshold() -> usize {
    2
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    500
}

fn default_page_delay_ms() -> u64 {
    250
}

fn default_unit_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent_units() -> usize {
    1
}

fn default_proposition_lookback_days() -> u32 {
    7
}

fn default_cache_ttl_secs() -> u64 {
    900
}

fn default_eviction_interval_secs() -> u64 {
    60
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_store_path() -> String {
    "hansard.db".to_string()
}

impl HansardConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| HansardError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            HansardError::ConfigFile { reason, .. } => HansardError::ConfigFile {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| HansardError::ConfigFile {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Render as TOML, e.g. for `check-config`
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HansardError::Config(vec![e.to_string()]))
    }

    /// Check semantic constraints, reporting every violation at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.api.base_url.trim().is_empty() {
            problems.push("api.base_url must be set".to_string());
        } else if let Err(e) = Url::parse(&self.api.base_url) {
            problems.push(format!("api.base_url is not a valid URL: {}", e));
        }
        if self.api.request_timeout_secs == 0 {
            problems.push("api.request_timeout_secs must be > 0".to_string());
        }

        let rps = self.rate_limit.requests_per_second;
        if !(rps.is_finite() && rps > 0.0) {
            problems.push(format!("rate_limit.requests_per_second must be > 0, got {}", rps));
        }
        if self.rate_limit.burst == 0 {
            problems.push("rate_limit.burst must be >= 1".to_string());
        }
        #[cfg(not(feature = "governor-impl"))]
        if self.rate_limit.algorithm == RateLimitAlgorithm::Gcra {
            problems.push(
                "rate_limit.algorithm = \"gcra\" needs the governor-impl feature".to_string(),
            );
        }

        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be >= 1".to_string());
        }
        if self.retry.max_backoff_ms < self.retry.base_backoff_ms {
            problems.push("retry.max_backoff_ms must be >= retry.base_backoff_ms".to_string());
        }

        if self.breaker.max_failures == 0 {
            problems.push("breaker.max_failures must be >= 1".to_string());
        }
        if self.breaker.success_threshold == 0 {
            problems.push("breaker.success_threshold must be >= 1".to_string());
        }
        if self.breaker.call_timeout_secs == 0 {
            problems.push("breaker.call_timeout_secs must be > 0".to_string());
        }

        if self.sync.page_size == 0 {
            problems.push("sync.page_size must be >= 1".to_string());
        }
        if self.sync.max_pages == 0 {
            problems.push("sync.max_pages must be >= 1".to_string());
        }
        if self.sync.unit_timeout_secs == 0 {
            problems.push("sync.unit_timeout_secs must be > 0".to_string());
        }
        if self.sync.max_concurrent_units == 0 {
            problems.push("sync.max_concurrent_units must be >= 1".to_string());
        }

        if self.cache.max_entries == 0 {
            problems.push("cache.max_entries must be >= 1".to_string());
        }
        if self.cache.eviction_interval_secs == 0 {
            problems.push("cache.eviction_interval_secs must be > 0".to_string());
        }

        if self.store.path.trim().is_empty() {
            problems.push("store.path must be set".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HansardError::Config(problems))
        }
    }

    /// Parsed base URL, normalised so relative paths join under it
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| HansardError::Config(vec![format!("api.base_url: {}", e)]))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_backoff_ms),
            max_delay: Duration::from_millis(self.retry.max_backoff_ms),
            jitter: self.retry.jitter,
            ..Default::default()
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.breaker.max_failures,
            reset_timeout: Duration::from_millis(self.breaker.reset_timeout_ms),
            success_threshold: self.breaker.success_threshold,
            call_timeout: Duration::from_secs(self.breaker.call_timeout_secs),
        }
    }

    pub fn rate_limiter(&self) -> Result<Limiter> {
        let RateLimitConfig {
            requests_per_second: rps,
            burst,
            algorithm,
        } = self.rate_limit;
        let limiter = match algorithm {
            RateLimitAlgorithm::TokenBucket => RateLimiter::new(rps, burst).map(Limiter::from),
            #[cfg(feature = "governor-impl")]
            RateLimitAlgorithm::Gcra => GovernorRateLimiter::new(rps, burst).map(Limiter::Gcra),
            #[cfg(not(feature = "governor-impl"))]
            RateLimitAlgorithm::Gcra => Err(hansard_core_resilience::ResilienceError::InvalidConfig(
                "rate_limit.algorithm = \"gcra\" needs the governor-impl feature".to_string(),
            )),
        };
        limiter.map_err(|e| HansardError::Config(vec![e.to_string()]))
    }

    /// Pause after a failed unit; at least the breaker reset timeout by default
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(
            self.sync
                .failure_cooldown_ms
                .unwrap_or(self.breaker.reset_timeout_ms),
        )
    }
}
