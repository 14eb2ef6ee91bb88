//! Resilient HTTP client for the upstream open-data API
//!
//! Every request goes through the same stack:
//!
//! ```text
//! rate limiter (one token per logical call, cancellable)
//!   └─ circuit breaker (per-call timeout, one outcome per call)
//!        └─ retry (5xx / 429 / transport, exponential backoff)
//!             └─ reqwest GET (per-request timeout, cancellable)
//! ```
//!
//! Exhausting the retries books a single breaker failure. Terminal 4xx and
//! undecodable bodies are never retried.

use super::{DataSource, ExternalRecord, FetchError, Filters, ResponseCache, Window};
use crate::config::{BreakerScope, HansardConfig};
use crate::error::{HansardError, Result};
use async_trait::async_trait;
use hansard_core_resilience::{
    retry, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, Limiter, RetryPolicy,
};
use hansard_core_store::EntityKind;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Breakers guarding the upstream
#[derive(Debug, Clone)]
enum Breakers {
    Shared(CircuitBreaker),
    PerEntity {
        legislator: CircuitBreaker,
        expense: CircuitBreaker,
        proposition: CircuitBreaker,
    },
}

impl Breakers {
    fn new(scope: BreakerScope, config: CircuitBreakerConfig) -> Self {
        match scope {
            BreakerScope::Shared => Breakers::Shared(CircuitBreaker::with_name("upstream", config)),
            BreakerScope::PerEntity => Breakers::PerEntity {
                legislator: CircuitBreaker::with_name("legislator", config.clone()),
                expense: CircuitBreaker::with_name("expense", config.clone()),
                proposition: CircuitBreaker::with_name("proposition", config),
            },
        }
    }

    fn for_entity(&self, entity: EntityKind) -> &CircuitBreaker {
        match self {
            Breakers::Shared(breaker) => breaker,
            Breakers::PerEntity {
                legislator,
                expense,
                proposition,
            } => match entity {
                EntityKind::Legislator => legislator,
                EntityKind::Expense => expense,
                EntityKind::Proposition => proposition,
            },
        }
    }

    fn all(&self) -> Vec<&CircuitBreaker> {
        match self {
            Breakers::Shared(breaker) => vec![breaker],
            Breakers::PerEntity {
                legislator,
                expense,
                proposition,
            } => vec![legislator, expense, proposition],
        }
    }
}

/// Endpoint path for an entity, relative to the base URL
fn entity_path(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Legislator => "legislators",
        EntityKind::Expense => "expenses",
        EntityKind::Proposition => "propositions",
    }
}

/// Extract the `data` array from a list envelope
fn unwrap_list(url: &Url, body: Value) -> std::result::Result<Vec<Value>, FetchError> {
    let decode = |reason: &str| FetchError::Decode {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    match body {
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(decode("\"data\" is not an array")),
            None => Err(decode("missing \"data\" field")),
        },
        _ => Err(decode("expected a JSON object envelope")),
    }
}

/// Extract the `data` object from a single-record envelope
fn unwrap_one(url: &Url, body: Value) -> std::result::Result<Value, FetchError> {
    let decode = |reason: &str| FetchError::Decode {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    match body {
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(record @ Value::Object(_)) => Ok(record),
            Some(_) => Err(decode("\"data\" is not an object")),
            None => Err(decode("missing \"data\" field")),
        },
        _ => Err(decode("expected a JSON object envelope")),
    }
}

/// HTTP client with rate limiting, circuit breaking and retry
///
/// Share it behind an `Arc`; all state is internal and synchronised.
pub struct ResilientClient {
    http: reqwest::Client,
    base_url: Url,
    limiter: Limiter,
    breakers: Breakers,
    policy: RetryPolicy,
    cache: ResponseCache<(EntityKind, i64), ExternalRecord>,
    evictor: CancellationToken,
}

impl ResilientClient {
    /// Build the client and start the cache evictor
    ///
    /// The evictor stops when `shutdown` fires or the client is dropped.
    /// Must be called from inside a Tokio runtime.
    pub fn from_config(config: &HansardConfig, shutdown: &CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.api.user_agent.clone())
            .build()
            .map_err(|e| HansardError::Client(e.to_string()))?;

        let cache = ResponseCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        );
        let evictor = shutdown.child_token();
        cache.spawn_evictor(
            Duration::from_secs(config.cache.eviction_interval_secs.max(1)),
            evictor.clone(),
        );

        Ok(Self {
            http,
            base_url: config.base_url()?,
            limiter: config.rate_limiter()?,
            breakers: Breakers::new(config.breaker.scope, config.breaker_config()),
            policy: config.retry_policy(),
            cache,
            evictor,
        })
    }

    /// Breaker state for status output, one entry per breaker
    pub async fn breaker_snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let mut snapshots = Vec::new();
        for breaker in self.breakers.all() {
            snapshots.push((breaker.name().to_string(), breaker.snapshot().await));
        }
        snapshots
    }

    /// Number of cached single-record responses
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// GET `url` through the full resilience stack and parse the body as JSON
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        url: &Url,
    ) -> std::result::Result<Value, FetchError> {
        self.limiter.acquire(cancel).await?;

        let breaker = self.breakers.for_entity(entity);
        let policy = &self.policy;
        let result = breaker
            .execute(move || {
                retry(policy, cancel, move |attempt| {
                    self.send_once(cancel, url, attempt)
                })
            })
            .await;

        result.map_err(|e| {
            let err = FetchError::from_guarded(e);
            if !err.is_cancellation() {
                debug!(%url, entity = %entity, error = %err, "Fetch failed");
            }
            err
        })
    }

    /// One HTTP attempt
    async fn send_once(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        attempt: u32,
    ) -> std::result::Result<Value, FetchError> {
        debug!(%url, attempt, "GET");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.http.get(url.clone()).send() => {
                response.map_err(|e| FetchError::transport(url.as_str(), &e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let url = url.to_string();
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                warn!(%url, status = status.as_u16(), attempt, "Upstream returned retryable status");
                Err(FetchError::RetryableHttp {
                    status: status.as_u16(),
                    url,
                })
            } else {
                Err(FetchError::TerminalHttp {
                    status: status.as_u16(),
                    url,
                })
            };
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            body = response.bytes() => body.map_err(|e| FetchError::transport(url.as_str(), &e))?,
        };

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", path, e)))
    }
}

impl Drop for ResilientClient {
    fn drop(&mut self) {
        self.evictor.cancel();
    }
}

#[async_trait]
impl DataSource for ResilientClient {
    async fn list_page(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        filters: &Filters,
        page: u32,
        page_size: u32,
    ) -> std::result::Result<Vec<ExternalRecord>, FetchError> {
        let mut url = self.endpoint(entity_path(entity))?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in filters.iter() {
                query.append_pair(name, value);
            }
            query
                .append_pair("page", &page.to_string())
                .append_pair("page_size", &page_size.to_string());
        }

        let body = self.fetch(cancel, entity, &url).await?;
        unwrap_list(&url, body)
    }

    async fn get_by_id(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        id: i64,
    ) -> std::result::Result<Option<ExternalRecord>, FetchError> {
        if let Some(hit) = self.cache.get(&(entity, id)) {
            debug!(entity = %entity, id, "Cache hit");
            return Ok(Some(hit));
        }

        let url = self.endpoint(&format!("{}/{}", entity_path(entity), id))?;
        let body = match self.fetch(cancel, entity, &url).await {
            Ok(body) => body,
            Err(e) if e.status() == Some(404) => return Ok(None),
            Err(e) => return Err(e),
        };

        let record = unwrap_one(&url, body)?;
        self.cache.insert((entity, id), record.clone());
        Ok(Some(record))
    }

    async fn list_by_window(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        window: &Window,
    ) -> std::result::Result<Vec<ExternalRecord>, FetchError> {
        let mut url = self.endpoint(entity_path(entity))?;
        url.query_pairs_mut()
            .append_pair("start", &window.start.format("%Y-%m-%d").to_string())
            .append_pair("end", &window.end.format("%Y-%m-%d").to_string());

        let body = self.fetch(cancel, entity, &url).await?;
        unwrap_list(&url, body)
    }
}
