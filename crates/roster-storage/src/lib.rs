//! Upstream Cargo-query fetching with backoff, plus the persisted player store contract.

mod memory;
mod pg;

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use roster_core::{PlayerPage, PlayerSearch, PlayerWrite, StoredPlayer};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub use memory::MemoryPlayerStore;
pub use pg::{connect_pool, run_migrations, PgPlayerStore};

pub const CRATE_NAME: &str = "roster-storage";

/// Retry hint reported when upstream rate-limits without a `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const ERROR_BODY_PREVIEW: usize = 512;

/// One Cargo `action=cargoquery` request. `limit` is a hard cap applied by
/// upstream; a query covers exactly one offset/limit window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoQuery {
    pub tables: String,
    pub fields: String,
    pub where_clause: Option<String>,
    pub join_on: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<NonZeroU32>,
    pub offset: Option<u32>,
}

impl CargoQuery {
    pub fn new(tables: impl Into<String>, fields: impl Into<String>) -> Self {
        Self {
            tables: tables.into(),
            fields: fields.into(),
            where_clause: None,
            join_on: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn where_clause(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn join_on(mut self, join_on: impl Into<String>) -> Self {
        self.join_on = Some(join_on.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn window(mut self, limit: NonZeroU32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("action", "cargoquery".to_string()),
            ("format", "json".to_string()),
            ("origin", "*".to_string()),
            ("tables", self.tables.clone()),
            ("fields", self.fields.clone()),
        ];
        if let Some(clause) = &self.where_clause {
            params.push(("where", clause.clone()));
        }
        if let Some(join_on) = &self.join_on {
            params.push(("join_on", join_on.clone()));
        }
        if let Some(order_by) = &self.order_by {
            params.push(("order_by", order_by.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Transport failures are retryable. A body cut off mid-stream surfaces as
/// `is_body` or `is_decode` depending on which layer saw it.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.is_body()
        || err.is_decode()
    {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Matches MediaWiki's `ratelimited` error code and its variants.
pub fn is_rate_limit_code(code: &str) -> bool {
    code.to_ascii_lowercase().contains("ratelimit")
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    /// Total sleep budget for one `fetch`. A retry whose delay would overrun it
    /// is abandoned and the last failure is returned.
    pub max_elapsed: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(300),
            max_elapsed: None,
        }
    }
}

impl BackoffPolicy {
    /// `min(max_delay, base_delay * 2^attempt)`, without jitter.
    pub fn base_delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn within(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.base_delay_for_attempt(attempt_index) + jitter
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl HttpClientConfig {
    /// Fits one `fetch` inside `deadline`: each request is capped at the
    /// deadline and backoff sleeps at half of it.
    pub fn bounded_by(mut self, deadline: Duration) -> Self {
        self.timeout = self.timeout.min(deadline);
        self.backoff = self.backoff.within(deadline / 2);
        self
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream rate limited after {attempts} attempts (retry after {}s)", retry_after.as_secs())]
    RateLimited { retry_after: Duration, attempts: usize },
    #[error("upstream error (status {status:?}, code {code:?}): {message}")]
    Upstream {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Why a single attempt did not produce a payload but may be retried.
#[derive(Debug)]
enum RetryableFailure {
    RateLimited(Option<Duration>),
    Server { status: u16, body: String },
    Transport(reqwest::Error),
}

impl RetryableFailure {
    fn exhausted(self, attempts: usize) -> FetchError {
        match self {
            RetryableFailure::RateLimited(retry_after) => FetchError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                attempts,
            },
            RetryableFailure::Server { status, body } => FetchError::Upstream {
                status: Some(status),
                code: None,
                message: body,
            },
            RetryableFailure::Transport(err) => FetchError::Request(err),
        }
    }
}

fn transport_failure(
    err: reqwest::Error,
) -> Result<Result<JsonValue, RetryableFailure>, FetchError> {
    match classify_reqwest_error(&err) {
        RetryDisposition::Retryable => Ok(Err(RetryableFailure::Transport(err))),
        RetryDisposition::NonRetryable => Err(FetchError::Request(err)),
    }
}

/// Backoff fetcher for the Cargo query endpoint.
#[derive(Debug)]
pub struct CargoFetcher {
    client: reqwest::Client,
    endpoint: String,
    backoff: BackoffPolicy,
}

impl CargoFetcher {
    pub fn new(endpoint: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            backoff: config.backoff,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Runs `query`, retrying rate-limit and 5xx responses up to
    /// `max_retries` times. Returns the parsed JSON payload.
    pub async fn fetch(&self, query: &CargoQuery) -> Result<JsonValue, FetchError> {
        let span = info_span!(
            "cargo_fetch",
            tables = %query.tables,
            offset = query.offset.unwrap_or(0),
            limit = query.limit.map(NonZeroU32::get).unwrap_or(0),
        );
        self.fetch_with_retries(query).instrument(span).await
    }

    async fn fetch_with_retries(&self, query: &CargoQuery) -> Result<JsonValue, FetchError> {
        let params = query.to_params();
        let max_attempts = self.backoff.max_retries + 1;
        let started = Instant::now();

        let mut attempt = 0usize;
        loop {
            let failure = match self.attempt(&params).await? {
                Ok(payload) => return Ok(payload),
                Err(failure) => failure,
            };
            attempt += 1;

            if attempt >= max_attempts {
                return Err(failure.exhausted(attempt));
            }

            let delay = self.backoff.delay_for_attempt(attempt - 1);
            if let Some(budget) = self.backoff.max_elapsed {
                if started.elapsed() + delay > budget {
                    warn!(attempt, ?delay, ?budget, "retry budget spent; giving up");
                    return Err(failure.exhausted(attempt));
                }
            }
            match &failure {
                RetryableFailure::RateLimited(_) => {
                    warn!(attempt, ?delay, "upstream rate limited; backing off")
                }
                RetryableFailure::Server { status, .. } => {
                    warn!(attempt, status, ?delay, "upstream server error; backing off")
                }
                RetryableFailure::Transport(err) => {
                    warn!(attempt, error = %err, ?delay, "upstream request failed; backing off")
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Outer `Err` is terminal; inner `Err` asks the caller to retry.
    async fn attempt(
        &self,
        params: &[(&'static str, String)],
    ) -> Result<Result<JsonValue, RetryableFailure>, FetchError> {
        let resp = match self.client.get(&self.endpoint).query(params).send().await {
            Ok(resp) => resp,
            Err(err) => return transport_failure(err),
        };

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Err(RetryableFailure::RateLimited(retry_after)));
        }

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(err) => return transport_failure(err),
        };

        if !status.is_success() {
            let preview = body_preview(&body);
            return match classify_status(status) {
                RetryDisposition::Retryable => Ok(Err(RetryableFailure::Server {
                    status: status.as_u16(),
                    body: preview,
                })),
                RetryDisposition::NonRetryable => Err(FetchError::Upstream {
                    status: Some(status.as_u16()),
                    code: None,
                    message: preview,
                }),
            };
        }

        let payload: JsonValue = serde_json::from_slice(&body)
            .map_err(|e| FetchError::MalformedResponse(format!("{e}: {}", body_preview(&body))))?;

        if let Some((code, info)) = upstream_error_object(&payload) {
            if code.as_deref().map(is_rate_limit_code).unwrap_or(false) {
                return Ok(Err(RetryableFailure::RateLimited(retry_after)));
            }
            return Err(FetchError::Upstream {
                status: Some(status.as_u16()),
                code,
                message: info,
            });
        }

        Ok(Ok(payload))
    }
}

/// Extracts `(code, info)` from a MediaWiki `{"error": {...}}` object embedded in a 200 body.
fn upstream_error_object(payload: &JsonValue) -> Option<(Option<String>, String)> {
    let error = payload.get("error")?;
    let code = error
        .get("code")
        .and_then(JsonValue::as_str)
        .map(ToString::to_string);
    let info = error
        .get("info")
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| error.to_string());
    Some((code, info))
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}

/// Which natural key a uniqueness violation was raised on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueKey {
    Slug,
    LeaguepediaId,
    Other(String),
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueKey::Slug => f.write_str("slug"),
            UniqueKey::LeaguepediaId => f.write_str("leaguepedia_id"),
            UniqueKey::Other(name) => f.write_str(name),
        }
    }
}

/// Maps a unique-constraint name from the `players` table to the key it guards.
pub fn unique_key_for_constraint(constraint: Option<&str>) -> UniqueKey {
    match constraint {
        Some(name) if name.contains("leaguepedia_id") => UniqueKey::LeaguepediaId,
        Some(name) if name.contains("slug") => UniqueKey::Slug,
        Some(name) => UniqueKey::Other(name.to_string()),
        None => UniqueKey::Other("unknown".to_string()),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("uniqueness conflict on {0}")]
    UniqueViolation(UniqueKey),
    #[error("player {0} not found")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 23505 = unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::UniqueViolation(unique_key_for_constraint(db_err.constraint()));
            }
        }
        StoreError::Database(err)
    }
}

/// Persisted store consumed by the reconciler and the query paths. Both
/// `slug` and `leaguepedia_id` are unique keys; violations must surface as
/// [`StoreError::UniqueViolation`].
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredPlayer>, StoreError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<StoredPlayer>, StoreError>;

    async fn find_by_leaguepedia_id(
        &self,
        leaguepedia_id: i64,
    ) -> Result<Option<StoredPlayer>, StoreError>;

    async fn insert(&self, write: &PlayerWrite) -> Result<StoredPlayer, StoreError>;

    /// Replaces every synced attribute of `id`, including the digest and sync timestamp.
    async fn update(&self, id: Uuid, write: &PlayerWrite) -> Result<StoredPlayer, StoreError>;

    async fn touch_synced(&self, id: Uuid, synced_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Clears the external id of `id` and blanks its digest so the next run rewrites it.
    async fn release_leaguepedia_id(&self, id: Uuid) -> Result<(), StoreError>;

    async fn search(&self, search: &PlayerSearch) -> Result<PlayerPage, StoreError>;
}
