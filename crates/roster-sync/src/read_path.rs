//! Read and query paths: store search, single lookup, and the live upstream
//! listing with its rate-limit fallback cache.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use roster_adapters::{normalize_row, PlayerSource, SourceError};
use roster_core::{PlayerPage, PlayerRecord, PlayerSearch, StoredPlayer};
use roster_storage::{FetchError, PlayerStore, StoreError, DEFAULT_RETRY_AFTER};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const READ_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LIVE_TAKE: usize = 20;
pub const MAX_LIVE_TAKE: usize = 100;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("upstream rate limited; retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("query exceeded its {}s deadline", .0.as_secs())]
    Timeout(Duration),
    #[error("invalid player id `{0}`")]
    InvalidId(String),
    #[error("no live source configured")]
    LiveUnavailable,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(anyhow::Error),
}

impl From<SourceError> for QueryError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Fetch(err) => QueryError::Fetch(err),
            SourceError::Anyhow(err) => QueryError::Source(err),
        }
    }
}

/// Last successful value plus its capture time, served only while younger than the TTL.
///
/// Whole-value replacement; one instance is owned per process and shared by reference.
#[derive(Debug)]
pub struct ReadPathCache<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> ReadPathCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn put(&self, value: T) {
        *self.slot.write().await = Some((Instant::now(), value));
    }

    /// Cached value and its age, or `None` if empty or expired.
    pub async fn get(&self) -> Option<(T, Duration)> {
        let slot = self.slot.read().await;
        let (captured_at, value) = slot.as_ref()?;
        let age = captured_at.elapsed();
        (age <= self.ttl).then(|| (value.clone(), age))
    }
}

impl<T: Clone> Default for ReadPathCache<T> {
    fn default() -> Self {
        Self::new(READ_CACHE_TTL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Miss,
    Hit { age: Duration },
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            CacheStatus::Miss => "MISS",
            CacheStatus::Hit { .. } => "HIT",
        }
    }

    pub fn age(&self) -> Option<Duration> {
        match self {
            CacheStatus::Miss => None,
            CacheStatus::Hit { age } => Some(*age),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LivePlayers {
    pub players: Vec<PlayerRecord>,
    pub cache: CacheStatus,
}

/// How a single-record lookup key was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKey {
    LeaguepediaId(i64),
    Id(Uuid),
}

impl PlayerKey {
    /// All digits is an external id, anything else must be a UUID.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse()
                .map(PlayerKey::LeaguepediaId)
                .map_err(|_| QueryError::InvalidId(raw.to_string()));
        }
        Uuid::parse_str(trimmed)
            .map(PlayerKey::Id)
            .map_err(|_| QueryError::InvalidId(raw.to_string()))
    }
}

pub struct QueryService {
    store: Arc<dyn PlayerStore>,
    live: Option<Arc<dyn PlayerSource>>,
    cache: ReadPathCache<Vec<PlayerRecord>>,
    deadline: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn PlayerStore>, deadline: Duration) -> Self {
        Self {
            store,
            live: None,
            cache: ReadPathCache::default(),
            deadline,
        }
    }

    pub fn with_live_source(mut self, source: Arc<dyn PlayerSource>) -> Self {
        self.live = Some(source);
        self
    }

    pub fn with_cache(mut self, cache: ReadPathCache<Vec<PlayerRecord>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<dyn PlayerStore> {
        &self.store
    }

    async fn with_deadline<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, QueryError>
    where
        QueryError: From<E>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(QueryError::from),
            Err(_) => Err(QueryError::Timeout(self.deadline)),
        }
    }

    /// One page of store results; pass the previous page's `next_cursor` to continue.
    pub async fn search(&self, search: &PlayerSearch) -> Result<PlayerPage, QueryError> {
        let search = search.normalized();
        self.with_deadline(self.store.search(&search)).await
    }

    pub async fn lookup(&self, raw_id: &str) -> Result<Option<StoredPlayer>, QueryError> {
        match PlayerKey::parse(raw_id)? {
            PlayerKey::LeaguepediaId(id) => {
                self.with_deadline(self.store.find_by_leaguepedia_id(id)).await
            }
            PlayerKey::Id(id) => self.with_deadline(self.store.find_by_id(id)).await,
        }
    }

    /// Fetches up to `take` players live from upstream. A rate-limited fetch
    /// falls back to the last cached listing while it is within the TTL.
    pub async fn live_players(&self, take: Option<usize>) -> Result<LivePlayers, QueryError> {
        let source = self.live.as_ref().ok_or(QueryError::LiveUnavailable)?;
        let take = take.unwrap_or(DEFAULT_LIVE_TAKE).clamp(1, MAX_LIVE_TAKE);
        let limit = NonZeroU32::new(take as u32).unwrap_or(NonZeroU32::MIN);

        let fetched = self.with_deadline(source.fetch_page(limit, 0)).await;
        match fetched {
            Ok(rows) => {
                let players = rows
                    .iter()
                    .filter_map(|row| match normalize_row(row) {
                        Ok(record) => Some(record),
                        Err(err) => {
                            debug!(error = %err, "dropping live row");
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                self.cache.put(players.clone()).await;
                Ok(LivePlayers {
                    players,
                    cache: CacheStatus::Miss,
                })
            }
            Err(QueryError::Fetch(err)) if err.is_rate_limited() => {
                let retry_after = err.retry_after().unwrap_or(DEFAULT_RETRY_AFTER);
                match self.cache.get().await {
                    Some((players, age)) => {
                        warn!(age_secs = age.as_secs(), "serving cached players after rate limit");
                        Ok(LivePlayers {
                            players,
                            cache: CacheStatus::Hit { age },
                        })
                    }
                    None => Err(QueryError::RateLimited { retry_after }),
                }
            }
            Err(err) => Err(err),
        }
    }
}
