//! JSON HTTP surface over the sync and query entry points.

mod error;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use roster_adapters::CargoPlayerSource;
use roster_core::{PlayerSearch, SyncRunResult};
use roster_sync::{build_pipeline_from_env, QueryError, QueryService, SyncConfig, SyncPipeline};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub use error::{AppError, AppResult};

pub const CRATE_NAME: &str = "roster-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub query: Arc<QueryService>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, query: Arc<QueryService>) -> Self {
        Self { pipeline, query }
    }
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    ok: bool,
    #[serde(flatten)]
    result: SyncRunResult,
}

/// Raw query-string values, coerced leniently into a [`PlayerSearch`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayersQuery {
    q: Option<String>,
    team: Option<String>,
    role: Option<String>,
    is_active: Option<String>,
    region: Option<String>,
    take: Option<String>,
    cursor: Option<String>,
}

impl TryFrom<PlayersQuery> for PlayerSearch {
    type Error = QueryError;

    fn try_from(query: PlayersQuery) -> Result<Self, Self::Error> {
        let cursor = match query.cursor.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<Uuid>()
                    .map_err(|_| QueryError::InvalidId(raw.to_string()))?,
            ),
        };
        Ok(PlayerSearch {
            q: query.q,
            team: query.team,
            role: query.role,
            is_active: query.is_active.as_deref().and_then(parse_flag),
            region: query.region,
            take: query.take.as_deref().and_then(parse_take),
            cursor,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct LiveQuery {
    take: Option<String>,
}

/// Non-numeric input is ignored; anything below one clamps to one.
fn parse_take(raw: &str) -> Option<usize> {
    let n = raw.trim().parse::<i64>().ok()?;
    Some(usize::try_from(n.max(1)).unwrap_or(usize::MAX))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/admin/sync", post(sync_handler))
        .route("/players", get(search_handler))
        .route("/players/live", get(live_handler))
        .route("/players/{id}", get(player_handler))
        .with_state(Arc::new(state))
}

/// Serves on `ROSTER_WEB_PORT`, starting the cron scheduler when enabled.
pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let port = config.web_port;
    let query_timeout = config.query_timeout();
    let live_fetcher = Arc::new(config.build_live_fetcher()?);
    let (pipeline, store) = build_pipeline_from_env(config).await?;
    let pipeline = Arc::new(pipeline);

    let query = QueryService::new(Arc::new(store), query_timeout)
        .with_live_source(Arc::new(CargoPlayerSource::players("live", live_fetcher)));

    let scheduler = pipeline.maybe_build_scheduler().await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await.context("starting scheduler")?;
        info!(cron = %pipeline.config().sync_cron, "scheduled sync enabled");
    }

    let state = AppState::new(pipeline, Arc::new(query));
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(SyncConfig::from_env()).await
}

async fn sync_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<SyncResponse>> {
    let result = state.pipeline.run_once().await?;
    Ok(Json(SyncResponse { ok: true, result }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlayersQuery>,
) -> AppResult<Response> {
    let search = PlayerSearch::try_from(query)?;
    let page = state.query.search(&search).await?;
    Ok(Json(page).into_response())
}

async fn live_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveQuery>,
) -> AppResult<Response> {
    let take = query.take.as_deref().and_then(parse_take);
    let live = state.query.live_players(take).await?;
    let mut response = (StatusCode::OK, Json(&live.players)).into_response();
    let headers = response.headers_mut();
    headers.insert("x-cache-status", HeaderValue::from_static(live.cache.as_header()));
    if let Some(age) = live.cache.age() {
        headers.insert("x-cache-age", HeaderValue::from(age.as_secs()));
    }
    Ok(response)
}

async fn player_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    match state.query.lookup(&id).await? {
        Some(player) => Ok(Json(player).into_response()),
        None => Err(AppError::NotFound(format!("player {id} not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use roster_adapters::{FixturePlayerSource, PlayerSource, RawPlayerRow, SourceError};
    use roster_storage::{BackoffPolicy, CargoFetcher, FetchError, HttpClientConfig, MemoryPlayerStore};
    use roster_sync::RegisteredSource;
    use serde_json::Value as JsonValue;
    use std::num::NonZeroU32;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn fixture_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/players/sample.json")
    }

    struct RateLimitedSource;

    #[async_trait]
    impl PlayerSource for RateLimitedSource {
        fn source_id(&self) -> &str {
            "live"
        }

        async fn fetch_page(
            &self,
            _limit: NonZeroU32,
            _offset: u32,
        ) -> Result<Vec<RawPlayerRow>, SourceError> {
            Err(FetchError::RateLimited {
                retry_after: Duration::from_secs(42),
                attempts: 6,
            }
            .into())
        }
    }

    fn test_app(live: Arc<dyn PlayerSource>) -> Router {
        let store = Arc::new(MemoryPlayerStore::new());
        let pipeline = SyncPipeline::new(
            SyncConfig::default(),
            store.clone(),
            vec![RegisteredSource {
                source: Arc::new(FixturePlayerSource::new("players", fixture_path())),
                region: Some("LCK".into()),
            }],
        );
        let query = QueryService::new(store, Duration::from_secs(5)).with_live_source(live);
        app(AppState::new(Arc::new(pipeline), Arc::new(query)))
    }

    fn fixture_app() -> Router {
        test_app(Arc::new(FixturePlayerSource::new("live", fixture_path())))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, axum::http::HeaderMap, JsonValue) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(JsonValue::Null);
        (status, headers, json)
    }

    #[tokio::test]
    async fn admin_sync_returns_counts() {
        let app = fixture_app();
        let (status, _, body) = send(&app, "POST", "/admin/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["created"], 4);
        assert_eq!(body["rejected"], 1);
        assert_eq!(body["total"], 5);

        let (_, _, again) = send(&app, "POST", "/admin/sync").await;
        assert_eq!(again["skipped"], 4);
    }

    #[tokio::test]
    async fn search_and_lookup_after_sync() {
        let app = fixture_app();
        send(&app, "POST", "/admin/sync").await;

        let (status, _, hits) = send(&app, "GET", "/players?team=t1&take=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits["items"].as_array().unwrap().len(), 2);
        assert_eq!(hits["page"]["take"], 10);
        assert_eq!(hits["page"]["hasNext"], false);

        let (_, _, by_id) = send(&app, "GET", "/players?q=57").await;
        assert_eq!(by_id["items"][0]["slug"], "Faker");

        let (_, _, retired) = send(&app, "GET", "/players?isActive=false").await;
        assert!(retired["items"].as_array().unwrap().is_empty());

        let (status, _, faker) = send(&app, "GET", "/players/57").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(faker["region"], "LCK");

        let uuid = faker["id"].as_str().unwrap().to_string();
        let (status, _, same) = send(&app, "GET", &format!("/players/{uuid}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(same["leaguepedia_id"], 57);
    }

    #[tokio::test]
    async fn malformed_search_params_fall_back_to_defaults() {
        let app = fixture_app();
        send(&app, "POST", "/admin/sync").await;

        let (status, headers, body) = send(&app, "GET", "/players?take=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(body["page"]["take"], 20);
        assert_eq!(body["items"].as_array().unwrap().len(), 4);

        let (status, _, body) = send(&app, "GET", "/players?isActive=yes&take=-3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"]["take"], 1);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let (status, _, body) = send(&app, "GET", "/players?isActive=0").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["items"].as_array().unwrap().is_empty());

        let (status, _, body) = send(&app, "GET", "/players/live?take=lots").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn search_pages_follow_next_cursor() {
        let app = fixture_app();
        send(&app, "POST", "/admin/sync").await;

        let (_, _, first) = send(&app, "GET", "/players?take=3").await;
        assert_eq!(first["items"].as_array().unwrap().len(), 3);
        assert_eq!(first["page"]["hasNext"], true);
        let cursor = first["page"]["nextCursor"].as_str().unwrap().to_string();
        assert_eq!(first["items"][2]["id"], cursor.as_str());

        let (status, _, second) = send(&app, "GET", &format!("/players?take=3&cursor={cursor}")).await;
        assert_eq!(status, StatusCode::OK);
        let rest = second["items"].as_array().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(second["page"]["hasNext"], false);
        assert!(second["page"]["nextCursor"].is_null());
        let seen = first["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| &p["id"])
            .collect::<Vec<_>>();
        assert!(!seen.contains(&&rest[0]["id"]));

        let (status, _, body) = send(&app, "GET", "/players?cursor=not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ID");
    }

    #[tokio::test]
    async fn lookup_errors_map_to_statuses() {
        let app = fixture_app();
        let (status, _, body) = send(&app, "GET", "/players/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ID");

        let (status, _, body) = send(&app, "GET", "/players/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn live_listing_is_labeled_miss() {
        let app = fixture_app();
        let (status, headers, body) = send(&app, "GET", "/players/live?take=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-cache-status"], "MISS");
        assert!(headers.get("x-cache-age").is_none());
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn live_rate_limit_without_cache_is_429() {
        let app = test_app(Arc::new(RateLimitedSource));
        let (status, headers, body) = send(&app, "GET", "/players/live").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "42");
        assert_eq!(body["code"], "RATE_LIMITED");
    }

    struct FlakyUpstream {
        first: String,
        hits: AtomicUsize,
    }

    /// Serves the fixture payload once, then answers 429 forever.
    async fn flaky_cargo(State(upstream): State<Arc<FlakyUpstream>>) -> (StatusCode, String) {
        if upstream.hits.fetch_add(1, Ordering::SeqCst) == 0 {
            (StatusCode::OK, upstream.first.clone())
        } else {
            (StatusCode::TOO_MANY_REQUESTS, String::new())
        }
    }

    #[tokio::test]
    async fn live_retries_end_before_deadline_so_cache_answers() {
        let upstream = Arc::new(FlakyUpstream {
            first: std::fs::read_to_string(fixture_path()).unwrap(),
            hits: AtomicUsize::new(0),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let upstream_app = Router::new()
            .route("/api.php", get(flaky_cargo))
            .with_state(upstream.clone());
        tokio::spawn(async move {
            axum::serve(listener, upstream_app).await.unwrap();
        });

        // Full retry schedule sums to 1.55s, well past the deadline.
        let deadline = Duration::from_millis(750);
        let client = HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(1500),
                max_jitter: Duration::ZERO,
                max_elapsed: None,
            },
            ..Default::default()
        }
        .bounded_by(deadline);
        let fetcher = Arc::new(CargoFetcher::new(format!("http://{addr}/api.php"), client).unwrap());
        let live = Arc::new(CargoPlayerSource::players("live", fetcher));

        let store = Arc::new(MemoryPlayerStore::new());
        let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone(), Vec::new());
        let query = QueryService::new(store, deadline).with_live_source(live);
        let app = app(AppState::new(Arc::new(pipeline), Arc::new(query)));

        let (status, headers, first) = send(&app, "GET", "/players/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-cache-status"], "MISS");

        let (status, headers, second) = send(&app, "GET", "/players/live").await;
        assert_eq!(status, StatusCode::OK, "body: {second}");
        assert_eq!(headers["x-cache-status"], "HIT");
        assert_eq!(second, first);
        assert!(upstream.hits.load(Ordering::SeqCst) < 7);
    }
}
