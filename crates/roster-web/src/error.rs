use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use roster_storage::{FetchError, DEFAULT_RETRY_AFTER};
use roster_sync::{QueryError, SyncError};
use serde_json::json;

/// Handler error rendered as a JSON `{ "error", "code" }` body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("{0}")]
    NotFound(String),
}

pub type AppResult<T> = Result<T, AppError>;

fn rate_limited(retry_after: std::time::Duration) -> (StatusCode, &'static str, String, Option<u64>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "Upstream rate limit exceeded. Please retry later.".to_string(),
        Some(retry_after.as_secs().max(1)),
    )
}

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, &'static str, String, Option<u64>) {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
        None,
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retry_after) = match &self {
            AppError::Query(QueryError::RateLimited { retry_after }) => rate_limited(*retry_after),
            AppError::Query(QueryError::Fetch(err @ FetchError::RateLimited { .. }))
            | AppError::Sync(SyncError::Fetch(err @ FetchError::RateLimited { .. })) => {
                rate_limited(err.retry_after().unwrap_or(DEFAULT_RETRY_AFTER))
            }
            AppError::Query(QueryError::Timeout(_)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                self.to_string(),
                None,
            ),
            AppError::Query(QueryError::InvalidId(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_ID", self.to_string(), None)
            }
            AppError::Query(QueryError::LiveUnavailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "LIVE_UNAVAILABLE",
                self.to_string(),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            other => internal(other),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
