//! Decision endpoint and admin handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::middleware::{protect, RateLimitState};
use super::{apply_headers, error_body};
use crate::error::RateLimitError;
use crate::ratelimit::{RateLimitEntry, RateLimitManager, DEFAULT_BUCKET};

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub key: String,
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectResponse {
    bucket: String,
    key: String,
    entry: RateLimitEntry,
}

/// Error mapping for the API endpoints, where the caller names the bucket.
struct ApiError(RateLimitError);

impl From<RateLimitError> for ApiError {
    fn from(e: RateLimitError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            RateLimitError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            RateLimitError::UnknownBucket(_) => (StatusCode::NOT_FOUND, "unknown_bucket"),
            RateLimitError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Rate limit API request failed");
        }
        error_body(status, error, self.0.to_string())
    }
}

/// Build the service router.
///
/// `/v1/check` and `/health` are never rate limited. When `admin` is given,
/// the admin routes are mounted behind the rate limit middleware.
pub fn router(manager: Arc<RateLimitManager>, admin: Option<RateLimitState>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/v1/check", post(check))
        .with_state(manager.clone());

    match admin {
        Some(limits) => {
            let admin = Router::new()
                .route("/admin/ratelimit/stats", get(stats))
                .route("/admin/ratelimit/{bucket}/{key}", get(inspect).delete(reset))
                .with_state(manager);
            router.merge(protect(admin, limits))
        }
        None => router,
    }
}

async fn health(State(manager): State<Arc<RateLimitManager>>) -> impl IntoResponse {
    let buckets: Vec<&str> = manager.buckets().iter().map(|p| p.bucket()).collect();
    Json(json!({
        "status": "ok",
        "buckets": buckets,
        "failure_mode": manager.failure_mode(),
    }))
}

/// Decide one request on behalf of a sidecar or gateway.
///
/// Responds 200 when admitted and 429 when denied, with the decision as the
/// body and the usual rate limit headers.
#[instrument(skip(manager, request), fields(bucket = tracing::field::Empty))]
async fn check(
    State(manager): State<Arc<RateLimitManager>>,
    Json(request): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let bucket = request.bucket.as_deref().unwrap_or(DEFAULT_BUCKET);
    tracing::Span::current().record("bucket", bucket);

    let decision = manager.check(&request.key, bucket).await?;
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    let mut response = (status, Json(&decision)).into_response();
    apply_headers(response.headers_mut(), &decision);
    Ok(response)
}

async fn inspect(
    State(manager): State<Arc<RateLimitManager>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match manager.inspect(&key, &bucket).await? {
        Some(entry) => Ok(Json(InspectResponse { bucket, key, entry }).into_response()),
        None => Ok(error_body(StatusCode::NOT_FOUND, "not_found", "no rate limit state for key")),
    }
}

async fn reset(
    State(manager): State<Arc<RateLimitManager>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    manager.reset(&key, &bucket).await?;
    info!(bucket = %bucket, "Rate limit reset through admin API");
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(manager): State<Arc<RateLimitManager>>) -> impl IntoResponse {
    Json(manager.stats())
}
