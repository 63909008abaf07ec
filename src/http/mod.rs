//! HTTP surface: the rate limit middleware, the decision endpoint and the
//! admin API.

mod middleware;
mod server;
mod service;

pub use middleware::{protect, rate_limit, AuthenticatedUser, ClientKeys, RateLimitState, RouteTable};
pub use server::HttpServer;
pub use service::router;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Attach the rate limit headers for `decision`.
///
/// `X-RateLimit-Reset` is the Unix timestamp at which the limit resets.
/// `Retry-After` is only sent on denial.
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_timestamp()));
    if let Some(retry_after) = decision.retry_after_secs() {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

/// 429 response for a denied request.
pub fn too_many_requests(decision: &Decision) -> Response {
    let body = json!({
        "error": "rate_limit_exceeded",
        "message": "Too many requests",
        "limit": decision.limit,
        "remaining": decision.remaining,
        "reset": decision.reset_timestamp(),
        "retry_after": decision.retry_after_secs(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}

pub(crate) fn error_body(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "message": message.into(),
        })),
    )
        .into_response()
}
