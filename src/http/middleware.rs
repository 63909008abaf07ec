//! Request rate limiting middleware.
//!
//! Every request is mapped to a bucket through a longest-prefix route table
//! and to a client key derived from the strongest identity signal the
//! deployment trusts.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error};

use super::{apply_headers, error_body, too_many_requests};
use crate::config::{RateLimitingConfig, RouteConfig};
use crate::error::{RateLimitError, Result};
use crate::ratelimit::{RateLimitManager, DEFAULT_BUCKET};

/// Identity of an authenticated caller, inserted by an upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Maps request paths to buckets.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Sorted by descending prefix length
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = RouteConfig>) -> Self {
        let mut routes: Vec<RouteConfig> = routes.into_iter().collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// The bucket for `path`, or `default` when no prefix matches.
    ///
    /// Prefixes match whole path segments: `/api` covers `/api/items` but
    /// not `/apiary`.
    pub fn bucket_for(&self, path: &str) -> &str {
        self.routes
            .iter()
            .find(|route| segment_prefix(path, &route.prefix))
            .map(|route| route.bucket.as_str())
            .unwrap_or(DEFAULT_BUCKET)
    }
}

fn segment_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Derives the rate limit key for a request.
///
/// Precedence: authenticated user, API token (hashed, when enabled), the
/// first trusted proxy header holding a valid IP, the peer address, then
/// `anonymous`. The default trusts neither tokens nor forwarded headers, so
/// clients can only be told apart by their connection.
#[derive(Debug, Clone, Default)]
pub struct ClientKeys {
    proxy_headers: Vec<HeaderName>,
    api_tokens: bool,
}

impl ClientKeys {
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let proxy_headers = config
            .trusted_proxy_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    RateLimitError::Validation(format!("trusted proxy header '{name}' is not a valid header name"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            proxy_headers,
            api_tokens: config.key_by_api_token,
        })
    }

    /// Also read the client address from `name`, after any headers
    /// already trusted.
    pub fn trust_proxy_header(mut self, name: HeaderName) -> Self {
        self.proxy_headers.push(name);
        self
    }

    pub fn key_by_api_token(mut self, enabled: bool) -> Self {
        self.api_tokens = enabled;
        self
    }

    pub fn key(&self, request: &Request) -> String {
        if let Some(AuthenticatedUser(user)) = request.extensions().get::<AuthenticatedUser>() {
            if !user.is_empty() {
                return format!("user:{user}");
            }
        }

        let headers = request.headers();
        if self.api_tokens {
            if let Some(token) = api_token(headers) {
                let mut hasher = Sha256::new();
                hasher.update(token);
                return format!("token:{:x}", hasher.finalize());
            }
        }

        if let Some(ip) = self.proxy_headers.iter().find_map(|name| forwarded_ip(headers, name)) {
            return format!("ip:{ip}");
        }

        if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            return format!("ip:{}", addr.ip());
        }

        "anonymous".to_string()
    }
}

/// First hop of a forwarded address header, if it is an IP.
fn forwarded_ip(headers: &HeaderMap, name: &HeaderName) -> Option<IpAddr> {
    header_str(headers, name.as_str())?
        .split(',')
        .next()
        .and_then(|hop| hop.trim().parse().ok())
}

/// State shared by every invocation of [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    manager: Arc<RateLimitManager>,
    routes: Arc<RouteTable>,
    keys: Arc<ClientKeys>,
    enabled: bool,
}

impl RateLimitState {
    pub fn new(manager: Arc<RateLimitManager>, routes: RouteTable) -> Self {
        Self {
            manager,
            routes: Arc::new(routes),
            keys: Arc::new(ClientKeys::default()),
            enabled: true,
        }
    }

    pub fn client_keys(mut self, keys: ClientKeys) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Pass all requests through without consulting the manager.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Wrap every route of `router` with [`rate_limit`].
pub fn protect(router: Router, state: RateLimitState) -> Router {
    router.layer(from_fn_with_state(state, rate_limit))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn api_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| header_str(headers, "x-api-key"))
}

/// Admit or reject a request before it reaches the handler.
pub async fn rate_limit(State(state): State<RateLimitState>, request: Request, next: Next) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let bucket = state.routes.bucket_for(request.uri().path());
    let key = state.keys.key(&request);

    match state.manager.check(&key, bucket).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            debug!(bucket, path = %request.uri().path(), "Rejecting rate limited request");
            too_many_requests(&decision)
        }
        Err(e) => {
            error!(bucket, error = %e, "Rate limit check failed");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "rate limiter unavailable",
            )
        }
    }
}
