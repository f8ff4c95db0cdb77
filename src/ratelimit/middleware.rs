//! Request-path enforcement of the fixed-window budgets.
//!
//! Budget headers (`X-RateLimit-*`) are attached to allowed and denied
//! responses alike. Store failures and timeouts fail closed: the request is
//! denied with 503 rather than letting an outage disable the limiter.

use axum::{
    extract::{Extension, Request},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::error;

use super::{store::RateLimitStore, RateLimitDecision, RouteClass};
use crate::api::handlers::auth::utils::extract_client_ip;

/// Sentinel identifier for requests with no resolvable network address.
const UNKNOWN_IDENTIFIER: &str = "unknown";
/// Upper bound on one store round trip.
const STORE_TIMEOUT: Duration = Duration::from_secs(2);
/// Retry hint returned while the store is unreachable.
const UNAVAILABLE_RETRY_SECONDS: u64 = 30;

const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared limiter state handed to the middleware as an `Extension`.
pub struct RateLimitState {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }
}

/// Middleware enforcing the per-class budgets.
pub async fn enforce(
    Extension(state): Extension<Arc<RateLimitState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(class) = RouteClass::classify(request.uri().path()) else {
        // Exempt paths are never counted.
        return next.run(request).await;
    };

    let identifier = extract_client_ip(request.headers())
        .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string());
    let quota = class.quota();

    let counter = match timeout(
        STORE_TIMEOUT,
        state.store.increment(&identifier, class, quota.window),
    )
    .await
    {
        Ok(Ok(counter)) => counter,
        Ok(Err(err)) => {
            error!(
                identifier,
                route_class = class.as_str(),
                "rate limit store error: {err}"
            );
            return store_unavailable();
        }
        Err(_) => {
            error!(
                identifier,
                route_class = class.as_str(),
                "rate limit store timed out"
            );
            return store_unavailable();
        }
    };

    let decision = RateLimitDecision::from_counter(&counter, quota);
    if decision.allowed {
        let mut response = next.run(request).await;
        apply_budget_headers(response.headers_mut(), &decision);
        return response;
    }

    let retry_after = decision.retry_after_seconds(Utc::now());
    let body = Json(json!({
        "error": "Too many requests",
        "retryAfter": retry_after,
    }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    apply_budget_headers(response.headers_mut(), &decision);
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// Fail-closed response while the counter store is unreachable.
fn store_unavailable() -> Response {
    let body = Json(json!({
        "error": "Rate limit store unavailable",
        "retryAfter": UNAVAILABLE_RETRY_SECONDS,
    }));
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&UNAVAILABLE_RETRY_SECONDS.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

fn apply_budget_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(HEADER_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(HEADER_REMAINING, value);
    }
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(HEADER_RESET, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::MemoryRateLimitStore;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(RateLimitState::new(Arc::new(MemoryRateLimitStore::new())));
        Router::new()
            .route("/v1/auth/login", get(|| async { "ok" }))
            .route("/v1/catalog", get(|| async { "ok" }))
            .route("/health", get(|| async { "ok" }))
            .layer(from_fn(enforce))
            .layer(Extension(state))
    }

    fn request(path: &str, ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn login_budget_exhausts_after_five_calls() {
        let app = app();
        for expected_remaining in [4, 3, 2, 1, 0] {
            let response = app
                .clone()
                .oneshot(request("/v1/auth/login", "203.0.113.7"))
                .await
                .ok();
            let response = response.filter(|r| r.status() == StatusCode::OK);
            let remaining = response
                .as_ref()
                .and_then(|r| r.headers().get("x-ratelimit-remaining"))
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            assert_eq!(remaining.as_deref(), Some(expected_remaining.to_string().as_str()));
        }

        let response = app
            .oneshot(request("/v1/auth/login", "203.0.113.7"))
            .await
            .ok();
        let status = response.as_ref().map(axum::http::Response::status);
        assert_eq!(status, Some(StatusCode::TOO_MANY_REQUESTS));
        let retry_after = response
            .as_ref()
            .and_then(|r| r.headers().get(RETRY_AFTER))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        assert!(retry_after.is_some_and(|secs| secs > 0));
    }

    #[tokio::test]
    async fn identifiers_are_independent() {
        let app = app();
        for _ in 0..5 {
            let _ = app
                .clone()
                .oneshot(request("/v1/auth/login", "203.0.113.7"))
                .await;
        }
        let response = app
            .oneshot(request("/v1/auth/login", "198.51.100.1"))
            .await
            .ok();
        assert_eq!(
            response.map(|r| r.status()),
            Some(StatusCode::OK)
        );
    }

    #[tokio::test]
    async fn health_is_exempt() {
        let app = app();
        let response = app
            .oneshot(request("/health", "203.0.113.7"))
            .await
            .ok();
        let response = response.filter(|r| r.status() == StatusCode::OK);
        assert!(response.is_some());
        assert!(response
            .is_some_and(|r| !r.headers().contains_key("x-ratelimit-limit")));
    }

    #[tokio::test]
    async fn missing_address_uses_sentinel_identifier() {
        let app = app();
        // No forwarding headers at all: all requests share the "unknown" key.
        let bare = |path: &str| {
            axum::http::Request::builder()
                .uri(path)
                .body(Body::empty())
                .unwrap_or_default()
        };
        for _ in 0..5 {
            let _ = app.clone().oneshot(bare("/v1/auth/login")).await;
        }
        let response = app.oneshot(bare("/v1/auth/login")).await.ok();
        assert_eq!(
            response.map(|r| r.status()),
            Some(StatusCode::TOO_MANY_REQUESTS)
        );
    }
}
