//! HTTP surface: router wiring, middleware stack, and server startup.

use crate::{
    api::handlers::{auth, health, root},
    ratelimit::{
        middleware::{enforce, RateLimitState},
        store::PgRateLimitStore,
    },
    twofactor::{engine::TotpEngine, repo::PgTwoFactorStore, service::TwoFactorService},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the gate router: documented routes, swagger, rate limiting, and the
/// shared state extensions. Observability layers are added in [`new`].
#[must_use]
pub fn router(
    pool: PgPool,
    auth_state: Arc<auth::AuthState>,
    rate_limit: Arc<RateLimitState>,
) -> Router {
    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/v1/auth/session", get(auth::session::session))
        .route("/v1/auth/logout", post(auth::session::logout))
        .route("/v1/auth/2fa/setup", post(auth::twofa::setup))
        .route("/v1/auth/2fa/verify", post(auth::twofa::verify))
        .route("/v1/auth/2fa/enable", post(auth::twofa::enable))
        .route("/v1/auth/2fa/disable", post(auth::twofa::disable))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(auth_state))
                .layer(Extension(rate_limit))
                .layer(Extension(pool))
                .layer(axum::middleware::from_fn(enforce)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: auth::AuthConfig,
    secret_key: [u8; 32],
    backup_pepper: Arc<[u8]>,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let two_factor = TwoFactorService::new(
        TotpEngine::new(auth_config.totp_issuer().to_string()),
        Arc::new(PgTwoFactorStore::new(pool.clone())),
        secret_key,
        backup_pepper,
    );
    let sessions = Arc::new(auth::PgSessionStore::new(pool.clone()));
    let auth_state = Arc::new(auth::AuthState::new(auth_config, two_factor, sessions));
    let rate_limit = Arc::new(RateLimitState::new(Arc::new(PgRateLimitStore::new(
        pool.clone(),
    ))));

    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(pool, auth_state, rate_limit).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::frontend_origin;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() {
        let origin = frontend_origin("http://localhost:3000/app").unwrap();
        assert_eq!(origin.to_str().unwrap(), "http://localhost:3000");

        let origin = frontend_origin("https://watch.example.com").unwrap();
        assert_eq!(origin.to_str().unwrap(), "https://watch.example.com");
    }

    #[test]
    fn frontend_origin_rejects_invalid_urls() {
        assert!(frontend_origin("not a url").is_err());
    }
}
