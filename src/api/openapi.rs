//! OpenAPI document for the gate endpoints.

use utoipa::OpenApi;

use crate::api::handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::session::session,
        handlers::auth::session::logout,
        handlers::auth::twofa::setup,
        handlers::auth::twofa::verify,
        handlers::auth::twofa::enable,
        handlers::auth::twofa::disable,
    ),
    components(schemas(
        handlers::health::Health,
        handlers::auth::types::SessionResponse,
        handlers::auth::types::TwoFactorSetupResponse,
        handlers::auth::types::TwoFactorVerifyRequest,
        handlers::auth::types::TwoFactorVerifyResponse,
        handlers::auth::types::TwoFactorStatusResponse,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Session resolution and logout"),
        (name = "2fa", description = "Two-factor authentication lifecycle")
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI specification.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
