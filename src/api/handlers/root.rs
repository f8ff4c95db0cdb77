use axum::response::IntoResponse;

use crate::APP_USER_AGENT;

/// Identify the service at the root path. Exempt from rate limiting.
pub async fn root() -> impl IntoResponse {
    APP_USER_AGENT
}
