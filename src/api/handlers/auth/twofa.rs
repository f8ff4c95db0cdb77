//! Two-factor lifecycle endpoints.
//!
//! All four endpoints require an authenticated session. The factor is scoped
//! to the principal's `kind`, so an admin enrolling 2FA does not touch the
//! user-side state for the same account.

use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::info;

use super::{
    error::GateError,
    principal::require_auth,
    state::AuthState,
    types::{
        TwoFactorSetupResponse, TwoFactorStatusResponse, TwoFactorVerifyRequest,
        TwoFactorVerifyResponse,
    },
};
use crate::twofactor::service::TwoFactorError;

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/setup",
    responses(
        (status = 200, description = "Enrollment started; backup codes shown once", body = TwoFactorSetupResponse),
        (status = 400, description = "Two-factor authentication is already enabled"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "2fa"
)]
pub async fn setup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, GateError> {
    let principal = require_auth(&headers, &auth_state).await?;
    let bundle = auth_state
        .two_factor()
        .generate_secret(principal.principal_id, principal.kind, &principal.email)
        .await
        .map_err(|err| match err {
            TwoFactorError::AlreadyEnabled => GateError::SetupConflict,
            TwoFactorError::Internal(err) => GateError::Internal(err),
        })?;

    Ok(Json(TwoFactorSetupResponse {
        success: true,
        secret: bundle.secret_base32,
        otpauth_url: bundle.otpauth_url,
        qr_code_url: bundle.qr_code_url,
        backup_codes: bundle.backup_codes,
        message: "Scan the QR code, then verify a code to finish setup. Store the backup codes now; they will not be shown again.".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = TwoFactorVerifyResponse),
        (status = 400, description = "Missing or empty code"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Invalid code")
    ),
    tag = "2fa"
)]
pub async fn verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    body: Option<Json<TwoFactorVerifyRequest>>,
) -> Result<impl IntoResponse, GateError> {
    let principal = require_auth(&headers, &auth_state).await?;
    let code = body
        .as_ref()
        .map(|body| body.code.trim())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| GateError::MalformedRequest("Missing code".to_string()))?;

    let outcome = auth_state
        .two_factor()
        .verify_code(principal.principal_id, principal.kind, code)
        .await?;

    if !outcome.valid {
        // One failure shape for wrong, expired, and replayed codes.
        return Err(GateError::InvalidCode);
    }

    info!(
        principal_id = %principal.principal_id,
        kind = principal.kind.as_str(),
        backup_code = outcome.backup_code,
        "two-factor code verified"
    );

    Ok(Json(TwoFactorVerifyResponse {
        success: true,
        message: None,
        is_backup_code: Some(outcome.backup_code),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enable",
    responses(
        (status = 200, description = "Two-factor authentication enabled", body = TwoFactorStatusResponse),
        (status = 400, description = "No verified pending setup, or already enabled"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "2fa"
)]
pub async fn enable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, GateError> {
    let principal = require_auth(&headers, &auth_state).await?;
    let enabled = auth_state
        .two_factor()
        .enable(principal.principal_id, principal.kind)
        .await?;

    if !enabled {
        return Err(GateError::SetupConflict);
    }

    Ok(Json(TwoFactorStatusResponse {
        success: true,
        status: "enabled".to_string(),
        message: "Two-factor authentication is now enabled".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/disable",
    responses(
        (status = 200, description = "Two-factor authentication disabled", body = TwoFactorStatusResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "2fa"
)]
pub async fn disable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, GateError> {
    let principal = require_auth(&headers, &auth_state).await?;
    auth_state
        .two_factor()
        .disable(principal.principal_id, principal.kind)
        .await?;

    Ok(Json(TwoFactorStatusResponse {
        success: true,
        status: "disabled".to_string(),
        message: "Two-factor authentication is disabled".to_string(),
    }))
}
