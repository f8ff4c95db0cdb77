//! Typed principal resolution from the session token.

use axum::http::HeaderMap;
use tracing::error;
use uuid::Uuid;

use super::{
    error::GateError, session::extract_session_token, state::AuthState, utils::hash_session_token,
};
use crate::twofactor::PrincipalKind;

/// The authenticated caller. The `kind` tag comes from the session record
/// written at login, never from the shape of the request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub principal_id: Uuid,
    pub email: String,
    pub kind: PrincipalKind,
}

/// Resolve the request to a principal or fail with `Unauthenticated`.
///
/// Missing, invalid, and expired tokens are indistinguishable to the caller.
///
/// # Errors
/// Returns [`GateError::Unauthenticated`] when no valid session resolves, or
/// [`GateError::Internal`] when the session store fails.
pub async fn require_auth(headers: &HeaderMap, state: &AuthState) -> Result<Principal, GateError> {
    let Some(token) = extract_session_token(headers) else {
        return Err(GateError::Unauthenticated);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_session_token(&token);
    let record = state
        .sessions()
        .lookup(&token_hash)
        .await
        .map_err(|err| {
            error!("Failed to lookup session: {err:#}");
            GateError::Internal(err)
        })?
        .ok_or(GateError::Unauthenticated)?;

    Ok(Principal {
        principal_id: record.principal_id,
        email: record.email,
        kind: record.kind,
    })
}
