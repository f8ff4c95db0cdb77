//! Error taxonomy for the auth gate, mapped onto HTTP at the route boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failures surfaced by the gate. Client-facing messages are deliberately
/// flat; full detail stays in the server logs.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No resolvable session. The response never reveals whether the
    /// principal exists.
    #[error("Unauthenticated")]
    Unauthenticated,
    /// Wrong, expired, or malformed 2FA code. One message for every cause so
    /// the response cannot be used as an oracle.
    #[error("Invalid two-factor code")]
    InvalidCode,
    /// Request body failed validation before any check ran.
    #[error("{0}")]
    MalformedRequest(String),
    /// Lifecycle ordering violation, e.g. enable before a successful verify.
    /// Logged loudly since the normal UI flow cannot produce it.
    #[error("Two-factor setup is not in a state that allows this operation")]
    SetupConflict,
    /// Backing store unreachable. The gate fails closed.
    #[error("Service temporarily unavailable")]
    StoreUnavailable,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidCode => StatusCode::FORBIDDEN,
            Self::MalformedRequest(_) | Self::SetupConflict => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match &self {
            Self::SetupConflict => {
                error!("two-factor lifecycle ordering violation: {self}");
            }
            Self::Internal(err) => {
                error!("internal error at gate boundary: {err:#}");
            }
            Self::StoreUnavailable => {
                error!("backing store unavailable at gate boundary");
            }
            _ => {}
        }
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::GateError;
    use axum::http::StatusCode;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(GateError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateError::InvalidCode.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GateError::MalformedRequest("missing code".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GateError::SetupConflict.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GateError::StoreUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GateError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_code_message_is_uniform() {
        // Same message regardless of why the code failed.
        assert_eq!(GateError::InvalidCode.to_string(), "Invalid two-factor code");
    }
}
