//! Two-factor authentication lifecycle.
//!
//! Flow Overview:
//! 1) `generate_secret` mints a TOTP secret plus ten single-use backup codes
//!    and parks the principal in `pending`.
//! 2) `verify_code` checks a time-based code (±1 step) or an unused backup
//!    code; the first success marks the current secret generation verified.
//! 3) `enable` flips `pending → enabled`, but only after a successful verify
//!    for the current generation.
//! 4) `disable` returns to `disabled` from any state and wipes the secret
//!    and remaining backup codes.
//!
//! Security boundaries:
//! - TOTP secrets are AEAD-encrypted at rest, bound to the owning principal.
//! - Backup codes are Argon2id-hashed with a server-side pepper and consumed
//!   atomically; a replayed code always fails.
//! - Admin and user factors for the same account are fully separate state.

pub mod codes;
pub mod crypto;
pub mod engine;
pub mod repo;
pub mod service;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Which side of the house a factor belongs to.
///
/// Carried explicitly on every record and request so an admin factor can
/// never satisfy a user challenge for the same account, or vice versa.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Admin,
}

impl PrincipalKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Logical 2FA status for one `(principal, kind)` pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStatus {
    Disabled,
    Pending,
    Enabled,
}

impl TwoFactorStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Pending => "pending",
            Self::Enabled => "enabled",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "disabled" => Some(Self::Disabled),
            "pending" => Some(Self::Pending),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }
}
