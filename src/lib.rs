//! # Turnstile (Streaming Platform Auth Gate)
//!
//! `turnstile` sits in front of a subscription video-streaming platform and
//! gates every API request three ways:
//!
//! - **Session resolution**: an opaque token from the `turnstile_session`
//!   cookie (or `Authorization: Bearer`) is hashed and resolved to a typed
//!   principal. The principal carries an explicit `kind` (`user` or `admin`)
//!   stored on the session row; it is never inferred from the request path.
//! - **Rate limiting**: fixed-window counters per `(identifier, route class)`
//!   with login, admin, and general-API budgets. Counters live in `PostgreSQL`
//!   so limits hold across service instances; an in-memory store is available
//!   for single-instance deployments.
//! - **Two-factor authentication**: the full TOTP lifecycle
//!   (`disabled → pending → enabled`) with single-use backup codes. Secrets
//!   are encrypted at rest; backup codes are Argon2id-hashed with a
//!   server-side pepper.
//!
//! Login, signup, and the streaming catalog itself are upstream collaborators:
//! they mint the session rows this service resolves.

pub mod api;
pub mod cli;
pub mod ratelimit;
pub mod twofactor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
