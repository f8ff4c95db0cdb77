//! Auth gate handlers: sessions, principal resolution, 2FA lifecycle.

pub mod error;
pub mod principal;
pub mod session;
pub mod state;
pub mod storage;
pub mod twofa;
pub mod types;
pub(crate) mod utils;

pub use error::GateError;
pub use principal::Principal;
pub use state::{AuthConfig, AuthState};
pub use storage::{MemorySessionStore, PgSessionStore, SessionRecord, SessionStore};
