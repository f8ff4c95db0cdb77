//! API handlers for the Turnstile auth gate.

pub mod auth;
pub mod health;
pub mod root;
