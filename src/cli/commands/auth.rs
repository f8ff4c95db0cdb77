//! Auth-gate tunables: frontend origin, TOTP issuer, session TTL, secrets.

use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_BACKUP_PEPPER: &str = "backup-pepper";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Base URL of the streaming frontend (CORS origin, cookie security)")
                .env("TURNSTILE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps for enrolled accounts")
                .env("TURNSTILE_TOTP_ISSUER")
                .default_value("Turnstile"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Lifetime of full sessions in seconds")
                .env("TURNSTILE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long(ARG_SECRET_KEY)
                .help("Base64-encoded 32-byte key used to encrypt TOTP secrets at rest")
                .env("TURNSTILE_SECRET_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_BACKUP_PEPPER)
                .long(ARG_BACKUP_PEPPER)
                .help("Server-side pepper mixed into backup-code hashes")
                .env("TURNSTILE_BACKUP_PEPPER")
                .hide_env_values(true)
                .required(true),
        )
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub totp_issuer: String,
    pub session_ttl_seconds: i64,
    pub secret_key: SecretString,
    pub backup_pepper: SecretString,
}

impl Options {
    /// Collect auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .context("missing required argument: --frontend-base-url")?;
        let totp_issuer = matches
            .get_one::<String>(ARG_TOTP_ISSUER)
            .cloned()
            .context("missing required argument: --totp-issuer")?;
        let session_ttl_seconds = matches
            .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(43200);
        let secret_key = matches
            .get_one::<String>(ARG_SECRET_KEY)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --secret-key")?;
        let backup_pepper = matches
            .get_one::<String>(ARG_BACKUP_PEPPER)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --backup-pepper")?;

        Ok(Self {
            frontend_base_url,
            totp_issuer,
            session_ttl_seconds,
            secret_key,
            backup_pepper,
        })
    }
}
