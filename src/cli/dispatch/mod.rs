//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        totp_issuer: auth_opts.totp_issuer,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        secret_key: auth_opts.secret_key,
        backup_pepper: auth_opts.backup_pepper,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn dispatch_builds_server_action() {
        temp_env::with_vars(
            [
                ("TURNSTILE_DSN", None::<&str>),
                ("TURNSTILE_PORT", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "turnstile",
                    "--dsn",
                    "postgres://user@localhost:5432/turnstile",
                    "--secret-key",
                    "pz9yuvhsVGdMqlVyCQqdnT1HdDG1NRlV1xHdrhmiqmo=",
                    "--backup-pepper",
                    "pepper",
                    "--totp-issuer",
                    "Marquee",
                ]);
                let action = handler(&matches);
                match action {
                    Ok(Action::Server(args)) => {
                        assert_eq!(args.port, 8080);
                        assert_eq!(args.dsn, "postgres://user@localhost:5432/turnstile");
                        assert_eq!(args.totp_issuer, "Marquee");
                    }
                    Err(err) => panic!("dispatch failed: {err}"),
                }
            },
        );
    }

    #[test]
    fn dispatch_requires_dsn() {
        temp_env::with_vars([("TURNSTILE_DSN", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let result = command.try_get_matches_from(vec![
                "turnstile",
                "--secret-key",
                "pz9yuvhsVGdMqlVyCQqdnT1HdDG1NRlV1xHdrhmiqmo=",
                "--backup-pepper",
                "pepper",
            ]);
            assert_eq!(
                result.map_err(|e| e.kind()).map(|_| ()),
                Err(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }
}
