//! Logging setup: pretty console output or JSON lines for log shippers.

use anyhow::Result;
use std::env::var;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const ENV_LOG_FORMAT: &str = "TURNSTILE_LOG_FORMAT";

/// Initialize the tracing subscriber.
///
/// Output defaults to the pretty console format; setting
/// `TURNSTILE_LOG_FORMAT=json` switches to JSON lines.
///
/// # Errors
///
/// Returns an error if a filter directive fails to parse or the global
/// subscriber is already set.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?);

    let json = var(ENV_LOG_FORMAT).is_ok_and(|value| value.eq_ignore_ascii_case("json"));

    if json {
        let fmt_layer = fmt::layer().with_target(false).json();
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(false)
            .pretty();
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
