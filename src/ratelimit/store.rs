//! Counter stores for fixed-window rate limiting.
//!
//! The `PostgreSQL` store synchronizes limits across service instances with a
//! single-statement upsert, so two concurrent requests for the same key can
//! never observe a stale count. The in-memory store serializes increments
//! behind one mutex and is only correct for single-instance deployments.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

use super::{RouteClass, WindowCounter};

/// Shared counter store keyed by `(identifier, route class)`.
///
/// `increment` performs the whole read-modify-write in one round trip: it
/// advances the window when `now >= reset_at`, adds one attempt, and returns
/// the post-increment state. The attempt is recorded even when the caller is
/// ultimately denied.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn increment(
        &self,
        identifier: &str,
        class: RouteClass,
        window: Duration,
    ) -> Result<WindowCounter>;
}

/// `PostgreSQL`-backed counter store.
#[derive(Clone, Debug)]
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn increment(
        &self,
        identifier: &str,
        class: RouteClass,
        window: Duration,
    ) -> Result<WindowCounter> {
        // One atomic upsert: the row lock taken by INSERT .. ON CONFLICT
        // serializes concurrent increments for the same key.
        let query = r"
            INSERT INTO rate_limit_counters (identifier, route_class, count, window_start, reset_at)
            VALUES ($1, $2, 1, NOW(), NOW() + ($3 * INTERVAL '1 millisecond'))
            ON CONFLICT (identifier, route_class) DO UPDATE
            SET count = CASE
                    WHEN NOW() >= rate_limit_counters.reset_at THEN 1
                    ELSE rate_limit_counters.count + 1
                END,
                window_start = CASE
                    WHEN NOW() >= rate_limit_counters.reset_at THEN NOW()
                    ELSE rate_limit_counters.window_start
                END,
                reset_at = CASE
                    WHEN NOW() >= rate_limit_counters.reset_at THEN NOW() + ($3 * INTERVAL '1 millisecond')
                    ELSE rate_limit_counters.reset_at
                END
            RETURNING count, reset_at
        ";
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .bind(class.as_str())
            .bind(window_ms)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to increment rate limit counter")?;

        Ok(WindowCounter {
            count: row.get("count"),
            reset_at: row.get("reset_at"),
        })
    }
}

/// In-memory counter store for single-instance deployments and tests.
///
/// All increments go through one mutex, so per-key atomicity holds within
/// the process; counters are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<(String, RouteClass), WindowCounter>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment(
        &self,
        identifier: &str,
        class: RouteClass,
        window: Duration,
    ) -> Result<WindowCounter> {
        let now = Utc::now();
        let window = ChronoDuration::from_std(window).context("window too large")?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry((identifier.to_string(), class))
            .and_modify(|counter| {
                if now >= counter.reset_at {
                    counter.count = 0;
                    counter.reset_at = now + window;
                }
                counter.count += 1;
            })
            .or_insert(WindowCounter {
                count: 1,
                reset_at: now + window,
            });
        Ok(*entry)
    }
}
