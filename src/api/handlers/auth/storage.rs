//! Session persistence behind a store trait.
//!
//! The `PostgreSQL` store is the deployment default; the in-memory store is
//! for single-instance deployments and tests. Only token hashes are stored,
//! never raw tokens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::twofactor::PrincipalKind;

/// Principal data resolved from a valid session token.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub principal_id: Uuid,
    pub email: String,
    pub kind: PrincipalKind,
}

/// Store for opaque session tokens, keyed by token hash.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(
        &self,
        token_hash: &[u8],
        record: &SessionRecord,
        ttl_seconds: i64,
    ) -> Result<()>;

    /// Resolve a token hash; expired sessions read as `None`.
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Delete a session. Idempotent.
    async fn delete(&self, token_hash: &[u8]) -> Result<()>;
}

/// `PostgreSQL`-backed session store.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(
        &self,
        token_hash: &[u8],
        record: &SessionRecord,
        ttl_seconds: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO sessions
                (session_hash, principal_id, email, principal_kind, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(record.principal_id)
            .bind(&record.email)
            .bind(record.kind.as_str())
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT principal_id, email, principal_kind
            FROM sessions
            WHERE session_hash = $1
              AND expires_at > NOW()
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        if row.is_none() {
            return Ok(None);
        }

        // Record activity for audit without extending the session TTL.
        let query = "UPDATE sessions SET last_seen_at = NOW() WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update session last_seen_at")?;

        Ok(row.map(|row| {
            let kind: String = row.get("principal_kind");
            SessionRecord {
                principal_id: row.get("principal_id"),
                email: row.get("email"),
                // A corrupted tag must not grant admin.
                kind: PrincipalKind::from_str(&kind).unwrap_or(PrincipalKind::User),
            }
        }))
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}

struct MemorySession {
    record: SessionRecord,
    expires_at: DateTime<Utc>,
}

/// In-memory session store for single-instance deployments and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, MemorySession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(
        &self,
        token_hash: &[u8],
        record: &SessionRecord,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            token_hash.to_vec(),
            MemorySession {
                record: record.clone(),
                expires_at: Utc::now() + ChronoDuration::seconds(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(token_hash)
            .filter(|session| session.expires_at > Utc::now())
            .map(|session| session.record.clone()))
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(token_hash);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(kind: PrincipalKind) -> SessionRecord {
        SessionRecord {
            principal_id: Uuid::new_v4(),
            email: "viewer@example.com".to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn insert_lookup_delete_round_trip() {
        let store = MemorySessionStore::new();
        let record = record(PrincipalKind::User);
        store.insert(b"hash", &record, 60).await.unwrap();

        let found = store.lookup(b"hash").await.unwrap().unwrap();
        assert_eq!(found.principal_id, record.principal_id);
        assert_eq!(found.kind, PrincipalKind::User);

        store.delete(b"hash").await.unwrap();
        assert!(store.lookup(b"hash").await.unwrap().is_none());
        // Deleting again is a no-op.
        store.delete(b"hash").await.unwrap();
    }

    #[tokio::test]
    async fn expired_sessions_read_as_none() {
        let store = MemorySessionStore::new();
        store
            .insert(b"hash", &record(PrincipalKind::Admin), -1)
            .await
            .unwrap();
        assert!(store.lookup(b"hash").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_hash_reads_as_none() {
        let store = MemorySessionStore::new();
        assert!(store.lookup(b"missing").await.unwrap().is_none());
    }
}
