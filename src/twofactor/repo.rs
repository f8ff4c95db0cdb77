//! Persistence for 2FA state and backup codes.
//!
//! All state is keyed by `(principal_id, kind)`: a user factor and an admin
//! factor for the same account live in separate rows and never interact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::{PrincipalKind, TwoFactorStatus};

/// 2FA state for one `(principal, kind)` pair.
#[derive(Clone, Debug)]
pub struct TwoFactorRecord {
    pub status: TwoFactorStatus,
    /// AEAD-sealed TOTP secret; `None` once disabled.
    pub secret_ciphertext: Option<Vec<u8>>,
    /// Bumped on every `generate_secret`, so a verify against an old secret
    /// can never unlock the current one.
    pub generation: i64,
    /// Whether a code for the current generation has been verified.
    pub verified: bool,
    pub backup_batch_id: Option<Uuid>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl TwoFactorRecord {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            status: TwoFactorStatus::Disabled,
            secret_ciphertext: None,
            generation: 0,
            verified: false,
            backup_batch_id: None,
            last_verified_at: None,
        }
    }
}

/// Store for 2FA state and backup code hashes.
#[async_trait]
pub trait TwoFactorStore: Send + Sync {
    /// Load the record, `None` when the pair has never enrolled.
    async fn load(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
    ) -> Result<Option<TwoFactorRecord>>;

    /// Upsert the record for a pair.
    async fn upsert(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        record: &TwoFactorRecord,
    ) -> Result<()>;

    /// Set the verified flag, but only while the record is still at
    /// `generation` and not disabled. A stale caller whose secret was
    /// replaced or wiped mid-flight must not touch the current record.
    async fn mark_verified(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        generation: i64,
    ) -> Result<()>;

    /// Replace all backup codes for a pair with a new batch of hashes.
    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()>;

    /// List hashes of the unused codes in the active batch.
    async fn list_unused_backup_hashes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
    ) -> Result<Vec<String>>;

    /// Mark one backup code used. Returns `false` when the code was already
    /// consumed by a concurrent request; exactly one caller wins.
    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hash: &str,
    ) -> Result<bool>;

    /// Delete all backup codes for a pair.
    async fn delete_backup_codes(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<()>;
}

/// `PostgreSQL`-backed 2FA store.
#[derive(Clone, Debug)]
pub struct PgTwoFactorStore {
    pool: PgPool,
}

impl PgTwoFactorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TwoFactorStore for PgTwoFactorStore {
    async fn load(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
    ) -> Result<Option<TwoFactorRecord>> {
        let query = r"
            SELECT status, secret_ciphertext, generation, verified,
                   backup_batch_id, last_verified_at
            FROM two_factor_state
            WHERE principal_id = $1
              AND principal_kind = $2
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load 2FA state")?;
        Ok(row.map(|row| {
            let status_text: String = row.get("status");
            TwoFactorRecord {
                status: TwoFactorStatus::from_str(&status_text)
                    .unwrap_or(TwoFactorStatus::Disabled),
                secret_ciphertext: row.get("secret_ciphertext"),
                generation: row.get("generation"),
                verified: row.get("verified"),
                backup_batch_id: row.get("backup_batch_id"),
                last_verified_at: row.get("last_verified_at"),
            }
        }))
    }

    async fn upsert(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        record: &TwoFactorRecord,
    ) -> Result<()> {
        let query = r"
            INSERT INTO two_factor_state
                (principal_id, principal_kind, status, secret_ciphertext,
                 generation, verified, backup_batch_id, last_verified_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (principal_id, principal_kind) DO UPDATE
            SET status = $3,
                secret_ciphertext = $4,
                generation = $5,
                verified = $6,
                backup_batch_id = $7,
                last_verified_at = $8,
                updated_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(record.status.as_str())
            .bind(record.secret_ciphertext.as_deref())
            .bind(record.generation)
            .bind(record.verified)
            .bind(record.backup_batch_id)
            .bind(record.last_verified_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert 2FA state")?;
        Ok(())
    }

    async fn mark_verified(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        generation: i64,
    ) -> Result<()> {
        let query = r"
            UPDATE two_factor_state
            SET verified = TRUE,
                last_verified_at = NOW(),
                updated_at = NOW()
            WHERE principal_id = $1
              AND principal_kind = $2
              AND generation = $3
              AND status <> 'disabled'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(generation)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark 2FA state verified")?;
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin backup code transaction")?;
        sqlx::query(
            "DELETE FROM two_factor_backup_codes WHERE principal_id = $1 AND principal_kind = $2",
        )
        .bind(principal_id)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await
        .context("failed to clear old backup codes")?;

        let insert = r"
            INSERT INTO two_factor_backup_codes (principal_id, principal_kind, batch_id, code_hash)
            VALUES ($1, $2, $3, $4)
        ";
        for hash in code_hashes {
            sqlx::query(insert)
                .bind(principal_id)
                .bind(kind.as_str())
                .bind(batch_id)
                .bind(hash)
                .execute(&mut *tx)
                .await
                .context("failed to insert backup code")?;
        }
        tx.commit()
            .await
            .context("failed to commit backup code batch")?;
        Ok(())
    }

    async fn list_unused_backup_hashes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
    ) -> Result<Vec<String>> {
        let query = r"
            SELECT code_hash
            FROM two_factor_backup_codes
            WHERE principal_id = $1
              AND principal_kind = $2
              AND batch_id = $3
              AND used_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(batch_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list backup codes")?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("code_hash"))
            .collect())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hash: &str,
    ) -> Result<bool> {
        // The `used_at IS NULL` guard makes consumption single-winner under
        // concurrency.
        let query = r"
            UPDATE two_factor_backup_codes
            SET used_at = NOW()
            WHERE principal_id = $1
              AND principal_kind = $2
              AND batch_id = $3
              AND code_hash = $4
              AND used_at IS NULL
            RETURNING principal_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(batch_id)
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume backup code")?;
        Ok(row.is_some())
    }

    async fn delete_backup_codes(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<()> {
        let query =
            "DELETE FROM two_factor_backup_codes WHERE principal_id = $1 AND principal_kind = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete backup codes")?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct MemoryBackupCode {
    batch_id: Uuid,
    code_hash: String,
    used: bool,
}

/// In-memory 2FA store for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryTwoFactorStore {
    records: Mutex<HashMap<(Uuid, PrincipalKind), TwoFactorRecord>>,
    backup_codes: Mutex<HashMap<(Uuid, PrincipalKind), Vec<MemoryBackupCode>>>,
}

impl MemoryTwoFactorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwoFactorStore for MemoryTwoFactorStore {
    async fn load(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
    ) -> Result<Option<TwoFactorRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&(principal_id, kind)).cloned())
    }

    async fn upsert(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        record: &TwoFactorRecord,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert((principal_id, kind), record.clone());
        Ok(())
    }

    async fn mark_verified(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        generation: i64,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&(principal_id, kind)) {
            if record.generation == generation && record.status != TwoFactorStatus::Disabled {
                record.verified = true;
                record.last_verified_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()> {
        let mut codes = self.backup_codes.lock().await;
        let entries = code_hashes
            .iter()
            .map(|hash| MemoryBackupCode {
                batch_id,
                code_hash: hash.clone(),
                used: false,
            })
            .collect();
        codes.insert((principal_id, kind), entries);
        Ok(())
    }

    async fn list_unused_backup_hashes(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
    ) -> Result<Vec<String>> {
        let codes = self.backup_codes.lock().await;
        Ok(codes
            .get(&(principal_id, kind))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.batch_id == batch_id && !entry.used)
                    .map(|entry| entry.code_hash.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        batch_id: Uuid,
        code_hash: &str,
    ) -> Result<bool> {
        let mut codes = self.backup_codes.lock().await;
        let Some(entries) = codes.get_mut(&(principal_id, kind)) else {
            return Ok(false);
        };
        for entry in entries.iter_mut() {
            if entry.batch_id == batch_id && entry.code_hash == code_hash && !entry.used {
                entry.used = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_backup_codes(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<()> {
        let mut codes = self.backup_codes.lock().await;
        codes.remove(&(principal_id, kind));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_pair_is_none() {
        let store = MemoryTwoFactorStore::new();
        let record = store
            .load(Uuid::new_v4(), PrincipalKind::User)
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let store = MemoryTwoFactorStore::new();
        let principal_id = Uuid::new_v4();
        let mut record = TwoFactorRecord::disabled();
        record.status = TwoFactorStatus::Enabled;
        store
            .upsert(principal_id, PrincipalKind::User, &record)
            .await
            .unwrap();

        let admin = store
            .load(principal_id, PrincipalKind::Admin)
            .await
            .unwrap();
        assert!(admin.is_none());
        let user = store
            .load(principal_id, PrincipalKind::User)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.status, TwoFactorStatus::Enabled);
    }

    #[tokio::test]
    async fn mark_verified_ignores_stale_generations() {
        let store = MemoryTwoFactorStore::new();
        let principal_id = Uuid::new_v4();
        let record = TwoFactorRecord {
            status: TwoFactorStatus::Pending,
            secret_ciphertext: Some(vec![1, 2, 3]),
            generation: 2,
            verified: false,
            backup_batch_id: Some(Uuid::new_v4()),
            last_verified_at: None,
        };
        store
            .upsert(principal_id, PrincipalKind::User, &record)
            .await
            .unwrap();

        // A verifier that loaded generation 1 lost the race; its write is a
        // no-op against the replaced record.
        store
            .mark_verified(principal_id, PrincipalKind::User, 1)
            .await
            .unwrap();
        let loaded = store
            .load(principal_id, PrincipalKind::User)
            .await
            .unwrap()
            .unwrap();
        assert!(!loaded.verified);
        assert_eq!(loaded.secret_ciphertext.as_deref(), Some(&[1, 2, 3][..]));

        store
            .mark_verified(principal_id, PrincipalKind::User, 2)
            .await
            .unwrap();
        let loaded = store
            .load(principal_id, PrincipalKind::User)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.verified);
        assert!(loaded.last_verified_at.is_some());
    }

    #[tokio::test]
    async fn mark_verified_skips_disabled_records() {
        let store = MemoryTwoFactorStore::new();
        let principal_id = Uuid::new_v4();
        store
            .upsert(principal_id, PrincipalKind::User, &TwoFactorRecord::disabled())
            .await
            .unwrap();

        store
            .mark_verified(principal_id, PrincipalKind::User, 0)
            .await
            .unwrap();
        let loaded = store
            .load(principal_id, PrincipalKind::User)
            .await
            .unwrap()
            .unwrap();
        assert!(!loaded.verified);
    }

    #[tokio::test]
    async fn backup_code_is_consumed_exactly_once() {
        let store = MemoryTwoFactorStore::new();
        let principal_id = Uuid::new_v4();
        let batch_id = Uuid::new_v4();
        let hashes = vec!["hash-a".to_string(), "hash-b".to_string()];
        store
            .replace_backup_codes(principal_id, PrincipalKind::User, batch_id, &hashes)
            .await
            .unwrap();

        assert!(store
            .consume_backup_code(principal_id, PrincipalKind::User, batch_id, "hash-a")
            .await
            .unwrap());
        assert!(!store
            .consume_backup_code(principal_id, PrincipalKind::User, batch_id, "hash-a")
            .await
            .unwrap());

        let unused = store
            .list_unused_backup_hashes(principal_id, PrincipalKind::User, batch_id)
            .await
            .unwrap();
        assert_eq!(unused, vec!["hash-b".to_string()]);
    }

    #[tokio::test]
    async fn replacing_a_batch_invalidates_the_old_one() {
        let store = MemoryTwoFactorStore::new();
        let principal_id = Uuid::new_v4();
        let old_batch = Uuid::new_v4();
        store
            .replace_backup_codes(
                principal_id,
                PrincipalKind::User,
                old_batch,
                &["old-hash".to_string()],
            )
            .await
            .unwrap();

        let new_batch = Uuid::new_v4();
        store
            .replace_backup_codes(
                principal_id,
                PrincipalKind::User,
                new_batch,
                &["new-hash".to_string()],
            )
            .await
            .unwrap();

        assert!(!store
            .consume_backup_code(principal_id, PrincipalKind::User, old_batch, "old-hash")
            .await
            .unwrap());
        assert!(store
            .consume_backup_code(principal_id, PrincipalKind::User, new_batch, "new-hash")
            .await
            .unwrap());
    }
}
