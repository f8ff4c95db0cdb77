//! Orchestration of the 2FA lifecycle over the engine, codes, and store.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    codes::{self, BackupCodeBatch},
    crypto,
    engine::TotpEngine,
    repo::{TwoFactorRecord, TwoFactorStore},
    PrincipalKind, TwoFactorStatus,
};

/// Lifecycle errors the API layer maps onto HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum TwoFactorError {
    /// `generate_secret` while already enabled; the caller must disable
    /// first so an attacker with a stolen session cannot silently rotate
    /// the factor.
    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Everything the enrolling user needs: provisioning material plus the
/// plaintext backup codes. Shown once, never retrievable again.
#[derive(Debug)]
pub struct SetupBundle {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
}

/// Outcome of a code check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub valid: bool,
    /// Whether a backup code (rather than a time-based code) matched.
    pub backup_code: bool,
}

impl VerifyOutcome {
    const INVALID: Self = Self {
        valid: false,
        backup_code: false,
    };
}

/// 2FA service shared across request handlers.
#[derive(Clone)]
pub struct TwoFactorService {
    engine: TotpEngine,
    store: Arc<dyn TwoFactorStore>,
    secret_key: [u8; 32],
    pepper: Arc<[u8]>,
}

impl TwoFactorService {
    #[must_use]
    pub fn new(
        engine: TotpEngine,
        store: Arc<dyn TwoFactorStore>,
        secret_key: [u8; 32],
        pepper: Arc<[u8]>,
    ) -> Self {
        Self {
            engine,
            store,
            secret_key,
            pepper,
        }
    }

    /// Current status for a pair; never-enrolled pairs read as disabled.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn status(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<TwoFactorStatus> {
        let record = self.store.load(principal_id, kind).await?;
        Ok(record.map_or(TwoFactorStatus::Disabled, |record| record.status))
    }

    /// Begins enrollment: mints a secret and backup codes, moves the pair to
    /// `pending`, and returns the one-time setup bundle.
    ///
    /// Regenerating while still `pending` replaces the previous secret and
    /// backup codes wholesale.
    ///
    /// # Errors
    /// Returns [`TwoFactorError::AlreadyEnabled`] when 2FA is active, or an
    /// internal error if crypto or the store fails.
    pub async fn generate_secret(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        account: &str,
    ) -> Result<SetupBundle, TwoFactorError> {
        let previous = self.store.load(principal_id, kind).await?;
        if previous
            .as_ref()
            .is_some_and(|record| record.status == TwoFactorStatus::Enabled)
        {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let generation = previous.map_or(1, |record| record.generation + 1);
        let secret = self.engine.generate_secret()?;
        let material = self.engine.provisioning_material(&secret, account)?;
        let ciphertext =
            crypto::encrypt_secret(&self.secret_key, &secret, principal_id, kind, generation)?;

        let batch = BackupCodeBatch::generate(&self.pepper)?;
        let record = TwoFactorRecord {
            status: TwoFactorStatus::Pending,
            secret_ciphertext: Some(ciphertext),
            generation,
            verified: false,
            backup_batch_id: Some(batch.batch_id),
            last_verified_at: None,
        };
        self.store.upsert(principal_id, kind, &record).await?;
        self.store
            .replace_backup_codes(principal_id, kind, batch.batch_id, &batch.code_hashes)
            .await?;

        info!(
            %principal_id,
            kind = kind.as_str(),
            generation,
            "two-factor enrollment started"
        );

        Ok(SetupBundle {
            secret_base32: material.secret_base32,
            otpauth_url: material.otpauth_url,
            qr_code_url: material.qr_code_url,
            backup_codes: batch.codes,
        })
    }

    /// Verifies a time-based or backup code for the pair.
    ///
    /// Tries the time-based path first, then the backup codes. Any failure
    /// reads the same to the caller: `valid == false` with no reason given.
    ///
    /// # Errors
    /// Returns an error if the store or crypto fails; a wrong code is not an
    /// error.
    pub async fn verify_code(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        code: &str,
    ) -> Result<VerifyOutcome> {
        let Some(record) = self.store.load(principal_id, kind).await? else {
            return Ok(VerifyOutcome::INVALID);
        };
        if record.status == TwoFactorStatus::Disabled {
            return Ok(VerifyOutcome::INVALID);
        }

        // The generation guard in the store keeps this write from landing on
        // a record that was re-enrolled or disabled while we checked.
        if self.check_totp(&record, principal_id, kind, code)? {
            self.store
                .mark_verified(principal_id, kind, record.generation)
                .await?;
            return Ok(VerifyOutcome {
                valid: true,
                backup_code: false,
            });
        }

        if self.consume_backup(&record, principal_id, kind, code).await? {
            self.store
                .mark_verified(principal_id, kind, record.generation)
                .await?;
            return Ok(VerifyOutcome {
                valid: true,
                backup_code: true,
            });
        }

        Ok(VerifyOutcome::INVALID)
    }

    /// Flips `pending → enabled`. Requires a prior successful verify for the
    /// current secret generation; returns `false` otherwise, including for a
    /// pair that is already enabled (re-enabling needs a disable first).
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn enable(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<bool> {
        let Some(mut record) = self.store.load(principal_id, kind).await? else {
            return Ok(false);
        };
        match record.status {
            TwoFactorStatus::Pending if record.verified => {
                record.status = TwoFactorStatus::Enabled;
                self.store.upsert(principal_id, kind, &record).await?;
                info!(
                    %principal_id,
                    kind = kind.as_str(),
                    "two-factor authentication enabled"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Returns the pair to `disabled`, wiping the secret and any remaining
    /// backup codes. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn disable(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<()> {
        let generation = self
            .store
            .load(principal_id, kind)
            .await?
            .map_or(0, |record| record.generation);
        let mut record = TwoFactorRecord::disabled();
        record.generation = generation;
        self.store.upsert(principal_id, kind, &record).await?;
        self.store.delete_backup_codes(principal_id, kind).await?;
        info!(
            %principal_id,
            kind = kind.as_str(),
            "two-factor authentication disabled"
        );
        Ok(())
    }

    fn check_totp(
        &self,
        record: &TwoFactorRecord,
        principal_id: Uuid,
        kind: PrincipalKind,
        code: &str,
    ) -> Result<bool> {
        let trimmed = code.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let ciphertext = record
            .secret_ciphertext
            .as_deref()
            .ok_or_else(|| anyhow!("missing secret for non-disabled record"))?;
        let secret = crypto::decrypt_secret(
            &self.secret_key,
            ciphertext,
            principal_id,
            kind,
            record.generation,
        )
        .context("failed to unseal TOTP secret")?;
        self.engine.check_code(&secret, trimmed)
    }

    async fn consume_backup(
        &self,
        record: &TwoFactorRecord,
        principal_id: Uuid,
        kind: PrincipalKind,
        code: &str,
    ) -> Result<bool> {
        let Ok(normalized) = codes::normalize_backup_code(code) else {
            return Ok(false);
        };
        let Some(batch_id) = record.backup_batch_id else {
            return Ok(false);
        };
        let hashes = self
            .store
            .list_unused_backup_hashes(principal_id, kind, batch_id)
            .await?;
        for hash in hashes {
            if codes::verify_backup_code(&normalized, &hash, &self.pepper)? {
                // The store arbitrates the race; only one consumer wins.
                return self
                    .store
                    .consume_backup_code(principal_id, kind, batch_id, &hash)
                    .await;
            }
        }
        Ok(false)
    }

}
