//! Backup code generation and verification helpers.
//!
//! Backup codes are the one-time fallback when the authenticator app is
//! unavailable. Each code carries 80 bits of entropy (16 symbols from a
//! 32-character alphabet) and is Argon2id-hashed with a server-side pepper.

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 16;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// No 0/O/1/I: codes are read off paper.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated backup-code batch (plaintext + hashes).
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub batch_id: Uuid,
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl BackupCodeBatch {
    /// Generate a new backup-code batch using the provided pepper.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn generate(pepper: &[u8]) -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng, pepper)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, pepper: &[u8]) -> Result<Self> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_backup_code(&code, pepper)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self {
            batch_id: Uuid::new_v4(),
            codes,
            code_hashes,
        })
    }
}

/// Normalize a backup code for verification.
///
/// # Errors
/// Returns an error if the input cannot be a backup code.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid backup code characters"));
    }

    Ok(normalized)
}

/// Format a normalized backup code for display (`XXXX-XXXX-XXXX-XXXX`).
///
/// # Errors
/// Returns an error if the input is not a normalized code.
pub fn format_backup_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 3);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid backup code chunk")?);
    }
    Ok(out)
}

/// Verify a backup code against a stored hash.
///
/// Argon2id verification is constant-time with respect to the code content,
/// so a near-miss reveals nothing about which characters matched.
///
/// # Errors
/// Returns an error if the code is malformed or the stored hash is invalid.
pub fn verify_backup_code(code: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let normalized = normalize_backup_code(code)?;
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow::anyhow!("invalid backup code hash"))?;
    let argon2 = peppered_argon2(pepper)?;
    Ok(argon2
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

/// Generate a single backup code in grouped form.
fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(BACKUP_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % BACKUP_CODE_ALPHABET.len();
        if let Some(&char_byte) = BACKUP_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_backup_code(&normalized)
}

/// Hash a backup code using Argon2id with the server-side pepper.
fn hash_backup_code(code: &str, pepper: &[u8]) -> Result<String> {
    let normalized = normalize_backup_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = peppered_argon2(pepper)?;
    let hash = argon2
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash backup code"))?
        .to_string();
    Ok(hash)
}

fn peppered_argon2(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{
        format_backup_code, normalize_backup_code, verify_backup_code, BackupCodeBatch,
        BACKUP_CODE_COUNT,
    };
    use std::collections::HashSet;

    #[test]
    fn normalize_backup_code_strips_and_uppercases() {
        let normalized = normalize_backup_code("abcd-efgh-jklm-npqr").unwrap();
        assert_eq!(normalized, "ABCDEFGHJKLMNPQR");
    }

    #[test]
    fn normalize_backup_code_rejects_ambiguous_characters() {
        assert!(normalize_backup_code("ABCD-EFGH-JKLM-NPQ0").is_err());
        assert!(normalize_backup_code("short").is_err());
    }

    #[test]
    fn format_backup_code_groups() {
        let formatted = format_backup_code("ABCDEFGHJKLMNPQR").unwrap();
        assert_eq!(formatted, "ABCD-EFGH-JKLM-NPQR");
    }

    #[test]
    fn batch_has_ten_unique_codes() {
        let batch = BackupCodeBatch::generate(b"pepper").unwrap();
        assert_eq!(batch.codes.len(), BACKUP_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), BACKUP_CODE_COUNT);
        let unique: HashSet<_> = batch.codes.iter().collect();
        assert_eq!(unique.len(), BACKUP_CODE_COUNT);
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let pepper = b"pepper";
        let batch = BackupCodeBatch::generate(pepper).unwrap();
        let code = batch.codes.first().unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(verify_backup_code(code, hash, pepper).unwrap());
        assert!(!verify_backup_code("ABCD-EFGH-JKLM-9999", hash, pepper).unwrap());
    }

    #[test]
    fn wrong_pepper_fails_verification() {
        let batch = BackupCodeBatch::generate(b"pepper").unwrap();
        let code = batch.codes.first().unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(!verify_backup_code(code, hash, b"other-pepper").unwrap());
    }
}
