//! At-rest encryption for TOTP secrets.
//!
//! Secrets are sealed with `ChaCha20Poly1305` and stored as
//! `nonce (12 bytes) || ciphertext`. The AAD binds the ciphertext to the
//! owning principal, principal kind, and secret generation, so a row copied
//! between accounts (or an old generation replayed) fails to decrypt.

use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use super::PrincipalKind;

/// Encrypts a TOTP secret under the service key.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt_secret(
    key: &[u8; 32],
    secret: &[u8],
    principal_id: Uuid,
    kind: PrincipalKind,
    generation: i64,
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(principal_id, kind, generation);
    let payload = Payload {
        msg: secret,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a stored TOTP secret.
/// Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if decryption fails or if the ciphertext is too short.
pub fn decrypt_secret(
    key: &[u8; 32],
    data: &[u8],
    principal_id: Uuid,
    kind: PrincipalKind,
    generation: i64,
) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(principal_id, kind, generation);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Decryption failure: {e}"))?;

    Ok(plaintext)
}

fn construct_aad(principal_id: Uuid, kind: PrincipalKind, generation: i64) -> Vec<u8> {
    // AAD = "2fa-secret:v1|kind|principal_id|generation"
    format!("2fa-secret:v1|{}|{principal_id}|{generation}", kind.as_str()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; 32];
        let secret = b"my-totp-secret-123";
        let principal_id = Uuid::new_v4();

        let encrypted =
            encrypt_secret(&key, secret, principal_id, PrincipalKind::User, 1).unwrap();
        assert_ne!(encrypted.as_slice(), secret.as_slice());
        assert!(encrypted.len() > secret.len());

        let decrypted =
            decrypt_secret(&key, &encrypted, principal_id, PrincipalKind::User, 1).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_wrong_principal() {
        let key = [42u8; 32];
        let encrypted =
            encrypt_secret(&key, b"secret", Uuid::new_v4(), PrincipalKind::User, 1).unwrap();

        let result = decrypt_secret(&key, &encrypted, Uuid::new_v4(), PrincipalKind::User, 1);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_wrong_kind_or_generation() {
        let key = [42u8; 32];
        let principal_id = Uuid::new_v4();
        let encrypted =
            encrypt_secret(&key, b"secret", principal_id, PrincipalKind::User, 1).unwrap();

        // Admin factor must not be able to open a user secret.
        assert!(
            decrypt_secret(&key, &encrypted, principal_id, PrincipalKind::Admin, 1).is_err()
        );
        // A stale generation must not decrypt either.
        assert!(
            decrypt_secret(&key, &encrypted, principal_id, PrincipalKind::User, 2).is_err()
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_tampered_ciphertext() {
        let key = [42u8; 32];
        let principal_id = Uuid::new_v4();
        let mut encrypted =
            encrypt_secret(&key, b"secret", principal_id, PrincipalKind::User, 1).unwrap();

        let len = encrypted.len();
        if let Some(byte) = encrypted.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        let result = decrypt_secret(&key, &encrypted, principal_id, PrincipalKind::User, 1);
        assert!(result.is_err());
    }
}
