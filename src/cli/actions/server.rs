use crate::api;
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub totp_issuer: String,
    pub session_ttl_seconds: i64,
    pub secret_key: SecretString,
    pub backup_pepper: SecretString,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the secret key is malformed or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let secret_key = decode_secret_key(&args.secret_key)?;
    let pepper: Arc<[u8]> = args
        .backup_pepper
        .expose_secret()
        .as_bytes()
        .to_vec()
        .into();

    let auth_config = api::handlers::auth::AuthConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_totp_issuer(args.totp_issuer);

    api::new(args.port, args.dsn, auth_config, secret_key, pepper).await
}

/// Decode the base64 AEAD key used to wrap TOTP secrets at rest.
fn decode_secret_key(key: &SecretString) -> Result<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key.expose_secret().trim())
        .context("secret key is not valid base64")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("secret key must decode to exactly 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::decode_secret_key;
    use base64::Engine;
    use secrecy::SecretString;

    #[test]
    fn decode_secret_key_accepts_32_bytes() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let key = decode_secret_key(&SecretString::from(encoded));
        assert_eq!(key.ok(), Some([7u8; 32]));
    }

    #[test]
    fn decode_secret_key_rejects_short_keys() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(decode_secret_key(&SecretString::from(encoded)).is_err());
    }

    #[test]
    fn decode_secret_key_rejects_garbage() {
        assert!(decode_secret_key(&SecretString::from("not-base64!!!".to_string())).is_err());
    }
}
