//! TOTP primitives: secret generation, provisioning material, code checks.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// Material handed to the enrolling user: the base32 secret for manual entry,
/// the `otpauth://` URL, and a QR code rendered as a PNG data URL.
#[derive(Debug)]
pub struct ProvisioningMaterial {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_code_url: String,
}

/// Label used when rebuilding a TOTP for verification. The label is display
/// metadata in the otpauth URL and does not enter the code computation.
const VERIFY_ACCOUNT_LABEL: &str = "account";

/// Time-based code engine. One instance per service, parameterized only by
/// the issuer shown in authenticator apps.
#[derive(Clone, Debug)]
pub struct TotpEngine {
    issuer: String,
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Generates a fresh 160-bit secret.
    ///
    /// # Errors
    /// Returns an error if the generated secret cannot be decoded.
    pub fn generate_secret(&self) -> Result<Vec<u8>> {
        Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))
    }

    /// Builds the enrollment material for a secret and account label.
    ///
    /// # Errors
    /// Returns an error if TOTP or QR construction fails.
    pub fn provisioning_material(
        &self,
        secret: &[u8],
        account: &str,
    ) -> Result<ProvisioningMaterial> {
        let totp = self.build(secret, account)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;
        Ok(ProvisioningMaterial {
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            qr_code_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Checks a user-supplied code against the secret, accepting one time
    /// step of clock skew in either direction.
    ///
    /// # Errors
    /// Returns an error if TOTP construction fails.
    pub fn check_code(&self, secret: &[u8], code: &str) -> Result<bool> {
        let totp = self.build(secret, VERIFY_ACCOUNT_LABEL)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn build(&self, secret: &[u8], account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret.to_vec(),
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}
