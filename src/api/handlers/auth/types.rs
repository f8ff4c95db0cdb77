//! Request and response bodies for the auth gate endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::twofactor::PrincipalKind;

/// Active-session summary returned by `GET /v1/auth/session`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub principal_id: String,
    pub email: String,
    pub kind: PrincipalKind,
    pub two_factor_status: String,
}

/// One-time 2FA setup bundle. Backup codes are never retrievable again.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetupResponse {
    pub success: bool,
    /// Base32 secret for manual entry into an authenticator app.
    pub secret: String,
    pub otpauth_url: String,
    /// PNG data URL for the enrollment QR code.
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorVerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_backup_code: Option<bool>,
}

/// Shared shape for enable/disable acknowledgements.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatusResponse {
    pub success: bool,
    pub status: String,
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn session_response_uses_camel_case() {
        let response = SessionResponse {
            principal_id: "id".to_string(),
            email: "viewer@example.com".to_string(),
            kind: PrincipalKind::User,
            two_factor_status: "enabled".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["principalId"], "id");
        assert_eq!(json["kind"], "user");
        assert_eq!(json["twoFactorStatus"], "enabled");
    }

    #[test]
    fn verify_response_omits_absent_fields() {
        let response = TwoFactorVerifyResponse {
            success: true,
            message: None,
            is_backup_code: Some(false),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["isBackupCode"], false);
    }

    #[test]
    fn setup_response_uses_camel_case() {
        let response = TwoFactorSetupResponse {
            success: true,
            secret: "SECRET".to_string(),
            otpauth_url: "otpauth://totp/x".to_string(),
            qr_code_url: "data:image/png;base64,AAAA".to_string(),
            backup_codes: vec!["AAAA-BBBB-CCCC-DDDD".to_string()],
            message: "ok".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["qrCodeUrl"], "data:image/png;base64,AAAA");
        assert!(json["backupCodes"].is_array());
        assert_eq!(json["otpauthUrl"], "otpauth://totp/x");
    }
}
