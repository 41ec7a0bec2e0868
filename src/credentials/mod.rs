//! Kiro credential handling.
//!
//! `KiroCredentials` mirrors the token cache the Kiro IDE writes to
//! `~/.aws/sso/cache/kiro-auth-token.json`. `CredentialManager` owns the single
//! live copy and hands out `AccessToken`s, refreshing ahead of expiry.

mod manager;

pub use manager::CredentialManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroize;

/// Kiro IDE token cache contents.
///
/// Unknown keys are kept in `extra` so rewriting the file after a refresh does
/// not drop anything the IDE relies on.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroCredentials {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    /// Missing expiry is treated as already expired.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// `social` for desktop logins, `IdC` for IAM Identity Center.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Drop for KiroCredentials {
    fn drop(&mut self) {
        self.access_token.zeroize();
        self.refresh_token.zeroize();
        self.client_secret.zeroize();
    }
}

impl std::fmt::Debug for KiroCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiroCredentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("profile_arn", &self.profile_arn)
            .field("region", &self.region)
            .field("auth_method", &self.auth_method)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl KiroCredentials {
    /// True when the token expires within `margin_seconds` (or already has).
    pub fn is_expired(&self, margin_seconds: i64) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => {
                expires_at - chrono::Duration::seconds(margin_seconds) <= Utc::now()
            }
            None => true,
        }
    }

    /// Seconds until expiry; negative once expired, zero when unknown.
    pub fn expires_in_seconds(&self) -> i64 {
        self.expires_at
            .map(|at| (at - Utc::now()).num_seconds())
            .unwrap_or(0)
    }

    /// Uses the OIDC token endpoint instead of the Kiro desktop one.
    pub fn uses_oidc(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            token: self.access_token.clone(),
            profile_arn: self.profile_arn.clone(),
        }
    }
}

/// Bearer token handed to the backend client for one call.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct AccessToken {
    token: String,
    profile_arn: Option<String>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, profile_arn: Option<String>) -> Self {
        Self {
            token: token.into(),
            profile_arn,
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn profile_arn(&self) -> Option<&str> {
        self.profile_arn.as_deref()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("profile_arn", &self.profile_arn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds_expiring_in(seconds: i64) -> KiroCredentials {
        serde_json::from_value(serde_json::json!({
            "accessToken": "aoaAAAAAGtest",
            "refreshToken": "aorAAAAAGtest",
            "expiresAt": (Utc::now() + chrono::Duration::seconds(seconds)).to_rfc3339(),
            "profileArn": "arn:aws:codewhisperer:us-east-1:123:profile/ABC",
            "authMethod": "social",
            "provider": "Github"
        }))
        .unwrap()
    }

    #[test]
    fn test_expiry_margin() {
        assert!(!creds_expiring_in(3600).is_expired(300));
        assert!(creds_expiring_in(120).is_expired(300));
        assert!(creds_expiring_in(-10).is_expired(0));
    }

    #[test]
    fn test_missing_expiry_is_expired() {
        let creds: KiroCredentials =
            serde_json::from_str(r#"{"accessToken": "a", "refreshToken": "r"}"#).unwrap();
        assert!(creds.is_expired(0));
        assert_eq!(creds.expires_in_seconds(), 0);
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let creds = creds_expiring_in(3600);
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["provider"], "Github");
        assert_eq!(json["authMethod"], "social");
        assert!(json.get("clientSecret").is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = creds_expiring_in(3600);
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("aoaAAAAAGtest"));
        assert!(!debug.contains("aorAAAAAGtest"));

        let token = creds.access_token();
        assert!(!format!("{:?}", token).contains("aoaAAAAAGtest"));
        assert_eq!(token.secret(), "aoaAAAAAGtest");
    }
}
