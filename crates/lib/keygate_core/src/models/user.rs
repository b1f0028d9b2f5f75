//! User account and session-record models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Second factor configured on an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethod {
    #[default]
    None,
    /// Authenticator app (TOTP).
    Otp,
    /// TOTP code delivered by text message.
    Sms,
}

impl MfaMethod {
    /// Database text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::None => "none",
            MfaMethod::Otp => "otp",
            MfaMethod::Sms => "sms",
        }
    }
}

impl FromStr for MfaMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MfaMethod::None),
            "otp" => Ok(MfaMethod::Otp),
            "sms" => Ok(MfaMethod::Sms),
            other => Err(format!("unknown mfa method: {other}")),
        }
    }
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One issued session token, tracked so it can be refreshed and revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenRecord {
    pub jti: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl AuthTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Domain user with credentials, MFA configuration and session records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub mfa_method: MfaMethod,
    /// Base32 TOTP secret.
    pub mfa_secret: Option<String>,
    pub mfa_phone_number: Option<String>,
    /// Unused single-use backup codes.
    pub mfa_backup_codes: Vec<String>,
    /// jti of the current MFA-pending token.
    pub temp_token_id: Option<String>,
    /// jti of the current single-use access token.
    pub access_token_id: Option<String>,
    pub access_confirmed_at: Option<DateTime<Utc>>,
    pub login_attempts: i32,
    pub last_login_attempt_at: Option<DateTime<Utc>>,
    pub auth_tokens: Vec<AuthTokenRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh account with no second factor and no sessions.
    pub fn new(id: String, email: String, name: Option<String>, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            name,
            password_hash,
            mfa_method: MfaMethod::None,
            mfa_secret: None,
            mfa_phone_number: None,
            mfa_backup_codes: Vec::new(),
            temp_token_id: None,
            access_token_id: None,
            access_confirmed_at: None,
            login_attempts: 0,
            last_login_attempt_at: None,
            auth_tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mfa_enabled(&self) -> bool {
        self.mfa_method != MfaMethod::None
    }

    pub fn find_auth_token(&self, jti: &str) -> Option<&AuthTokenRecord> {
        self.auth_tokens.iter().find(|t| t.jti == jti)
    }

    /// Append a session record, dropping any existing one with the same jti.
    pub fn push_auth_token(&mut self, record: AuthTokenRecord) {
        self.auth_tokens.retain(|t| t.jti != record.jti);
        self.auth_tokens.push(record);
    }

    pub fn remove_auth_token(&mut self, jti: &str) {
        self.auth_tokens.retain(|t| t.jti != jti);
    }

    /// Drop expired session records, returning how many were removed.
    pub fn remove_expired_tokens(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.auth_tokens.len();
        self.auth_tokens.retain(|t| !t.is_expired(now));
        before - self.auth_tokens.len()
    }
}
