//! Request and response bodies.
//!
//! Successful responses wrap their payload as `{ "data": ... }`; errors are
//! `{ "error": { "message", "type", "status" } }`. Field names are camelCase.

use keygate_core::models::user::{MfaMethod, User};
use serde::{Deserialize, Serialize};

/// `{ "data": T }`
#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenData {
    pub token: String,
}

// ---------------------------------------------------------------------------
// MFA
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub method: MfaMethod,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretData {
    pub secret: String,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckCodeRequest {
    pub code: String,
    pub secret: String,
    pub method: MfaMethod,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableRequest {
    pub secret: Option<String>,
    pub method: MfaMethod,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupCodesData {
    pub codes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Either a session token, or an MFA-pending token with `mfaRequired`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub token: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mfa_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_method: Option<MfaMethod>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

/// Logout options, as query string or body.
#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub all: bool,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub mfa_method: MfaMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_phone_number: Option<String>,
}

impl From<&User> for UserData {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            mfa_method: user.mfa_method,
            mfa_phone_number: user.mfa_phone_number.clone(),
        }
    }
}
