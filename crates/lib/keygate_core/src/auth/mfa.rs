//! TOTP secrets, codes and backup codes.
//!
//! Codes are SHA-1, 6 digits, 30 second step. The accepted window depends on
//! the delivery method: SMS codes get extra past steps to allow for delivery
//! delay and none in the future.

use chrono::Utc;
use rand::Rng;
use totp_rs::{Algorithm, Secret, TOTP};

use super::AuthError;
use crate::models::user::MfaMethod;

const DIGITS: usize = 6;
const STEP_SECS: u64 = 30;

/// How many time steps either side of "now" a code may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpWindow {
    pub past: u64,
    pub future: u64,
}

/// MFA parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaPolicy {
    /// Issuer shown in authenticator apps.
    pub issuer: String,
    pub otp_window: TotpWindow,
    pub sms_window: TotpWindow,
    pub backup_code_count: usize,
}

impl Default for MfaPolicy {
    fn default() -> Self {
        Self {
            issuer: "Keygate".into(),
            otp_window: TotpWindow { past: 1, future: 1 },
            sms_window: TotpWindow { past: 2, future: 0 },
            backup_code_count: 10,
        }
    }
}

impl MfaPolicy {
    pub fn window_for(&self, method: MfaMethod) -> TotpWindow {
        match method {
            MfaMethod::Sms => self.sms_window,
            MfaMethod::Otp | MfaMethod::None => self.otp_window,
        }
    }
}

/// A new shared secret and the `otpauth://` URI to enroll it.
#[derive(Debug, Clone)]
pub struct GeneratedSecret {
    pub secret: String,
    pub uri: String,
}

/// Generate a random 160-bit base32 secret for `account`.
pub fn generate_secret(issuer: &str, account: &str) -> Result<GeneratedSecret, AuthError> {
    let secret = Secret::generate_secret().to_encoded().to_string();
    let totp = build_totp(&secret, Some(issuer.to_string()), account.to_string())?;
    Ok(GeneratedSecret {
        uri: totp.get_url(),
        secret,
    })
}

/// Current code for `secret`.
pub fn generate_code(secret: &str) -> Result<String, AuthError> {
    generate_code_at(secret, now())
}

pub fn generate_code_at(secret: &str, time: u64) -> Result<String, AuthError> {
    Ok(build_totp(secret, None, String::new())?.generate(time))
}

/// Check `code` against `secret` at the current time.
///
/// A malformed secret is treated as a non-matching code.
pub fn verify_code(secret: &str, window: TotpWindow, code: &str) -> bool {
    verify_code_at(secret, window, code, now())
}

pub fn verify_code_at(secret: &str, window: TotpWindow, code: &str, time: u64) -> bool {
    let Ok(totp) = build_totp(secret, None, String::new()) else {
        return false;
    };
    let code = code.trim();
    let past = (0..=window.past).map(|i| time.saturating_sub(i * STEP_SECS));
    let future = (1..=window.future).map(|i| time + i * STEP_SECS);
    past.chain(future).any(|t| totp.check(code, t))
}

/// Single-use backup codes formatted `ddddd-ddddd`.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            format!(
                "{:05}-{:05}",
                rng.random_range(0..100_000u32),
                rng.random_range(0..100_000u32)
            )
        })
        .collect()
}

fn build_totp(secret: &str, issuer: Option<String>, account: String) -> Result<TOTP, AuthError> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| AuthError::Validation(format!("invalid mfa secret: {e}")))?;
    Ok(TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        0,
        STEP_SECS,
        bytes,
        issuer,
        account,
    ))
}

fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
