//! Authentication logic.
//!
//! Token issuance and verification, password hashing, TOTP and backup codes,
//! attempt throttling and the MFA challenge. Shared by `keygate_api` and
//! anything else that needs to mint or check tokens.

pub mod jwt;
pub mod mfa;
pub mod password;
pub mod throttle;
pub mod verifier;

use thiserror::Error;

use crate::store::StoreError;
use jwt::TokenError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User does not exist")]
    UserNotFound,

    #[error("Token is invalid (jti)")]
    TokenMismatch,

    #[error("Too many attempts. Try again in {minutes} minute(s)")]
    TooManyAttempts { minutes: i64 },

    #[error("Not a valid code")]
    InvalidCode,

    #[error("Incorrect password")]
    CredentialError,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("{0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
