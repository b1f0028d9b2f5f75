//! User persistence.
//!
//! `UserStore` is the only way the rest of the crate touches user records.
//! Every method that has to be race-free across concurrent requests
//! (attempt counting, backup-code use, access-token use, session appends)
//! is a single atomic operation in each implementation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::user::{AuthTokenRecord, MfaMethod, User};

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Errors from a user store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Fields for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
}

/// Complete MFA configuration written on enable and cleared on disable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MfaEnrollment {
    pub method: MfaMethod,
    pub secret: Option<String>,
    pub phone_number: Option<String>,
    pub backup_codes: Vec<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Increment `login_attempts` and stamp `last_login_attempt_at = at`.
    ///
    /// Returns the user as it was *before* the update, or `None` if the user
    /// doesn't exist.
    async fn record_login_attempt(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError>;

    async fn reset_login_attempts(&self, id: &str) -> Result<(), StoreError>;

    /// Overwrite the tracked MFA-pending jti. Returns `false` if no such user.
    async fn set_temp_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError>;

    /// Overwrite the tracked access-token jti. Returns `false` if no such user.
    async fn set_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError>;

    /// Clear the access-token jti if it equals `jti`. Returns whether it did.
    async fn consume_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError>;

    async fn confirm_access(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_password_hash(&self, id: &str, hash: &str) -> Result<(), StoreError>;

    async fn set_mfa(&self, id: &str, enrollment: &MfaEnrollment) -> Result<(), StoreError>;

    /// Remove `code` from the user's backup codes. Returns whether it was present.
    async fn consume_backup_code(&self, id: &str, code: &str) -> Result<bool, StoreError>;

    /// Append a session record, replacing any with the same jti. Returns
    /// `false` if no such user.
    async fn add_auth_token(&self, id: &str, record: AuthTokenRecord) -> Result<bool, StoreError>;

    /// Refresh a session record's ip and last-used time.
    async fn touch_auth_token(
        &self,
        id: &str,
        jti: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn remove_auth_token(&self, id: &str, jti: &str) -> Result<(), StoreError>;

    /// Remove every session record except `keep`. Returns how many were removed.
    async fn remove_auth_tokens(&self, id: &str, keep: Option<&str>) -> Result<u64, StoreError>;

    /// Remove session records expired at `now`. Returns how many were removed.
    async fn remove_expired_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
