//! In-memory user store for tests and database-less local runs.
//!
//! Each user lives in one `DashMap` entry; mutating methods hold that entry's
//! write guard for the whole read-modify-write, which makes them atomic per
//! user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{MfaEnrollment, NewUser, StoreError, UserStore};
use crate::models::user::{AuthTokenRecord, User};

/// `DashMap`-backed `UserStore`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
    /// email → user id
    emails: DashMap<String, String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed user, replacing any with the same id.
    pub fn put(&self, user: User) {
        self.emails.insert(user.email.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    /// Snapshot of a user, bypassing the async trait.
    pub fn get(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        match self.users.get_mut(id) {
            Some(mut user) => {
                f(&mut user);
                user.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let id = Uuid::new_v4().to_string();
        match self.emails.entry(new.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail(new.email)),
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
                let user = User::new(id.clone(), new.email, new.name, new.password_hash);
                self.users.insert(id, user.clone());
                Ok(user)
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let id = self.emails.get(email).map(|id| id.clone());
        Ok(id.and_then(|id| self.get(&id)))
    }

    async fn record_login_attempt(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let Some(mut user) = self.users.get_mut(id) else {
            return Ok(None);
        };
        let previous = user.clone();
        user.login_attempts += 1;
        user.last_login_attempt_at = Some(at);
        user.updated_at = Utc::now();
        Ok(Some(previous))
    }

    async fn reset_login_attempts(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, |u| u.login_attempts = 0);
        Ok(())
    }

    async fn set_temp_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        Ok(self.update(id, |u| u.temp_token_id = Some(jti.to_string())))
    }

    async fn set_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        Ok(self.update(id, |u| u.access_token_id = Some(jti.to_string())))
    }

    async fn consume_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        let mut consumed = false;
        self.update(id, |u| {
            if u.access_token_id.as_deref() == Some(jti) {
                u.access_token_id = None;
                consumed = true;
            }
        });
        Ok(consumed)
    }

    async fn confirm_access(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(id, |u| u.access_confirmed_at = Some(at));
        Ok(())
    }

    async fn set_password_hash(&self, id: &str, hash: &str) -> Result<(), StoreError> {
        self.update(id, |u| u.password_hash = Some(hash.to_string()));
        Ok(())
    }

    async fn set_mfa(&self, id: &str, enrollment: &MfaEnrollment) -> Result<(), StoreError> {
        self.update(id, |u| {
            u.mfa_method = enrollment.method;
            u.mfa_secret = enrollment.secret.clone();
            u.mfa_phone_number = enrollment.phone_number.clone();
            u.mfa_backup_codes = enrollment.backup_codes.clone();
        });
        Ok(())
    }

    async fn consume_backup_code(&self, id: &str, code: &str) -> Result<bool, StoreError> {
        let mut consumed = false;
        self.update(id, |u| {
            if let Some(pos) = u.mfa_backup_codes.iter().position(|c| c == code) {
                u.mfa_backup_codes.remove(pos);
                consumed = true;
            }
        });
        Ok(consumed)
    }

    async fn add_auth_token(&self, id: &str, record: AuthTokenRecord) -> Result<bool, StoreError> {
        Ok(self.update(id, |u| u.push_auth_token(record)))
    }

    async fn touch_auth_token(
        &self,
        id: &str,
        jti: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(id, |u| {
            if let Some(token) = u.auth_tokens.iter_mut().find(|t| t.jti == jti) {
                token.ip = ip.map(str::to_string);
                token.last_used_at = at;
            }
        });
        Ok(())
    }

    async fn remove_auth_token(&self, id: &str, jti: &str) -> Result<(), StoreError> {
        self.update(id, |u| u.remove_auth_token(jti));
        Ok(())
    }

    async fn remove_auth_tokens(&self, id: &str, keep: Option<&str>) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.update(id, |u| {
            let before = u.auth_tokens.len();
            u.auth_tokens.retain(|t| Some(t.jti.as_str()) == keep);
            removed = (before - u.auth_tokens.len()) as u64;
        });
        Ok(removed)
    }

    async fn remove_expired_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.update(id, |u| removed = u.remove_expired_tokens(now) as u64);
        Ok(removed)
    }
}
