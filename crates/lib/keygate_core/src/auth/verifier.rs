//! The MFA challenge: turns an MFA-pending token plus a code into a session.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::AuthError;
use super::jwt::TokenIssuer;
use super::mfa::{self, MfaPolicy};
use super::throttle::LoginThrottle;
use crate::audit::{self, AuditEntry, AuditLog};
use crate::models::auth::{ClientInfo, TokenClaims};
use crate::settings::AuthSettings;
use crate::store::UserStore;

pub struct MfaVerifier {
    store: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
    issuer: TokenIssuer,
    throttle: LoginThrottle,
    policy: MfaPolicy,
}

impl MfaVerifier {
    pub fn new(
        store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
        issuer: TokenIssuer,
        settings: &AuthSettings,
    ) -> Self {
        Self {
            store,
            audit,
            issuer,
            throttle: settings.throttle.clone(),
            policy: settings.mfa.clone(),
        }
    }

    /// Complete the challenge for the holder of `claims` (an `mfa`-type token).
    ///
    /// The attempt is counted before anything else is checked, so every call
    /// with a valid token moves the user towards the throttle. A backup code
    /// is tried first and consumed on match; otherwise `code` must be a TOTP
    /// code inside the window for the user's method. On success the attempt
    /// counter resets and a session token is returned.
    pub async fn verify(
        &self,
        claims: &TokenClaims,
        code: &str,
        client: &ClientInfo,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let user = self
            .store
            .record_login_attempt(&claims.sub, now)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if user.temp_token_id.as_deref() != Some(claims.jti.as_str()) {
            return Err(AuthError::TokenMismatch);
        }

        if let Err(throttled) =
            self.throttle
                .check(user.login_attempts, user.last_login_attempt_at, now)
        {
            audit::record(
                self.audit.as_ref(),
                AuditEntry::new("Reached max mfa challenge attempts")
                    .security()
                    .user(&user)
                    .client(client),
            )
            .await;
            return Err(AuthError::TooManyAttempts {
                minutes: throttled.minutes(),
            });
        }

        if self.store.consume_backup_code(&user.id, code).await? {
            audit::record(
                self.audit.as_ref(),
                AuditEntry::new("Successfully authenticated (mfa using backup code)")
                    .user(&user)
                    .client(client),
            )
            .await;
        } else {
            let window = self.policy.window_for(user.mfa_method);
            let valid = user
                .mfa_secret
                .as_deref()
                .is_some_and(|secret| mfa::verify_code(secret, window, code));
            if !valid {
                audit::record(
                    self.audit.as_ref(),
                    AuditEntry::new("Failed mfa challenge")
                        .security()
                        .user(&user)
                        .client(client),
                )
                .await;
                debug!(user_id = %user.id, attempts = user.login_attempts + 1, "mfa code rejected");
                return Err(AuthError::InvalidCode);
            }
        }

        self.store.reset_login_attempts(&user.id).await?;
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new("Successfully authenticated (mfa)")
                .user(&user)
                .client(client),
        )
        .await;

        let token = self
            .issuer
            .create_auth_token(self.store.as_ref(), &user.id, client)
            .await?;
        info!(user_id = %user.id, "mfa challenge passed");
        Ok(token)
    }
}
