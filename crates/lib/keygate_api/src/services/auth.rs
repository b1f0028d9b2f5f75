//! Password login, access confirmation, logout and password reset.

use chrono::Utc;
use keygate_core::audit::{self, AuditEntry};
use keygate_core::auth::jwt::TokenError;
use keygate_core::auth::password::{hash_password, validate_new_password, verify_password};
use keygate_core::auth::AuthError;
use keygate_core::mailer::Mail;
use keygate_core::models::auth::{ClientInfo, TokenClaims};
use keygate_core::models::user::User;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::LoginData;
use crate::services::mfa::send_sms_code;

/// `action` claim of password-reset access tokens.
pub const RESET_PASSWORD_ACTION: &str = "reset";

const INCORRECT_PASSWORD: &str = "Incorrect password";

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Authenticate with email + password.
///
/// Unknown emails and wrong passwords look the same to the caller. The
/// attempt is recorded first and the throttle applies to the counter as it
/// stood before, so concurrent attempts can't slip past it. With MFA enabled
/// the caller gets an MFA-pending token (and, for SMS, a code) and the counter
/// keeps running until the challenge is passed.
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    client: &ClientInfo,
) -> AppResult<LoginData> {
    let incorrect = || AppError::Unauthorized(INCORRECT_PASSWORD.into());
    let found = state
        .store
        .find_by_email(email)
        .await?
        .ok_or_else(incorrect)?;

    let now = Utc::now();
    let user = state
        .store
        .record_login_attempt(&found.id, now)
        .await?
        .ok_or_else(incorrect)?;
    if let Err(throttled) =
        state
            .config
            .auth
            .throttle
            .check(user.login_attempts, user.last_login_attempt_at, now)
    {
        audit::record(
            state.audit.as_ref(),
            AuditEntry::new("Reached max login attempts")
                .security()
                .user(&user)
                .client(client),
        )
        .await;
        return Err(AuthError::TooManyAttempts {
            minutes: throttled.minutes(),
        }
        .into());
    }

    if !verify_password(password, user.password_hash.as_deref())? {
        audit::record(
            state.audit.as_ref(),
            AuditEntry::new("Password Incorrect")
                .security()
                .user(&user)
                .client(client),
        )
        .await;
        return Err(incorrect());
    }

    let pruned = state.store.remove_expired_tokens(&user.id, now).await?;
    if pruned > 0 {
        debug!(user_id = %user.id, pruned, "removed expired session records");
    }

    if user.mfa_enabled() {
        let token = state
            .issuer
            .create_mfa_token(state.store.as_ref(), &user.id)
            .await?;
        send_sms_code(state, &user).await?;
        audit::record(
            state.audit.as_ref(),
            AuditEntry::new("Password verified (mfa pending)")
                .user(&user)
                .client(client),
        )
        .await;
        return Ok(LoginData {
            token,
            mfa_required: true,
            mfa_method: Some(user.mfa_method),
        });
    }

    state.store.reset_login_attempts(&user.id).await?;
    let token = state
        .issuer
        .create_auth_token(state.store.as_ref(), &user.id, client)
        .await?;
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new("Successfully authenticated (password)")
            .user(&user)
            .client(client),
    )
    .await;
    info!(user_id = %user.id, "password login");
    Ok(LoginData {
        token,
        mfa_required: false,
        mfa_method: None,
    })
}

// ---------------------------------------------------------------------------
// Session management
// ---------------------------------------------------------------------------

/// Re-enter the password to unlock sensitive changes for a while.
pub async fn confirm_access(
    state: &AppState,
    user: &User,
    password: &str,
    client: &ClientInfo,
) -> AppResult<()> {
    if !verify_password(password, user.password_hash.as_deref())? {
        audit::record(
            state.audit.as_ref(),
            AuditEntry::new("Failed to confirm access")
                .security()
                .user(user)
                .client(client),
        )
        .await;
        return Err(AppError::BadRequest(INCORRECT_PASSWORD.into()));
    }
    state.store.confirm_access(&user.id, Utc::now()).await?;
    Ok(())
}

/// Revoke the current session record, or all of them.
pub async fn logout(
    state: &AppState,
    user: &User,
    jti: &str,
    all: bool,
    client: &ClientInfo,
) -> AppResult<()> {
    if all {
        state.store.remove_auth_tokens(&user.id, None).await?;
    } else {
        state.store.remove_auth_token(&user.id, jti).await?;
    }
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(if all { "Logged out everywhere" } else { "Logged out" })
            .user(user)
            .client(client),
    )
    .await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Password reset
// ---------------------------------------------------------------------------

/// Mail a password-reset link. Succeeds whether or not the email exists.
pub async fn request_password_reset(state: &AppState, email: &str) -> AppResult<()> {
    let Some(user) = state.store.find_by_email(email).await? else {
        debug!("password reset requested for unknown email");
        return Ok(());
    };
    let token = state
        .issuer
        .create_access_token(state.store.as_ref(), &user.id, RESET_PASSWORD_ACTION)
        .await?;
    let reset_url = format!(
        "{}/reset-password?token={token}",
        state.config.app_url.trim_end_matches('/')
    );
    let mail = Mail::new(&user.email, "Reset your password", "reset-password.md")
        .param("name", user.name.clone())
        .param("resetUrl", reset_url);
    state.mailer.send(&mail).await?;
    Ok(())
}

/// Set a new password with a reset token.
///
/// The token is spent, every session is revoked and the throttle counter is
/// cleared; a fresh session token is returned.
pub async fn update_password(
    state: &AppState,
    claims: &TokenClaims,
    password: &str,
    client: &ClientInfo,
) -> AppResult<String> {
    validate_new_password(password)?;
    if claims.action.as_deref() != Some(RESET_PASSWORD_ACTION) {
        return Err(TokenError::WrongAction.into());
    }
    let user = state
        .store
        .find_by_id(&claims.sub)
        .await?
        .ok_or(TokenError::UnknownUser)?;
    if !state
        .store
        .consume_access_token_id(&user.id, &claims.jti)
        .await?
    {
        return Err(TokenError::Consumed.into());
    }

    let hash = hash_password(password)?;
    state.store.set_password_hash(&user.id, &hash).await?;
    state.store.remove_auth_tokens(&user.id, None).await?;
    state.store.reset_login_attempts(&user.id).await?;

    let token = state
        .issuer
        .create_auth_token(state.store.as_ref(), &user.id, client)
        .await?;
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new("Reset password").user(&user).client(client),
    )
    .await;
    Ok(token)
}
