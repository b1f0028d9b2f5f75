//! MFA challenge and enrollment.

use chrono::Utc;
use keygate_core::audit::{self, AuditEntry};
use keygate_core::auth::mfa::{self, GeneratedSecret};
use keygate_core::auth::AuthError;
use keygate_core::mailer::Mail;
use keygate_core::models::auth::{ClientInfo, TokenClaims};
use keygate_core::models::user::{MfaMethod, User};
use keygate_core::sms::verification_message;
use keygate_core::store::MfaEnrollment;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{EnableRequest, SetupRequest};

const MFA_ENABLED_SUBJECT: &str = "Two-factor authentication enabled";
const MFA_DISABLED_SUBJECT: &str = "Two-factor authentication disabled";

// ---------------------------------------------------------------------------
// Challenge
// ---------------------------------------------------------------------------

/// Text the current code to an SMS user. Other methods are left alone.
pub async fn send_sms_code(state: &AppState, user: &User) -> AppResult<()> {
    if user.mfa_method != MfaMethod::Sms {
        return Ok(());
    }
    let (Some(phone), Some(secret)) = (&user.mfa_phone_number, &user.mfa_secret) else {
        return Err(AppError::BadRequest(
            "sms multi factor verification has not been configured correctly".into(),
        ));
    };
    send_code_to(state, phone, secret).await
}

async fn send_code_to(state: &AppState, phone: &str, secret: &str) -> AppResult<()> {
    let code = mfa::generate_code(secret)?;
    let body = verification_message(&state.config.auth.app_name, &code);
    state.sms.send(phone, &body).await?;
    debug!("sent mfa code by sms");
    Ok(())
}

/// Re-send the SMS code to the holder of an MFA-pending token.
pub async fn send_code(state: &AppState, claims: &TokenClaims) -> AppResult<()> {
    let user = state
        .store
        .find_by_id(&claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    if user.temp_token_id.as_deref() != Some(claims.jti.as_str()) {
        return Err(AuthError::TokenMismatch.into());
    }
    if user.mfa_method != MfaMethod::Sms {
        return Err(AppError::BadRequest(
            "sms multi factor verification is not enabled for this account".into(),
        ));
    }
    send_sms_code(state, &user).await
}

// ---------------------------------------------------------------------------
// Enrollment
// ---------------------------------------------------------------------------

/// Sensitive MFA changes need a recent password confirmation.
pub fn require_confirmed_access(state: &AppState, user: &User) -> AppResult<()> {
    let window = state.config.auth.confirm_access_window;
    match user.access_confirmed_at {
        Some(at) if at >= Utc::now() - window => Ok(()),
        _ => Err(AppError::Forbidden("Confirm access".into())),
    }
}

fn require_phone(phone: Option<&str>) -> AppResult<&str> {
    phone
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("phoneNumber is required".into()))
}

/// Generate a fresh secret for `user`; SMS setups also get the first code.
pub async fn setup(state: &AppState, user: &User, req: &SetupRequest) -> AppResult<GeneratedSecret> {
    require_confirmed_access(state, user)?;
    if req.method == MfaMethod::None {
        return Err(AppError::BadRequest("method must be otp or sms".into()));
    }
    let phone = match req.method {
        MfaMethod::Sms => Some(require_phone(req.phone_number.as_deref())?),
        _ => None,
    };
    let generated = mfa::generate_secret(&state.config.auth.mfa.issuer, &user.email)?;
    if let Some(phone) = phone {
        send_code_to(state, phone, &generated.secret).await?;
    }
    Ok(generated)
}

/// Whether `code` is currently valid for a secret not yet enrolled.
pub fn check_code(state: &AppState, secret: &str, method: MfaMethod, code: &str) -> AppResult<()> {
    let window = state.config.auth.mfa.window_for(method);
    if mfa::verify_code(secret, window, code) {
        Ok(())
    } else {
        Err(AuthError::InvalidCode.into())
    }
}

/// Store the enrollment and mail a confirmation.
pub async fn enable(
    state: &AppState,
    user: &User,
    req: EnableRequest,
    client: &ClientInfo,
) -> AppResult<()> {
    require_confirmed_access(state, user)?;
    let phone_number = match req.method {
        MfaMethod::None => {
            return Err(AppError::BadRequest("method must be otp or sms".into()));
        }
        MfaMethod::Sms => Some(require_phone(req.phone_number.as_deref())?.to_string()),
        MfaMethod::Otp => None,
    };
    let secret = req
        .secret
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("secret is required".into()))?;

    let enrollment = MfaEnrollment {
        method: req.method,
        secret: Some(secret),
        phone_number,
        backup_codes: req.backup_codes,
    };
    state.store.set_mfa(&user.id, &enrollment).await?;

    let mail = match (&enrollment.method, &enrollment.phone_number) {
        (MfaMethod::Sms, Some(phone)) => {
            let last4 = phone
                .char_indices()
                .rev()
                .nth(3)
                .map_or(phone.as_str(), |(i, _)| &phone[i..]);
            Mail::new(&user.email, MFA_ENABLED_SUBJECT, "mfa-sms-enabled.md")
                .param("phoneNumber", last4)
        }
        _ => Mail::new(&user.email, MFA_ENABLED_SUBJECT, "mfa-otp-enabled.md"),
    };
    state.mailer.send(&mail.param("name", user.name.clone())).await?;

    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(format!("Enabled mfa ({})", enrollment.method))
            .security()
            .user(user)
            .client(client),
    )
    .await;
    info!(user_id = %user.id, method = %enrollment.method, "mfa enabled");
    Ok(())
}

/// Fresh backup codes for the client to show before enabling.
pub fn generate_backup_codes(state: &AppState) -> Vec<String> {
    mfa::generate_backup_codes(state.config.auth.mfa.backup_code_count)
}

/// Clear the enrollment and revoke every other session.
pub async fn disable(
    state: &AppState,
    user: &User,
    jti: &str,
    client: &ClientInfo,
) -> AppResult<()> {
    require_confirmed_access(state, user)?;
    state
        .store
        .set_mfa(&user.id, &MfaEnrollment::default())
        .await?;
    let revoked = state.store.remove_auth_tokens(&user.id, Some(jti)).await?;

    let mail = Mail::new(&user.email, MFA_DISABLED_SUBJECT, "mfa-disabled.md")
        .param("name", user.name.clone());
    state.mailer.send(&mail).await?;

    audit::record(
        state.audit.as_ref(),
        AuditEntry::new("Disabled mfa")
            .security()
            .user(user)
            .client(client),
    )
    .await;
    info!(user_id = %user.id, revoked, "mfa disabled");
    Ok(())
}
