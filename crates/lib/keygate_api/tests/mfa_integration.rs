//! MFA challenge and enrollment through the router.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{Harness, PASSWORD, error_message};
use keygate_core::auth::mfa::generate_code;
use keygate_core::models::user::MfaMethod;
use serde_json::{Value, json};

/// Password login for an enrolled user; returns the MFA-pending token.
async fn pending_token(h: &Harness, email: &str) -> String {
    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["mfaRequired"], true);
    json["data"]["token"].as_str().unwrap().to_string()
}

async fn verify(h: &Harness, token: &str, code: &str) -> (StatusCode, Value) {
    h.call(
        Method::POST,
        "/1/mfa/verify",
        Some(token),
        Some(json!({ "code": code })),
    )
    .await
}

// ---------------------------------------------------------------------------
// Challenge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn totp_code_completes_challenge() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let secret = h.enroll(&user.id, MfaMethod::Otp, None);
    let pending = pending_token(&h, "ada@example.com").await;

    let (status, json) = verify(&h, &pending, &generate_code(&secret).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let session = json["data"]["token"].as_str().unwrap();

    let (status, _) = h.call(Method::GET, "/1/users/me", Some(session), None).await;
    assert_eq!(status, StatusCode::OK);
    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.login_attempts, 0);
    assert_eq!(stored.auth_tokens.len(), 1);
    assert!(
        h.audit
            .activities()
            .contains(&"Successfully authenticated (mfa)".to_string())
    );
}

#[tokio::test]
async fn backup_code_works_once() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Otp, None);
    h.modify(&user.id, |u| {
        u.mfa_backup_codes = vec!["12345-67890".into(), "11111-22222".into()];
    });
    let pending = pending_token(&h, "ada@example.com").await;

    let (status, _) = verify(&h, &pending, "12345-67890").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        h.store.get(&user.id).unwrap().mfa_backup_codes,
        vec!["11111-22222".to_string()]
    );

    let (status, json) = verify(&h, &pending, "12345-67890").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "Not a valid code");
    assert!(h.audit.activities().contains(
        &"Successfully authenticated (mfa using backup code)".to_string()
    ));
}

#[tokio::test]
async fn superseded_pending_token_is_rejected() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let secret = h.enroll(&user.id, MfaMethod::Otp, None);
    let first = pending_token(&h, "ada@example.com").await;
    let _second = pending_token(&h, "ada@example.com").await;

    let (status, json) = verify(&h, &first, &generate_code(&secret).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "Token is invalid (jti)");
}

#[tokio::test]
async fn wrong_code_counts_attempt_and_is_audited() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Otp, None);
    let pending = pending_token(&h, "ada@example.com").await;

    let (status, json) = verify(&h, &pending, "000000x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "Not a valid code");
    // One for the password login, one for the code.
    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 2);
    assert!(h.audit.activities().contains(&"Failed mfa challenge".to_string()));
}

#[tokio::test]
async fn throttled_challenge_refuses_even_a_valid_code() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let secret = h.enroll(&user.id, MfaMethod::Otp, None);
    let pending = pending_token(&h, "ada@example.com").await;
    h.modify(&user.id, |u| {
        u.login_attempts = 10;
        u.last_login_attempt_at = Some(Utc::now());
    });

    let (status, json) = verify(&h, &pending, &generate_code(&secret).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        "Too many attempts. Try again in 60 minute(s)"
    );
    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 11);
    assert!(
        h.audit
            .activities()
            .contains(&"Reached max mfa challenge attempts".to_string())
    );
}

#[tokio::test]
async fn fresh_password_logins_do_not_lift_the_lockout() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Otp, None);

    for _ in 0..4 {
        // Sit out the one-minute cool-down.
        h.modify(&user.id, |u| {
            u.last_login_attempt_at = u
                .last_login_attempt_at
                .map(|at| at - Duration::seconds(61));
        });
        let (status, json) = h
            .call(
                Method::POST,
                "/1/auth/password/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
            )
            .await;
        if status == StatusCode::UNAUTHORIZED {
            break;
        }
        let pending = json["data"]["token"].as_str().unwrap().to_string();
        for _ in 0..5 {
            verify(&h, &pending, "000000x").await;
        }
    }

    assert!(h.store.get(&user.id).unwrap().login_attempts >= 10);
    h.modify(&user.id, |u| {
        u.last_login_attempt_at = Some(Utc::now() - Duration::seconds(61));
    });
    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        "Too many attempts. Try again in 59 minute(s)"
    );
}

#[tokio::test]
async fn missing_code_field_is_a_validation_error() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Otp, None);
    let pending = pending_token(&h, "ada@example.com").await;

    let (status, json) = h
        .call(Method::POST, "/1/mfa/verify", Some(&pending), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["type"], "validation");
    assert_eq!(json["error"]["status"], 400);
    assert!(error_message(&json).contains("missing field `code`"));
}

#[tokio::test]
async fn session_token_cannot_complete_challenge() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;

    let (status, json) = verify(&h, &session, "123456").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        r#"endpoint requires jwt token payload match type "mfa""#
    );
}

#[tokio::test]
async fn send_code_only_for_sms_users() {
    let h = Harness::new();
    let otp_user = h.user("otp@example.com").await;
    h.enroll(&otp_user.id, MfaMethod::Otp, None);
    let pending = pending_token(&h, "otp@example.com").await;
    let (status, json) = h
        .call(Method::POST, "/1/mfa/send-code", Some(&pending), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(&json),
        "sms multi factor verification is not enabled for this account"
    );

    let sms_user = h.user("sms@example.com").await;
    let secret = h.enroll(&sms_user.id, MfaMethod::Sms, Some("+15550001234"));
    let pending = pending_token(&h, "sms@example.com").await;
    let (status, _) = h
        .call(Method::POST, "/1/mfa/send-code", Some(&pending), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // One from login, one resent.
    let sent = h.sms.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(to, _)| to == "+15550001234"));

    let code = sent[1].1.rsplit(' ').next().unwrap();
    let (status, _) = verify(&h, &pending, code).await;
    assert_eq!(status, StatusCode::OK, "sms code for secret {secret}");
}

// ---------------------------------------------------------------------------
// Enrollment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn setup_returns_secret_and_provisioning_uri() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/setup",
            Some(&session),
            Some(json!({ "method": "otp" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&json), "Confirm access");

    h.modify(&user.id, |u| u.access_confirmed_at = Some(Utc::now()));
    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/setup",
            Some(&session),
            Some(json!({ "method": "otp" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!json["data"]["secret"].as_str().unwrap().is_empty());
    assert!(
        json["data"]["uri"]
            .as_str()
            .unwrap()
            .starts_with("otpauth://totp/")
    );
    assert!(h.sms.sent().is_empty());
}

#[tokio::test]
async fn sms_setup_needs_phone_and_sends_first_code() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;
    h.modify(&user.id, |u| u.access_confirmed_at = Some(Utc::now()));

    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/setup",
            Some(&session),
            Some(json!({ "method": "sms" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "phoneNumber is required");

    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/setup",
            Some(&session),
            Some(json!({ "method": "sms", "phoneNumber": "+15550001234" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let secret = json["data"]["secret"].as_str().unwrap();
    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);

    let code = sent[0].1.rsplit(' ').next().unwrap();
    let (status, _) = h
        .call(
            Method::POST,
            "/1/mfa/check-code",
            Some(&session),
            Some(json!({ "code": code, "secret": secret, "method": "sms" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn check_code_rejects_wrong_code() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;
    let secret = keygate_core::auth::mfa::generate_secret("Keygate", "ada@example.com")
        .unwrap()
        .secret;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/check-code",
            Some(&session),
            Some(json!({ "code": "abcdef", "secret": secret, "method": "otp" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "Not a valid code");
}

#[tokio::test]
async fn enable_requires_recent_access_confirmation() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;
    let body = json!({ "method": "otp", "secret": "JBSWY3DPEHPK3PXP", "backupCodes": ["12345-67890"] });

    let (status, json) = h
        .call(Method::POST, "/1/mfa/enable", Some(&session), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&json), "Confirm access");

    h.modify(&user.id, |u| {
        u.access_confirmed_at = Some(Utc::now() - Duration::minutes(31));
    });
    let (status, _) = h
        .call(Method::POST, "/1/mfa/enable", Some(&session), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/confirm-access",
            Some(&session),
            Some(json!({ "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h
        .call(Method::POST, "/1/mfa/enable", Some(&session), Some(body))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.mfa_method, MfaMethod::Otp);
    assert_eq!(stored.mfa_secret.as_deref(), Some("JBSWY3DPEHPK3PXP"));
    assert_eq!(stored.mfa_backup_codes, vec!["12345-67890".to_string()]);
    let mails = h.mailer.sent();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].template, "mfa-otp-enabled.md");
}

#[tokio::test]
async fn sms_enable_mails_last_four_digits() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;
    h.modify(&user.id, |u| u.access_confirmed_at = Some(Utc::now()));

    let (status, _) = h
        .call(
            Method::POST,
            "/1/mfa/enable",
            Some(&session),
            Some(json!({
                "method": "sms",
                "secret": "JBSWY3DPEHPK3PXP",
                "phoneNumber": "+15550001234",
                "backupCodes": []
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let mails = h.mailer.sent();
    assert_eq!(mails[0].template, "mfa-sms-enabled.md");
    assert_eq!(mails[0].params["phoneNumber"], "1234");
}

#[tokio::test]
async fn generate_backup_codes_returns_ten_codes() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/mfa/generate-backup-codes",
            Some(&session),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let codes = json["data"]["codes"].as_array().unwrap();
    assert_eq!(codes.len(), 10);
    assert!(codes.iter().all(|c| c.as_str().unwrap().len() == 11));
}

#[tokio::test]
async fn disable_clears_mfa_and_other_sessions() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Otp, None);
    let current = h.session(&user.id).await;
    let other = h.session(&user.id).await;
    h.modify(&user.id, |u| {
        u.mfa_backup_codes = vec!["12345-67890".into()];
        u.access_confirmed_at = Some(Utc::now());
    });

    let (status, _) = h
        .call(Method::DELETE, "/1/mfa/disable", Some(&current), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.mfa_method, MfaMethod::None);
    assert!(stored.mfa_secret.is_none());
    assert!(stored.mfa_backup_codes.is_empty());

    let (status, _) = h.call(Method::GET, "/1/users/me", Some(&current), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.call(Method::GET, "/1/users/me", Some(&other), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.mailer.sent()[0].template, "mfa-disabled.md");

    // Next login goes straight to a session.
    let (_, json) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
        )
        .await;
    assert!(json["data"].get("mfaRequired").is_none());
}
