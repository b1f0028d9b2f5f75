//! Login, bearer authentication, sessions and password reset through the router.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use common::{Harness, PASSWORD, error_message};
use keygate_core::models::auth::{TokenKind, TokenType};
use keygate_core::models::user::MfaMethod;
use serde_json::json;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_returns_session_token_usable_on_protected_routes() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"].get("mfaRequired").is_none());
    let token = json["data"]["token"].as_str().expect("token").to_string();

    let (status, json) = h.call(Method::GET, "/1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["id"], user.id.as_str());
    assert_eq!(json["data"]["email"], "ada@example.com");
    assert_eq!(json["data"]["mfaMethod"], "none");

    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.auth_tokens.len(), 1);
    assert_eq!(stored.login_attempts, 0);
    assert!(
        h.audit
            .activities()
            .contains(&"Successfully authenticated (password)".to_string())
    );
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;

    let (status, wrong) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, unknown) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "who@example.com", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(&wrong), error_message(&unknown));
    assert_eq!(error_message(&wrong), "Incorrect password");

    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 1);
    assert!(h.audit.activities().contains(&"Password Incorrect".to_string()));
}

#[tokio::test]
async fn throttled_login_is_rejected_and_counted() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.modify(&user.id, |u| {
        u.login_attempts = 5;
        u.last_login_attempt_at = Some(Utc::now());
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
        "Too many attempts. Try again in 1 minute(s)"
    );
    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 6);
    assert!(
        h.audit
            .activities()
            .contains(&"Reached max login attempts".to_string())
    );
}

#[tokio::test]
async fn cooldown_elapsed_lets_login_through() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.modify(&user.id, |u| {
        u.login_attempts = 7;
        u.last_login_attempt_at = Some(Utc::now() - Duration::minutes(2));
    });

    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 0);
}

#[tokio::test]
async fn mfa_user_gets_pending_token_and_sms_code() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    h.enroll(&user.id, MfaMethod::Sms, Some("+15550001234"));

    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["mfaRequired"], true);
    assert_eq!(json["data"]["mfaMethod"], "sms");
    // The counter runs on until the challenge is passed.
    assert_eq!(h.store.get(&user.id).unwrap().login_attempts, 1);

    let token = json["data"]["token"].as_str().unwrap();
    let claims = h.state.issuer.verify(token).unwrap();
    assert_eq!(claims.token_type, TokenType::Mfa);
    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.temp_token_id.as_deref(), Some(claims.jti.as_str()));
    assert!(stored.auth_tokens.is_empty());

    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15550001234");
    assert!(sent[0].1.starts_with("Your Keygate verification code is: "));

    // A pending token is not a session.
    let (status, json) = h.call(Method::GET, "/1/users/me", Some(token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        r#"endpoint requires jwt token payload match type "user""#
    );
}

// ---------------------------------------------------------------------------
// Bearer authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bearer_token_problems_are_401_token_errors() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let issuer = &h.state.issuer;

    let expired = issuer
        .sign(
            TokenKind::User,
            TokenType::User,
            &user.id,
            Duration::seconds(-10),
            None,
        )
        .unwrap()
        .token;
    let invite = issuer.create_invite_token("new@example.com").unwrap();
    let foreign = keygate_core::auth::jwt::TokenIssuer::new(b"other", Default::default())
        .sign(
            TokenKind::User,
            TokenType::User,
            &user.id,
            Duration::hours(1),
            None,
        )
        .unwrap()
        .token;

    let cases = [
        (None, "no jwt token found in request"),
        (Some("garbage"), "bad jwt token"),
        (Some(expired.as_str()), "jwt expired"),
        (Some(foreign.as_str()), "invalid signature"),
        (Some(invite.as_str()), "jwt token does not match supported kid"),
    ];
    for (token, message) in cases {
        let (status, json) = h.call(Method::GET, "/1/users/me", token, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{message}");
        assert_eq!(error_message(&json), message);
        assert_eq!(json["error"]["type"], "token");
    }
}

#[tokio::test]
async fn revoked_session_record_rejects_token() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let token = h.session(&user.id).await;
    h.modify(&user.id, |u| u.auth_tokens.clear());

    let (status, json) = h.call(Method::GET, "/1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        "User associated to token could not be found"
    );
}

#[tokio::test]
async fn new_ip_refreshes_session_record_and_prunes_expired() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let token = h.session(&user.id).await;
    h.modify(&user.id, |u| {
        let mut stale = u.auth_tokens[0].clone();
        stale.jti = "expiredexpired1".into();
        stale.expires_at = Utc::now() - Duration::days(1);
        u.auth_tokens.push(stale);
    });

    let req = Request::builder()
        .uri("/1/users/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = h.send(req).await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.store.get(&user.id).unwrap();
    assert_eq!(stored.auth_tokens.len(), 1);
    assert_eq!(stored.auth_tokens[0].ip.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn session_endpoint_accepts_missing_token_but_not_bad_one() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let token = h.session(&user.id).await;

    let (status, json) = h.call(Method::GET, "/1/auth/session", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["authenticated"], false);
    assert!(json["data"].get("user").is_none());

    let (status, json) = h
        .call(Method::GET, "/1/auth/session", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["authenticated"], true);
    assert_eq!(json["data"]["user"]["email"], "ada@example.com");

    let (status, _) = h
        .call(Method::GET, "/1/auth/session", Some("garbage"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_only_the_current_session() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let first = h.session(&user.id).await;
    let second = h.session(&user.id).await;

    let (status, _) = h
        .call(Method::POST, "/1/auth/logout", Some(&first), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = h.call(Method::GET, "/1/users/me", Some(&first), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = h.call(Method::GET, "/1/users/me", Some(&second), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let first = h.session(&user.id).await;
    h.session(&user.id).await;

    let (status, _) = h
        .call(Method::POST, "/1/auth/logout?all=true", Some(&first), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.store.get(&user.id).unwrap().auth_tokens.is_empty());
}

#[tokio::test]
async fn confirm_access_checks_password() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let token = h.session(&user.id).await;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/confirm-access",
            Some(&token),
            Some(json!({ "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&json), "Incorrect password");
    assert!(h.store.get(&user.id).unwrap().access_confirmed_at.is_none());

    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/confirm-access",
            Some(&token),
            Some(json!({ "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.store.get(&user.id).unwrap().access_confirmed_at.is_some());
}

// ---------------------------------------------------------------------------
// Password reset
// ---------------------------------------------------------------------------

fn reset_token(h: &Harness) -> String {
    let sent = h.mailer.sent();
    let mail = sent.last().expect("reset mail");
    assert_eq!(mail.template, "reset-password.md");
    let url = mail.params["resetUrl"].as_str().expect("resetUrl");
    assert!(url.starts_with("http://localhost:2200/reset-password?token="));
    url.split("token=").nth(1).expect("token param").to_string()
}

#[tokio::test]
async fn password_reset_token_is_single_use() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let old_session = h.session(&user.id).await;

    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/password/request",
            None,
            Some(json!({ "email": "ada@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let token = reset_token(&h);

    let body = json!({ "password": "a brand new password" });
    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/update",
            Some(&token),
            Some(body.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let session = json["data"]["token"].as_str().expect("session").to_string();

    let (status, json) = h
        .call(Method::POST, "/1/auth/password/update", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(&json), "jwt token has already been used");

    let (status, _) = h
        .call(Method::GET, "/1/users/me", Some(&old_session), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = h
        .call(Method::GET, "/1/users/me", Some(&session), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/password/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "a brand new password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn password_reset_for_unknown_email_sends_nothing() {
    let h = Harness::new();
    let (status, _) = h
        .call(
            Method::POST,
            "/1/auth/password/request",
            None,
            Some(json!({ "email": "who@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn password_update_rejects_short_password_and_session_tokens() {
    let h = Harness::new();
    let user = h.user("ada@example.com").await;
    let session = h.session(&user.id).await;

    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/update",
            Some(&session),
            Some(json!({ "password": "a brand new password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_message(&json),
        "jwt token does not match supported kid"
    );

    h.call(
        Method::POST,
        "/1/auth/password/request",
        None,
        Some(json!({ "email": "ada@example.com" })),
    )
    .await;
    let token = reset_token(&h);
    let (status, json) = h
        .call(
            Method::POST,
            "/1/auth/password/update",
            Some(&token),
            Some(json!({ "password": "abc" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(&json),
        "password must be at least 6 characters"
    );
    // Still unspent.
    assert!(h.store.get(&user.id).unwrap().access_token_id.is_some());
}
