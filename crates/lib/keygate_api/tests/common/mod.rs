//! Shared harness: the full router over in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use keygate_api::{AppState, config::ApiConfig};
use keygate_core::audit::MemoryAuditLog;
use keygate_core::auth::mfa;
use keygate_core::auth::password::hash_password;
use keygate_core::mailer::RecordingMailer;
use keygate_core::models::auth::ClientInfo;
use keygate_core::models::user::{MfaMethod, User};
use keygate_core::sms::RecordingSmsGateway;
use keygate_core::store::{MemoryUserStore, NewUser, UserStore};
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse";

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryUserStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub sms: Arc<RecordingSmsGateway>,
    pub mailer: Arc<RecordingMailer>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryUserStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let sms = Arc::new(RecordingSmsGateway::new());
        let mailer = Arc::new(RecordingMailer::new());
        let state = AppState::new(
            ApiConfig::for_testing("integration-secret"),
            store.clone(),
            audit.clone(),
            sms.clone(),
            mailer.clone(),
        );
        Self {
            app: keygate_api::router(state.clone()),
            state,
            store,
            audit,
            sms,
            mailer,
        }
    }

    /// A user whose password is [`PASSWORD`].
    pub async fn user(&self, email: &str) -> User {
        self.store
            .create_user(NewUser {
                email: email.into(),
                name: Some("Test User".into()),
                password_hash: Some(hash_password(PASSWORD).expect("hash")),
            })
            .await
            .expect("create user")
    }

    /// Enroll `user_id` in MFA and return the secret.
    pub fn enroll(&self, user_id: &str, method: MfaMethod, phone: Option<&str>) -> String {
        let secret = mfa::generate_secret("Keygate", "user@example.com")
            .expect("secret")
            .secret;
        self.modify(user_id, |u| {
            u.mfa_method = method;
            u.mfa_secret = Some(secret.clone());
            u.mfa_phone_number = phone.map(str::to_string);
        });
        secret
    }

    pub fn modify(&self, user_id: &str, f: impl FnOnce(&mut User)) {
        let mut user = self.store.get(user_id).expect("user exists");
        f(&mut user);
        self.store.put(user);
    }

    /// Session token recorded on the user, as after a login.
    pub async fn session(&self, user_id: &str) -> String {
        self.state
            .issuer
            .create_auth_token(self.store.as_ref(), user_id, &ClientInfo::default())
            .await
            .expect("session token")
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.send(req).await
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }
}

pub fn error_message(json: &Value) -> &str {
    json["error"]["message"].as_str().unwrap_or_default()
}
