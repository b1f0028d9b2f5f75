//! # keygate_api
//!
//! HTTP API library for Keygate.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use keygate_core::audit::{AuditLog, PgAuditLog};
use keygate_core::auth::jwt::TokenIssuer;
use keygate_core::auth::verifier::MfaVerifier;
use keygate_core::mailer::{LogMailer, Mailer};
use keygate_core::sms::{LogSmsGateway, SmsGateway, TwilioGateway};
use keygate_core::store::{PgUserStore, UserStore};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, mfa, users};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub audit: Arc<dyn AuditLog>,
    pub sms: Arc<dyn SmsGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub issuer: TokenIssuer,
    pub verifier: Arc<MfaVerifier>,
    pub config: ApiConfig,
}

impl AppState {
    /// Wire up the issuer and verifier from `config` over the given collaborators.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
        sms: Arc<dyn SmsGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let issuer = TokenIssuer::new(config.jwt_secret.as_bytes(), config.auth.tokens);
        let verifier = Arc::new(MfaVerifier::new(
            store.clone(),
            audit.clone(),
            issuer.clone(),
            &config.auth,
        ));
        Self {
            store,
            audit,
            sms,
            mailer,
            issuer,
            verifier,
            config,
        }
    }

    /// Postgres-backed state. SMS goes through Twilio when configured and is
    /// logged otherwise; mail is logged.
    pub fn postgres(config: ApiConfig, pool: PgPool) -> Self {
        let sms: Arc<dyn SmsGateway> = match &config.twilio {
            Some(twilio) => Arc::new(TwilioGateway::new(twilio.clone())),
            None => Arc::new(LogSmsGateway),
        };
        Self::new(
            config,
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgAuditLog::new(pool)),
            sms,
            Arc::new(LogMailer),
        )
    }
}

/// Run embedded database migrations.
///
/// Delegates to `keygate_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    keygate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_PASSWORD_LOGIN, post(auth::login_handler))
        .route(
            routes::POST_AUTH_PASSWORD_REQUEST,
            post(auth::request_password_handler),
        );

    // Session token optional
    let optional = Router::new()
        .route(routes::GET_AUTH_SESSION, get(auth::session_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::optional_user,
        ));

    // MFA-pending token
    let challenge = Router::new()
        .route(routes::POST_MFA_VERIFY, post(mfa::verify_handler))
        .route(routes::POST_MFA_SEND_CODE, post(mfa::send_code_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_mfa,
        ));

    // Single-use access token
    let access = Router::new()
        .route(
            routes::POST_AUTH_PASSWORD_UPDATE,
            post(auth::update_password_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_access,
        ));

    // Session token
    let protected = Router::new()
        .route(routes::POST_MFA_SETUP, post(mfa::setup_handler))
        .route(routes::POST_MFA_CHECK_CODE, post(mfa::check_code_handler))
        .route(routes::POST_MFA_ENABLE, post(mfa::enable_handler))
        .route(
            routes::POST_MFA_GENERATE_BACKUP_CODES,
            post(mfa::generate_backup_codes_handler),
        )
        .route(routes::DELETE_MFA_DISABLE, delete(mfa::disable_handler))
        .route(
            routes::POST_AUTH_CONFIRM_ACCESS,
            post(auth::confirm_access_handler),
        )
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_USERS_ME, get(users::me_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user,
        ));

    Router::new()
        .merge(public)
        .merge(optional)
        .merge(challenge)
        .merge(access)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
