//! Application error types.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use keygate_core::auth::AuthError;
use keygate_core::auth::jwt::TokenError;
use keygate_core::mailer::MailError;
use keygate_core::sms::SmsError;
use keygate_core::store::StoreError;
use thiserror::Error;
use tracing::error;

use crate::models::{ErrorBody, ErrorResponse};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Token(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation",
            AppError::Token(_) => "token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            error!("internal error: {detail}");
        }
        let status = self.status();
        let body = Json(ErrorResponse {
            error: ErrorBody {
                message: self.to_string(),
                kind: self.kind().to_string(),
                status: status.as_u16(),
            },
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::UserNotFound
            | AuthError::TokenMismatch
            | AuthError::InvalidCode
            | AuthError::Validation(_) => AppError::BadRequest(e.to_string()),
            AuthError::TooManyAttempts { .. } | AuthError::CredentialError => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::Token(t) => AppError::Token(t),
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail(_) => AppError::BadRequest(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<SmsError> for AppError {
    fn from(e: SmsError) -> Self {
        match e {
            SmsError::NoRecipient | SmsError::Unsubscribed => AppError::BadRequest(e.to_string()),
            SmsError::Delivery(msg) => AppError::Internal(msg),
        }
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        AppError::Internal(e.to_string())
    }
}
