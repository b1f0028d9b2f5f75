//! Authentication request handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Extension;
use serde::Serialize;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::middleware::auth::{AuthUser, Jwt};
use crate::middleware::client::Client;
use crate::models::{
    DataResponse, LoginData, LoginRequest, LogoutQuery, PasswordRequest, ResetRequest, TokenData,
    UserData,
};
use crate::services::auth;

/// `POST /1/auth/password/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Client(client): Client,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<Json<DataResponse<LoginData>>> {
    let data = auth::login(&state, &body.email, &body.password, &client).await?;
    Ok(Json(DataResponse::new(data)))
}

/// `POST /1/auth/password/request`: mail a password-reset link.
pub async fn request_password_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<ResetRequest>,
) -> AppResult<StatusCode> {
    auth::request_password_reset(&state, &body.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /1/auth/password/update`: set a new password with a reset token.
pub async fn update_password_handler(
    State(state): State<AppState>,
    Extension(Jwt(claims)): Extension<Jwt>,
    Client(client): Client,
    AppJson(body): AppJson<PasswordRequest>,
) -> AppResult<Json<DataResponse<TokenData>>> {
    let token = auth::update_password(&state, &claims, &body.password, &client).await?;
    Ok(Json(DataResponse::new(TokenData { token })))
}

/// `POST /1/auth/confirm-access`: re-enter the password before sensitive changes.
pub async fn confirm_access_handler(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Client(client): Client,
    AppJson(body): AppJson<PasswordRequest>,
) -> AppResult<StatusCode> {
    auth::confirm_access(&state, &user, &body.password, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /1/auth/logout`: revoke this session, or every session with
/// `{"all": true}` (or `?all=true`).
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(Jwt(claims)): Extension<Jwt>,
    Client(client): Client,
    Query(query): Query<LogoutQuery>,
    body: Option<AppJson<LogoutQuery>>,
) -> AppResult<StatusCode> {
    let all = query.all || body.is_some_and(|AppJson(body)| body.all);
    auth::logout(&state, &user, &claims.jti, all, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SessionData {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserData>,
}

/// `GET /1/auth/session`: who the bearer is, if anyone.
pub async fn session_handler(user: Option<Extension<AuthUser>>) -> Json<DataResponse<SessionData>> {
    let user = user.map(|Extension(AuthUser(user))| UserData::from(&user));
    Json(DataResponse::new(SessionData {
        authenticated: user.is_some(),
        user,
    }))
}
