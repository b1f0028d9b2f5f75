//! MFA request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::middleware::auth::{AuthUser, Jwt};
use crate::middleware::client::Client;
use crate::models::{
    BackupCodesData, CheckCodeRequest, DataResponse, EnableRequest, SecretData, SetupRequest,
    TokenData, VerifyRequest,
};
use crate::services::mfa;

/// `POST /1/mfa/verify`: exchange an MFA-pending token and a code for a session token.
pub async fn verify_handler(
    State(state): State<AppState>,
    Extension(Jwt(claims)): Extension<Jwt>,
    Client(client): Client,
    AppJson(body): AppJson<VerifyRequest>,
) -> AppResult<Json<DataResponse<TokenData>>> {
    let token = state.verifier.verify(&claims, &body.code, &client).await?;
    Ok(Json(DataResponse::new(TokenData { token })))
}

/// `POST /1/mfa/send-code`
pub async fn send_code_handler(
    State(state): State<AppState>,
    Extension(Jwt(claims)): Extension<Jwt>,
) -> AppResult<StatusCode> {
    mfa::send_code(&state, &claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /1/mfa/setup`: new secret and provisioning uri. Requires a recent access confirmation.
pub async fn setup_handler(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    AppJson(body): AppJson<SetupRequest>,
) -> AppResult<Json<DataResponse<SecretData>>> {
    let generated = mfa::setup(&state, &user, &body).await?;
    Ok(Json(DataResponse::new(SecretData {
        secret: generated.secret,
        uri: generated.uri,
    })))
}

/// `POST /1/mfa/check-code`
pub async fn check_code_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<CheckCodeRequest>,
) -> AppResult<StatusCode> {
    mfa::check_code(&state, &body.secret, body.method, &body.code)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /1/mfa/enable`
pub async fn enable_handler(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Client(client): Client,
    AppJson(body): AppJson<EnableRequest>,
) -> AppResult<StatusCode> {
    mfa::enable(&state, &user, body, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /1/mfa/generate-backup-codes`
pub async fn generate_backup_codes_handler(
    State(state): State<AppState>,
) -> Json<DataResponse<BackupCodesData>> {
    Json(DataResponse::new(BackupCodesData {
        codes: mfa::generate_backup_codes(&state),
    }))
}

/// `DELETE /1/mfa/disable`: requires a recent access confirmation.
pub async fn disable_handler(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(Jwt(claims)): Extension<Jwt>,
    Client(client): Client,
) -> AppResult<StatusCode> {
    mfa::disable(&state, &user, &claims.jti, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}
