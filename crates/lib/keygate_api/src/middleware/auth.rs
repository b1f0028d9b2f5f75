//! Authentication middleware: bearer token extraction, verification and
//! resolution of the user behind a session token.
//!
//! Both steps are idempotent per request. Once a [`Jwt`] is attached, later
//! `authenticate` layers leave it alone; once an [`AuthUser`] is attached,
//! `fetch_user` does nothing.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum::http::header::AUTHORIZATION;
use chrono::Utc;
use keygate_core::auth::jwt::TokenError;
use keygate_core::models::auth::{TokenClaims, TokenKind, TokenType};
use keygate_core::models::user::User;
use tracing::debug;

use super::client::client_info;
use crate::AppState;
use crate::error::AppError;

/// Verified claims of the request's bearer token.
#[derive(Debug, Clone)]
pub struct Jwt(pub TokenClaims);

/// The user behind a session token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// What an endpoint accepts.
#[derive(Debug, Clone, Copy)]
pub struct AuthOptions {
    /// Required payload `type`, if any.
    pub token_type: Option<TokenType>,
    /// Missing token is not an error.
    pub optional: bool,
    pub kinds: &'static [TokenKind],
}

impl AuthOptions {
    pub const fn required(token_type: TokenType) -> Self {
        Self {
            token_type: Some(token_type),
            optional: false,
            kinds: &[TokenKind::User],
        }
    }
}

/// Token from `Authorization: Bearer <token>`.
///
/// Exactly two space-separated parts with a case-insensitive `Bearer`
/// scheme; anything else counts as no token.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let mut parts = header?.split(' ');
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Validate the bearer token against `opts` and attach it as [`Jwt`].
pub fn authenticate(
    state: &AppState,
    request: &mut Request,
    opts: AuthOptions,
) -> Result<(), AppError> {
    if request.extensions().get::<Jwt>().is_some() {
        return Ok(());
    }
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(token) = bearer_token(header) else {
        if opts.optional {
            return Ok(());
        }
        return Err(TokenError::Missing.into());
    };

    let claims = state.issuer.verify(token)?;
    if !opts.kinds.contains(&claims.kid) {
        return Err(TokenError::UnsupportedKind.into());
    }
    if let Some(required) = opts.token_type
        && claims.token_type != required
    {
        return Err(TokenError::WrongType(required).into());
    }

    request.extensions_mut().insert(Jwt(claims));
    Ok(())
}

/// Resolve the session token's user and attach it as [`AuthUser`].
///
/// The session record's ip and last-used time are refreshed when the ip
/// changed or the record hasn't been touched for the configured interval;
/// expired records are pruned in the same pass.
pub async fn fetch_user(state: &AppState, request: &mut Request) -> Result<(), AppError> {
    if request.extensions().get::<AuthUser>().is_some() {
        return Ok(());
    }
    let Some(Jwt(claims)) = request.extensions().get::<Jwt>().cloned() else {
        return Ok(());
    };

    let user = state
        .store
        .find_by_id(&claims.sub)
        .await?
        .ok_or(TokenError::UnknownUser)?;
    let record = user
        .find_auth_token(&claims.jti)
        .ok_or(TokenError::UnknownUser)?;

    let client = client_info(
        request.method(),
        request.uri(),
        request.headers(),
        request.extensions(),
    );
    let now = Utc::now();
    let stale = record.last_used_at < now - state.config.auth.touch_interval;
    if stale || record.ip != client.ip {
        debug!(user_id = %user.id, jti = %claims.jti, "refreshing session record");
        state
            .store
            .touch_auth_token(&user.id, &claims.jti, client.ip.as_deref(), now)
            .await?;
        state.store.remove_expired_tokens(&user.id, now).await?;
    }

    request.extensions_mut().insert(AuthUser(user));
    Ok(())
}

/// Session token required; attaches [`Jwt`] and [`AuthUser`].
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut request, AuthOptions::required(TokenType::User))?;
    fetch_user(&state, &mut request).await?;
    Ok(next.run(request).await)
}

/// MFA-pending token required; attaches [`Jwt`] only.
pub async fn require_mfa(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut request, AuthOptions::required(TokenType::Mfa))?;
    Ok(next.run(request).await)
}

/// Single-use access token required; attaches [`Jwt`] only.
pub async fn require_access(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let opts = AuthOptions {
        token_type: Some(TokenType::Access),
        optional: false,
        kinds: &[TokenKind::Access],
    };
    authenticate(&state, &mut request, opts)?;
    Ok(next.run(request).await)
}

/// Session token optional; when present it must be valid and its user is
/// attached as for [`require_user`].
pub async fn optional_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let opts = AuthOptions {
        optional: true,
        ..AuthOptions::required(TokenType::User)
    };
    authenticate(&state, &mut request, opts)?;
    fetch_user(&state, &mut request).await?;
    Ok(next.run(request).await)
}
