//! JWT issuance and verification.
//!
//! Every token is HS256-signed and carries a fresh 15 character `jti`. The
//! `jti` is also written to the user record for the token's purpose (a
//! session record, `temp_token_id` or `access_token_id`), so re-issuing a
//! token of the same class invalidates the previous one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AuthError;
use crate::models::auth::{ClientInfo, TokenClaims, TokenKind, TokenType};
use crate::models::user::AuthTokenRecord;
use crate::store::UserStore;

/// Length of generated token ids.
const TOKEN_ID_LEN: usize = 15;

/// Token failures surfaced to clients as 401s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no jwt token found in request")]
    Missing,

    #[error("bad jwt token")]
    Malformed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("jwt expired")]
    Expired,

    #[error("jwt token does not match supported kid")]
    UnsupportedKind,

    #[error("endpoint requires jwt token payload match type \"{0}\"")]
    WrongType(TokenType),

    #[error("jwt token cannot be used for this action")]
    WrongAction,

    #[error("jwt token has already been used")]
    Consumed,

    #[error("User associated to token could not be found")]
    UnknownUser,
}

/// Lifetimes per token purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// MFA-pending tokens.
    pub temporary: Duration,
    /// Session tokens.
    pub regular: Duration,
    pub invite: Duration,
    pub access: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            temporary: Duration::hours(1),
            regular: Duration::days(30),
            invite: Duration::days(30),
            access: Duration::days(30),
        }
    }
}

/// A signed token together with the id and expiry it was minted with.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Claims as they arrive, before `kid` and `type` are checked.
#[derive(Debug, Serialize, Deserialize)]
struct RawClaims {
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "type", default)]
    token_type: Option<String>,
    sub: String,
    jti: String,
    #[serde(default)]
    iat: i64,
    exp: i64,
    #[serde(default)]
    action: Option<String>,
}

/// Mints and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    policy: TokenPolicy,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], policy: TokenPolicy) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            policy,
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Sign a token for `sub` that expires after `lifetime`.
    pub fn sign(
        &self,
        kid: TokenKind,
        token_type: TokenType,
        sub: &str,
        lifetime: Duration,
        action: Option<&str>,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + lifetime;
        let claims = TokenClaims {
            kid,
            token_type,
            sub: sub.to_string(),
            jti: generate_token_id(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            action: action.map(str::to_string),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Issue a session token and record it on the user.
    ///
    /// The record carries the caller's ip, user agent and country so the
    /// session can be listed and revoked later.
    pub async fn create_auth_token(
        &self,
        store: &dyn UserStore,
        user_id: &str,
        client: &ClientInfo,
    ) -> Result<String, AuthError> {
        let issued = self.sign(
            TokenKind::User,
            TokenType::User,
            user_id,
            self.policy.regular,
            None,
        )?;
        let record = AuthTokenRecord {
            jti: issued.jti.clone(),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            country: client.country.clone(),
            expires_at: issued.expires_at,
            last_used_at: Utc::now(),
        };
        if !store.add_auth_token(user_id, record).await? {
            return Err(AuthError::UserNotFound);
        }
        debug!(user_id, jti = %issued.jti, "issued session token");
        Ok(issued.token)
    }

    /// Issue the MFA-pending token that alone can complete the challenge.
    pub async fn create_mfa_token(
        &self,
        store: &dyn UserStore,
        user_id: &str,
    ) -> Result<String, AuthError> {
        let issued = self.sign(
            TokenKind::User,
            TokenType::Mfa,
            user_id,
            self.policy.temporary,
            None,
        )?;
        if !store.set_temp_token_id(user_id, &issued.jti).await? {
            return Err(AuthError::UserNotFound);
        }
        Ok(issued.token)
    }

    /// Invite tokens are keyed by email; there is no user yet.
    pub fn create_invite_token(&self, email: &str) -> Result<String, AuthError> {
        self.sign(
            TokenKind::Invite,
            TokenType::Invite,
            email,
            self.policy.invite,
            None,
        )
        .map(|issued| issued.token)
    }

    /// Issue a single-use access token limited to `action`.
    pub async fn create_access_token(
        &self,
        store: &dyn UserStore,
        user_id: &str,
        action: &str,
    ) -> Result<String, AuthError> {
        let issued = self.sign(
            TokenKind::Access,
            TokenType::Access,
            user_id,
            self.policy.access,
            Some(action),
        )?;
        if !store.set_access_token_id(user_id, &issued.jti).await? {
            return Err(AuthError::UserNotFound);
        }
        Ok(issued.token)
    }

    /// Check signature and expiry and parse the claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let raw = decode::<RawClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })?
            .claims;

        let kid = raw
            .kid
            .as_deref()
            .and_then(|k| k.parse::<TokenKind>().ok())
            .ok_or(TokenError::UnsupportedKind)?;
        let token_type = raw
            .token_type
            .as_deref()
            .and_then(|t| t.parse::<TokenType>().ok())
            .ok_or(TokenError::Malformed)?;

        Ok(TokenClaims {
            kid,
            token_type,
            sub: raw.sub,
            jti: raw.jti,
            iat: raw.iat,
            exp: raw.exp,
            action: raw.action,
        })
    }
}

/// Random 15 character alphanumeric token id.
pub fn generate_token_id() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_ID_LEN)
        .map(char::from)
        .collect()
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    for var in ["JWT_SECRET", "AUTH_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    load_or_create_secret(&jwt_secret_path())
}

/// Read the secret at `path`, generating and persisting one if absent.
pub fn load_or_create_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), "could not create secret dir: {e}");
    }
    match std::fs::write(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated new JWT secret"),
        Err(e) => warn!(path = %path.display(), "JWT secret not persisted: {e}"),
    }
    secret
}

fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keygate")
        .join("jwt-secret")
}
