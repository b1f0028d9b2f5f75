//! Token and request-context models.
//!
//! These are internal domain models, distinct from the API request/response
//! bodies in `keygate_api::models` (which carry the `{data: ...}` envelope).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Token category carried in the custom `kid` claim.
///
/// Not the JWT key id: it names what the token is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    User,
    Invite,
    Access,
    Passkey,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::User => "user",
            TokenKind::Invite => "invite",
            TokenKind::Access => "access",
            TokenKind::Passkey => "passkey",
        }
    }
}

impl FromStr for TokenKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TokenKind::User),
            "invite" => Ok(TokenKind::Invite),
            "access" => Ok(TokenKind::Access),
            "passkey" => Ok(TokenKind::Passkey),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token payload `type`, checked by the middleware against what an endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Full session token.
    User,
    /// MFA-pending token, only good for completing the challenge.
    Mfa,
    Invite,
    Access,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::User => "user",
            TokenType::Mfa => "mfa",
            TokenType::Invite => "invite",
            TokenType::Access => "access",
        }
    }
}

impl FromStr for TokenType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TokenType::User),
            "mfa" => Ok(TokenType::Mfa),
            "invite" => Ok(TokenType::Invite),
            "access" => Ok(TokenType::Access),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub kid: TokenKind,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Subject: user id, or email for invite tokens.
    pub sub: String,
    /// Token id, bound to a stored record on the user.
    pub jti: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// What an access token may be used for (e.g. `reset-password`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Facts about the caller captured from the HTTP request.
///
/// Used to stamp session records and audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Upper-cased ISO country code from the edge proxy.
    pub country: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
}
