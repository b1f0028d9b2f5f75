//! Tunables for token lifetimes, throttling and MFA.

use chrono::Duration;
use tracing::warn;

use crate::auth::jwt::TokenPolicy;
use crate::auth::mfa::MfaPolicy;
use crate::auth::throttle::{LoginThrottle, ThrottleRule};

/// Everything the auth flows need besides collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Name used in SMS bodies and as the TOTP issuer.
    pub app_name: String,
    pub tokens: TokenPolicy,
    pub throttle: LoginThrottle,
    pub mfa: MfaPolicy,
    /// How recent a password confirmation must be for sensitive MFA changes.
    pub confirm_access_window: Duration,
    /// Minimum gap between last-used updates on a session record.
    pub touch_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            app_name: "Keygate".into(),
            tokens: TokenPolicy::default(),
            throttle: LoginThrottle::default(),
            mfa: MfaPolicy::default(),
            confirm_access_window: Duration::minutes(30),
            touch_interval: Duration::seconds(30),
        }
    }
}

impl AuthSettings {
    /// Defaults overridden by environment variables.
    ///
    /// | Variable                     | Default      |
    /// |------------------------------|--------------|
    /// | `APP_NAME`                   | `Keygate`    |
    /// | `TOKEN_TEMPORARY_SECS`       | 1 hour       |
    /// | `TOKEN_REGULAR_SECS`         | 30 days      |
    /// | `TOKEN_INVITE_SECS`          | 30 days      |
    /// | `TOKEN_ACCESS_SECS`          | 30 days      |
    /// | `LOGIN_THROTTLE`             | `5:60,10:3600` (attempts:cooldown secs) |
    /// | `CONFIRM_ACCESS_WINDOW_SECS` | 30 minutes   |
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(name) = std::env::var("APP_NAME")
            && !name.is_empty()
        {
            settings.mfa.issuer = name.clone();
            settings.app_name = name;
        }
        if let Some(d) = env_secs("TOKEN_TEMPORARY_SECS") {
            settings.tokens.temporary = d;
        }
        if let Some(d) = env_secs("TOKEN_REGULAR_SECS") {
            settings.tokens.regular = d;
        }
        if let Some(d) = env_secs("TOKEN_INVITE_SECS") {
            settings.tokens.invite = d;
        }
        if let Some(d) = env_secs("TOKEN_ACCESS_SECS") {
            settings.tokens.access = d;
        }
        if let Some(d) = env_secs("CONFIRM_ACCESS_WINDOW_SECS") {
            settings.confirm_access_window = d;
        }
        if let Ok(raw) = std::env::var("LOGIN_THROTTLE") {
            match parse_throttle(&raw) {
                Ok(throttle) => settings.throttle = throttle,
                Err(e) => warn!("ignoring LOGIN_THROTTLE: {e}"),
            }
        }
        settings
    }
}

fn env_secs(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    let secs = parse_secs(&raw);
    if secs.is_none() {
        warn!("ignoring {var}={raw}: expected a positive number of seconds");
    }
    secs
}

/// Positive whole seconds within chrono's range.
fn parse_secs(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<i64>().ok().filter(|secs| *secs > 0)?;
    Duration::try_seconds(secs)
}

/// Parse `attempts:secs[,attempts:secs...]`. An empty string disables throttling.
pub fn parse_throttle(raw: &str) -> Result<LoginThrottle, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(LoginThrottle::disabled());
    }
    let rules = raw
        .split(',')
        .map(|part| {
            let (attempts, secs) = part
                .trim()
                .split_once(':')
                .ok_or_else(|| format!("'{part}' is not attempts:secs"))?;
            let min_attempts = attempts
                .trim()
                .parse::<i32>()
                .map_err(|e| format!("'{attempts}': {e}"))?;
            if min_attempts <= 0 {
                return Err(format!("'{attempts}': attempts must be positive"));
            }
            let cooldown = parse_secs(secs)
                .ok_or_else(|| format!("'{secs}': expected a positive number of seconds"))?;
            Ok(ThrottleRule {
                min_attempts,
                cooldown,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(LoginThrottle::new(rules))
}
