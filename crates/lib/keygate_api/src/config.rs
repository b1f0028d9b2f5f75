//! API server configuration.

use keygate_core::auth::jwt::resolve_jwt_secret;
use keygate_core::settings::AuthSettings;
use keygate_core::sms::TwilioConfig;
use tracing::warn;
use url::Url;

const DEFAULT_TWILIO_API: &str = "https://api.twilio.com/";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// `development`, `staging`, `production`, ...
    pub env_name: String,
    /// Public frontend origin, used for links in mail.
    pub app_url: String,
    pub auth: AuthSettings,
    /// `None` means SMS is logged instead of sent.
    pub twilio: Option<TwilioConfig>,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                       | Default                            |
    /// |--------------------------------|------------------------------------|
    /// | `BIND_ADDR`                    | `127.0.0.1:3100`                   |
    /// | `DATABASE_URL`                 | `postgres://localhost:5432/keygate`|
    /// | `JWT_SECRET` / `AUTH_SECRET`   | generated & persisted to file      |
    /// | `ENV_NAME`                     | `development`                      |
    /// | `APP_URL`                      | `http://localhost:2200`            |
    /// | `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER` | unset (SMS logged) |
    /// | `TWILIO_TEST_NUMBER`           | unset; in development all SMS go here |
    /// | `TWILIO_API_BASE`              | `https://api.twilio.com/`          |
    ///
    /// Token lifetimes and throttling are read by [`AuthSettings::from_env`].
    pub fn from_env() -> Self {
        let mut config = Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/keygate".into()),
            jwt_secret: resolve_jwt_secret(),
            env_name: std::env::var("ENV_NAME").unwrap_or_else(|_| "development".into()),
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:2200".into()),
            auth: AuthSettings::from_env(),
            twilio: None,
        };
        config.twilio = twilio_from_env(config.is_development());
        config
    }

    /// Settings for tests and local runs: no database, logged SMS.
    pub fn for_testing(jwt_secret: &str) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            pg_connection_url: String::new(),
            jwt_secret: jwt_secret.into(),
            env_name: "test".into(),
            app_url: "http://localhost:2200".into(),
            auth: AuthSettings::default(),
            twilio: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.env_name == "development"
    }
}

fn twilio_from_env(development: bool) -> Option<TwilioConfig> {
    let account_sid = non_empty_var("TWILIO_ACCOUNT_SID")?;
    let auth_token = non_empty_var("TWILIO_AUTH_TOKEN")?;
    let from_number = non_empty_var("TWILIO_FROM_NUMBER")?;
    let base = non_empty_var("TWILIO_API_BASE").unwrap_or_else(|| DEFAULT_TWILIO_API.into());
    let api_base = match Url::parse(&base) {
        Ok(url) => url,
        Err(e) => {
            warn!("TWILIO_API_BASE '{base}' is invalid ({e}); SMS will be logged only");
            return None;
        }
    };
    let redirect_to = if development {
        non_empty_var("TWILIO_TEST_NUMBER")
    } else {
        None
    };
    Some(TwilioConfig {
        account_sid,
        auth_token,
        from_number,
        api_base,
        redirect_to,
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
