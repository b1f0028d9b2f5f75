//! Outbound text messages for SMS-delivered MFA codes.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Twilio error code for a recipient who replied STOP.
const TWILIO_UNSUBSCRIBED: i64 = 21610;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("No phone number specified")]
    NoRecipient,

    #[error("Recipient has unsubscribed from messages")]
    Unsubscribed,

    #[error("SMS delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError>;
}

/// Body of the message carrying an MFA code.
pub fn verification_message(app_name: &str, code: &str) -> String {
    format!("Your {app_name} verification code is: {code}")
}

/// Twilio account settings.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: Url,
    /// Deliver everything here instead of to the real recipient.
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Sends through the Twilio Messages API.
pub struct TwilioGateway {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn messages_url(&self) -> Result<Url, SmsError> {
        self.config
            .api_base
            .join(&format!(
                "2010-04-01/Accounts/{}/Messages.json",
                self.config.account_sid
            ))
            .map_err(|e| SmsError::Delivery(format!("bad Twilio url: {e}")))
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        if to.is_empty() {
            return Err(SmsError::NoRecipient);
        }
        let to = self.config.redirect_to.as_deref().unwrap_or(to);
        debug!("Sending SMS to {to}");

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];
        let resp = self
            .client
            .post(self.messages_url()?)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| SmsError::Delivery(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<TwilioErrorBody>(&text).ok();
            if parsed.as_ref().and_then(|b| b.code) == Some(TWILIO_UNSUBSCRIBED) {
                return Err(SmsError::Unsubscribed);
            }
            let detail = parsed.and_then(|b| b.message).unwrap_or(text);
            return Err(SmsError::Delivery(format!("Twilio HTTP {status}: {detail}")));
        }
        Ok(())
    }
}

/// Logs messages instead of sending them. For development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSmsGateway;

#[async_trait]
impl SmsGateway for LogSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        if to.is_empty() {
            return Err(SmsError::NoRecipient);
        }
        info!(to, body, "SMS sent (log only)");
        Ok(())
    }
}

/// Keeps every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingSmsGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSmsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(to, body)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsGateway for RecordingSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        if to.is_empty() {
            return Err(SmsError::NoRecipient);
        }
        self.sent
            .lock()
            .map_err(|e| SmsError::Delivery(e.to_string()))?
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_message_names_the_app() {
        assert_eq!(
            verification_message("Keygate", "123456"),
            "Your Keygate verification code is: 123456"
        );
    }

    #[test]
    fn messages_url_includes_account() {
        let gateway = TwilioGateway::new(TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "token".into(),
            from_number: "+15550000000".into(),
            api_base: Url::parse("https://api.twilio.com/").unwrap(),
            redirect_to: None,
        });
        assert_eq!(
            gateway.messages_url().unwrap().as_str(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected() {
        let gateway = RecordingSmsGateway::new();
        assert!(matches!(gateway.send("", "hi").await, Err(SmsError::NoRecipient)));
        assert!(gateway.sent().is_empty());
    }
}
