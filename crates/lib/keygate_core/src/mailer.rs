//! Templated account notifications.
//!
//! Mail is described by a template name plus parameters; rendering and
//! delivery belong to whatever `Mailer` is plugged in.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail delivery failed: {0}")]
    Delivery(String),
}

/// A templated message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub params: serde_json::Value,
}

impl Mail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            template: template.into(),
            params: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.params {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Logs mail instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            template = %mail.template,
            params = %mail.params,
            "mail sent (log only)"
        );
        Ok(())
    }
}

/// Keeps every message; used by tests.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|e| MailError::Delivery(e.to_string()))?
            .push(mail.clone());
        Ok(())
    }
}
