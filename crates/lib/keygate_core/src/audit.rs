//! Audit trail for security-relevant events.
//!
//! Every entry is emitted on the `audit` tracing target and appended to an
//! `AuditLog`. Append failures are logged but never fail the request that
//! triggered them.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::auth::ClientInfo;
use crate::models::user::User;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Audit log unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    #[default]
    Default,
    Security,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Default => "default",
            AuditCategory::Security => "security",
        }
    }
}

/// One audited event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub activity: String,
    pub category: AuditCategory,
    pub actor_id: Option<String>,
    pub object_id: Option<String>,
    pub object_type: Option<String>,
    pub request_method: Option<String>,
    pub request_path: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(activity: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            activity: activity.into(),
            category: AuditCategory::Default,
            actor_id: None,
            object_id: None,
            object_type: None,
            request_method: None,
            request_path: None,
            ip: None,
            created_at: Utc::now(),
        }
    }

    pub fn security(mut self) -> Self {
        self.category = AuditCategory::Security;
        self
    }

    /// Mark `user` as both the actor and the object of the event.
    pub fn user(mut self, user: &User) -> Self {
        self.actor_id = Some(user.id.clone());
        self.object_id = Some(user.id.clone());
        self.object_type = Some("User".into());
        self
    }

    pub fn client(mut self, client: &ClientInfo) -> Self {
        self.request_method = client.method.clone();
        self.request_path = client.path.clone();
        self.ip = client.ip.clone();
        self
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Trace `entry` and append it, logging rather than returning failures.
pub async fn record(log: &dyn AuditLog, entry: AuditEntry) {
    info!(
        target: "audit",
        activity = %entry.activity,
        category = entry.category.as_str(),
        actor = entry.actor_id.as_deref().unwrap_or("-"),
        ip = entry.ip.as_deref().unwrap_or("-"),
        "audit"
    );
    if let Err(e) = log.append(&entry).await {
        warn!("failed to record audit entry '{}': {e}", entry.activity);
    }
}

/// Appends to the `audit_entries` table.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_entries (id, activity, category, actor_id, object_id, object_type, \
             request_method, request_path, ip, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(&entry.activity)
        .bind(entry.category.as_str())
        .bind(&entry.actor_id)
        .bind(&entry.object_id)
        .bind(&entry.object_type)
        .bind(&entry.request_method)
        .bind(&entry.request_path)
        .bind(&entry.ip)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Keeps entries in memory; used in tests and database-less runs.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn activities(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.activity).collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|e| AuditError::Unavailable(e.to_string()))?
            .push(entry.clone());
        Ok(())
    }
}
