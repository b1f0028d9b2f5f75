//! PostgreSQL user store.
//!
//! Users live in `users`, session records in `auth_tokens`. Ids are UUIDs in
//! the database and strings everywhere else; an id that isn't a UUID simply
//! matches no row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{MfaEnrollment, NewUser, StoreError, UserStore};
use crate::models::user::{AuthTokenRecord, MfaMethod, User};

const USER_COLUMNS: &str = "id, email, name, password_hash, mfa_method, mfa_secret, \
     mfa_phone_number, mfa_backup_codes, temp_token_id, access_token_id, access_confirmed_at, \
     login_attempts, last_login_attempt_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    password_hash: Option<String>,
    mfa_method: String,
    mfa_secret: Option<String>,
    mfa_phone_number: Option<String>,
    mfa_backup_codes: Vec<String>,
    temp_token_id: Option<String>,
    access_token_id: Option<String>,
    access_confirmed_at: Option<DateTime<Utc>>,
    login_attempts: i32,
    last_login_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, auth_tokens: Vec<AuthTokenRecord>) -> Result<User, StoreError> {
        let mfa_method = self
            .mfa_method
            .parse::<MfaMethod>()
            .map_err(StoreError::Corrupt)?;
        Ok(User {
            id: self.id.to_string(),
            email: self.email,
            name: self.name,
            password_hash: self.password_hash,
            mfa_method,
            mfa_secret: self.mfa_secret,
            mfa_phone_number: self.mfa_phone_number,
            mfa_backup_codes: self.mfa_backup_codes,
            temp_token_id: self.temp_token_id,
            access_token_id: self.access_token_id,
            access_confirmed_at: self.access_confirmed_at,
            login_attempts: self.login_attempts,
            last_login_attempt_at: self.last_login_attempt_at,
            auth_tokens,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    jti: String,
    ip: Option<String>,
    user_agent: Option<String>,
    country: Option<String>,
    expires_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl From<TokenRow> for AuthTokenRecord {
    fn from(row: TokenRow) -> Self {
        Self {
            jti: row.jti,
            ip: row.ip,
            user_agent: row.user_agent,
            country: row.country,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// `UserStore` over a Postgres pool.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_tokens(&self, id: Uuid) -> Result<Vec<AuthTokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT jti, ip, user_agent, country, expires_at, last_used_at \
             FROM auth_tokens WHERE user_id = $1 ORDER BY last_used_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuthTokenRecord::from).collect())
    }

    async fn hydrate(&self, row: Option<UserRow>) -> Result<Option<User>, StoreError> {
        match row {
            Some(row) => {
                let tokens = self.load_tokens(row.id).await?;
                Ok(Some(row.into_user(tokens)?))
            }
            None => Ok(None),
        }
    }

    async fn execute(&self, sql: &str, id: &str) -> Result<u64, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(0);
        };
        let done = sqlx::query(sql).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}

fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let duplicate = e
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation());
                if duplicate {
                    StoreError::DuplicateEmail(new.email.clone())
                } else {
                    StoreError::Db(e)
                }
            })?;
        row.into_user(Vec::new())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn record_login_attempt(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        // `previous` locks the row; the UPDATE shares its snapshot, so the
        // outer SELECT sees the pre-increment values.
        let sql = format!(
            "WITH previous AS ( \
                 SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE \
             ), bumped AS ( \
                 UPDATE users SET login_attempts = users.login_attempts + 1, \
                     last_login_attempt_at = $2, updated_at = now() \
                 FROM previous WHERE users.id = previous.id \
                 RETURNING users.id \
             ) \
             SELECT previous.* FROM previous JOIN bumped ON bumped.id = previous.id"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn reset_login_attempts(&self, id: &str) -> Result<(), StoreError> {
        self.execute(
            "UPDATE users SET login_attempts = 0, updated_at = now() WHERE id = $1",
            id,
        )
        .await?;
        Ok(())
    }

    async fn set_temp_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let done = sqlx::query(
            "UPDATE users SET temp_token_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(jti)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn set_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let done = sqlx::query(
            "UPDATE users SET access_token_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(jti)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn consume_access_token_id(&self, id: &str, jti: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let done = sqlx::query(
            "UPDATE users SET access_token_id = NULL, updated_at = now() \
             WHERE id = $1 AND access_token_id = $2",
        )
        .bind(id)
        .bind(jti)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn confirm_access(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query("UPDATE users SET access_confirmed_at = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_password_hash(&self, id: &str, hash: &str) -> Result<(), StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_mfa(&self, id: &str, enrollment: &MfaEnrollment) -> Result<(), StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET mfa_method = $2, mfa_secret = $3, mfa_phone_number = $4, \
             mfa_backup_codes = $5, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(enrollment.method.as_str())
        .bind(&enrollment.secret)
        .bind(&enrollment.phone_number)
        .bind(&enrollment.backup_codes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_backup_code(&self, id: &str, code: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let done = sqlx::query(
            "UPDATE users SET mfa_backup_codes = array_remove(mfa_backup_codes, $2), \
             updated_at = now() WHERE id = $1 AND $2 = ANY(mfa_backup_codes)",
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn add_auth_token(&self, id: &str, record: AuthTokenRecord) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let done = sqlx::query(
            "INSERT INTO auth_tokens (user_id, jti, ip, user_agent, country, expires_at, last_used_at) \
             SELECT id, $2, $3, $4, $5, $6, $7 FROM users WHERE id = $1 \
             ON CONFLICT (user_id, jti) DO UPDATE SET ip = EXCLUDED.ip, \
                 user_agent = EXCLUDED.user_agent, country = EXCLUDED.country, \
                 expires_at = EXCLUDED.expires_at, last_used_at = EXCLUDED.last_used_at",
        )
        .bind(id)
        .bind(&record.jti)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(&record.country)
        .bind(record.expires_at)
        .bind(record.last_used_at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn touch_auth_token(
        &self,
        id: &str,
        jti: &str,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE auth_tokens SET ip = $3, last_used_at = $4 WHERE user_id = $1 AND jti = $2",
        )
        .bind(id)
        .bind(jti)
        .bind(ip)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_auth_token(&self, id: &str, jti: &str) -> Result<(), StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND jti = $2")
            .bind(id)
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_auth_tokens(&self, id: &str, keep: Option<&str>) -> Result<u64, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(0);
        };
        let done = sqlx::query(
            "DELETE FROM auth_tokens WHERE user_id = $1 AND ($2::text IS NULL OR jti <> $2)",
        )
        .bind(id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    async fn remove_expired_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(0);
        };
        let done = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND expires_at <= $2")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
