//! Database migration support.
//!
//! Embeds and runs the SQL migrations in `keygate_core/migrations/`
//! (users, session records, audit entries).

use sqlx::PgPool;
use tracing::info;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    info!(count = migrator.iter().count(), "applying migrations");
    migrator.run(pool).await
}
