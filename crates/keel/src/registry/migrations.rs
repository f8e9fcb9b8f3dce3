//! Registry schema migrations.

use keel_common::{KeelError, KeelResult};
use sqlx::SqlitePool;
use tracing::{info, instrument};

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Bring the database schema up to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`KeelError::Registry`] if a statement fails.
#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> KeelResult<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(migration_error)?;

    let current: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(migration_error)?;
    let current = current.unwrap_or(0);

    if current >= SCHEMA_VERSION {
        info!(version = current, "Registry schema is up to date");
        return Ok(());
    }

    info!(from = current, to = SCHEMA_VERSION, "Migrating registry schema");

    if current < 1 {
        migrate_to_v1(pool).await?;
    }

    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> KeelResult<()> {
    let mut tx = pool.begin().await.map_err(migration_error)?;

    // `id` records insertion order; `created_at` is fixed-width RFC 3339 so it sorts as text.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS volumes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            host_path TEXT NOT NULL,
            backend TEXT NOT NULL,
            config TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_error)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_volumes_created_at ON volumes(created_at, id)")
        .execute(&mut *tx)
        .await
        .map_err(migration_error)?;

    set_version(&mut tx, 1).await?;
    tx.commit().await.map_err(migration_error)?;

    info!("Migration to schema version 1 complete");
    Ok(())
}

async fn set_version(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, version: i64) -> KeelResult<()> {
    sqlx::query("DELETE FROM schema_version")
        .execute(&mut **tx)
        .await
        .map_err(migration_error)?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut **tx)
        .await
        .map_err(migration_error)?;
    Ok(())
}

fn migration_error(e: sqlx::Error) -> KeelError {
    KeelError::Registry {
        message: format!("migration failed: {e}"),
    }
}
