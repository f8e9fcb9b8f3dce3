//! SQLite-backed registry.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_common::{KeelError, KeelResult, VolumeName};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{info, instrument, warn};

use super::{Registry, migrations};
use crate::volume::{BackendConfig, BackendType, Volume};

const IN_MEMORY: &str = ":memory:";

/// Fixed-width timestamp format so text ordering matches time ordering.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

const SELECT_VOLUMES: &str = "SELECT name, host_path, backend, config, created_at FROM volumes";

/// Registry persisted in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, connection, or migrations fail.
    #[instrument]
    pub async fn open(path: &Path) -> KeelResult<Self> {
        let in_memory = path == Path::new(IN_MEMORY);
        if !in_memory {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&path.to_string_lossy())
            .map_err(registry_error)?
            .create_if_missing(true);

        // Every connection to `:memory:` is a separate database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(registry_error)?;
        migrations::run(&pool).await?;

        info!(path = %path.display(), "Registry opened");
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn in_memory() -> KeelResult<Self> {
        Self::open(Path::new(IN_MEMORY)).await
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    #[instrument(skip(self), fields(name = %name))]
    async fn find_by_name(&self, name: &VolumeName) -> KeelResult<Option<Volume>> {
        let row = sqlx::query(&format!("{SELECT_VOLUMES} WHERE name = ?"))
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(registry_error)?;

        row.as_ref().map(row_to_volume).transpose()
    }

    #[instrument(skip(self, volume), fields(name = %volume.name))]
    async fn insert(&self, volume: &Volume) -> KeelResult<()> {
        let config = serde_json::to_string(&volume.config.to_value()?)?;

        let result = sqlx::query(
            r"
            INSERT INTO volumes (name, host_path, backend, config, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(volume.name.as_str())
        .bind(volume.host_path.to_string_lossy().into_owned())
        .bind(volume.backend_type().as_str())
        .bind(config)
        .bind(volume.created_at.format(TIMESTAMP_FORMAT).to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(KeelError::Conflict {
                name: volume.name.to_string(),
            }),
            Err(e) => Err(registry_error(e)),
        }
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn delete(&self, name: &VolumeName) -> KeelResult<()> {
        let result = sqlx::query("DELETE FROM volumes WHERE name = ?")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(registry_error)?;

        if result.rows_affected() == 0 {
            return Err(KeelError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> KeelResult<Vec<Volume>> {
        let rows = sqlx::query(&format!("{SELECT_VOLUMES} ORDER BY created_at ASC, id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(registry_error)?;

        Ok(rows
            .iter()
            .filter_map(|row| match row_to_volume(row) {
                Ok(volume) => Some(volume),
                Err(e) => {
                    let name: Option<String> = row.try_get("name").ok();
                    warn!(name = ?name, error = %e, "Skipping unreadable volume row");
                    None
                }
            })
            .collect())
    }
}

fn row_to_volume(row: &SqliteRow) -> KeelResult<Volume> {
    let name: String = row.try_get("name").map_err(registry_error)?;
    let host_path: String = row.try_get("host_path").map_err(registry_error)?;
    let backend: String = row.try_get("backend").map_err(registry_error)?;
    let config: String = row.try_get("config").map_err(registry_error)?;
    let created_at: String = row.try_get("created_at").map_err(registry_error)?;

    let corrupt = |what: &str, detail: String| KeelError::Internal {
        message: format!("volume '{name}' has an unreadable {what}: {detail}"),
    };

    let backend: BackendType = backend
        .parse()
        .map_err(|e: KeelError| corrupt("backend", e.to_string()))?;
    let config: serde_json::Value =
        serde_json::from_str(&config).map_err(|e| corrupt("config", e.to_string()))?;
    let config = BackendConfig::decode(backend, Some(&config))
        .map_err(|e| corrupt("config", e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| corrupt("creation time", e.to_string()))?
        .with_timezone(&Utc);
    let name = VolumeName::new(name.clone()).map_err(|e| corrupt("name", e.to_string()))?;

    Ok(Volume {
        name,
        host_path: PathBuf::from(host_path),
        config,
        created_at,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn registry_error(e: sqlx::Error) -> KeelError {
    KeelError::Registry {
        message: e.to_string(),
    }
}
