//! Database setup and initialization.
//!
//! Entry points call [`setup_database`] with the resolved database path.
//! Several worker processes may open the same file, so connections use WAL
//! journaling and a busy timeout.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Open (creating if needed) the `SQLite` database and ensure the schema exists.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or created, or if schema
/// creation fails.
///
/// # Example
///
/// ```rust,no_run
/// use voxrelay_db::setup_database;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = setup_database(Path::new("/var/lib/voxrelay/voxrelay.db")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePoolOptions::new()
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT),
        )
        .await?;

    create_schema(&pool).await?;
    tracing::debug!(path = %db_path.display(), "Database ready");

    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// The pool holds exactly one connection that is never recycled, because
/// every in-memory connection is its own database.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times as all operations use IF NOT EXISTS.
/// Timestamps are stored as INTEGER milliseconds since the Unix epoch.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('queued', 'running', 'completed', 'failed', 'cancelled')),
            text TEXT NOT NULL,
            source_language TEXT,
            target_language TEXT,
            backend_id TEXT NOT NULL,
            quality_profile TEXT,
            voice_profile_id TEXT,
            enable_conversion INTEGER NOT NULL DEFAULT 0,
            conversion_model_id TEXT,
            conversion_params TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            updated_at INTEGER NOT NULL,
            expires_at INTEGER,
            result_ref TEXT,
            duration_seconds REAL,
            error_kind TEXT,
            error_message TEXT,
            conversion_applied INTEGER NOT NULL DEFAULT 0,
            conversion_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Queue recovery and stuck-job scans filter on status and age
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_expires_at ON jobs(expires_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quality_profiles (
            backend_id TEXT NOT NULL,
            name TEXT NOT NULL,
            params TEXT NOT NULL DEFAULT '{}',
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            PRIMARY KEY (backend_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one default profile per backend
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_quality_profiles_default
        ON quality_profiles(backend_id) WHERE is_default = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversion_models (
            id TEXT PRIMARY KEY NOT NULL,
            display_name TEXT NOT NULL UNIQUE,
            weights_path TEXT NOT NULL,
            index_path TEXT,
            size_bytes INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_profiles (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL UNIQUE,
            reference_audio TEXT NOT NULL,
            reference_text TEXT,
            language TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = setup_test_database().await.unwrap();
        create_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            ["conversion_models", "jobs", "quality_profiles", "voice_profiles"]
        );
    }

    #[tokio::test]
    async fn test_setup_database_creates_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("voxrelay.db");

        let pool = setup_database(&path).await.unwrap();
        pool.close().await;

        assert!(path.exists());
    }
}
