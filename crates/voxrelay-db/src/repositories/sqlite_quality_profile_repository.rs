//! `SQLite` implementation of the `QualityProfileRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use voxrelay_core::{ParamMap, QualityProfile, QualityProfileRepository, RepositoryError};

use super::row_mappers::{
    get_opt_timestamp, get_timestamp, map_column_error, map_storage_error, to_millis,
};

const PROFILE_COLUMNS: &str = "backend_id, name, params, is_default, created_at, expires_at";

pub struct SqliteQualityProfileRepository {
    pool: SqlitePool,
}

impl SqliteQualityProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QualityProfileRepository for SqliteQualityProfileRepository {
    async fn upsert(&self, profile: &QualityProfile) -> Result<QualityProfile, RepositoryError> {
        let params = serde_json::to_string(&profile.params)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(map_storage_error)?;

        if profile.is_default {
            sqlx::query(
                "UPDATE quality_profiles SET is_default = 0 WHERE backend_id = ? AND name <> ? AND is_default = 1",
            )
            .bind(&profile.backend_id)
            .bind(&profile.name)
            .execute(&mut *tx)
            .await
            .map_err(map_storage_error)?;
        }

        sqlx::query(
            r#"
            INSERT INTO quality_profiles (backend_id, name, params, is_default, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(backend_id, name) DO UPDATE SET
                params = excluded.params,
                is_default = excluded.is_default,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&profile.backend_id)
        .bind(&profile.name)
        .bind(&params)
        .bind(profile.is_default)
        .bind(to_millis(profile.created_at))
        .bind(profile.expires_at.map(to_millis))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e
                && db.is_unique_violation()
            {
                return RepositoryError::Constraint(format!(
                    "backend '{}' already has a default profile",
                    profile.backend_id
                ));
            }
            map_storage_error(e)
        })?;

        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM quality_profiles WHERE backend_id = ? AND name = ?"
        ))
        .bind(&profile.backend_id)
        .bind(&profile.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_storage_error)?;
        let stored = row_to_profile(&row)?;

        tx.commit().await.map_err(map_storage_error)?;
        Ok(stored)
    }

    async fn get(
        &self,
        backend_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<QualityProfile, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PROFILE_COLUMNS} FROM quality_profiles
            WHERE backend_id = ? AND name = ? AND (expires_at IS NULL OR expires_at > ?)
            "#
        ))
        .bind(backend_id)
        .bind(name)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        match row {
            Some(row) => row_to_profile(&row),
            None => Err(RepositoryError::NotFound(format!(
                "quality profile '{name}' for backend '{backend_id}'"
            ))),
        }
    }

    async fn get_default(
        &self,
        backend_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QualityProfile>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PROFILE_COLUMNS} FROM quality_profiles
            WHERE backend_id = ? AND is_default = 1 AND (expires_at IS NULL OR expires_at > ?)
            "#
        ))
        .bind(backend_id)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn list(&self, backend_id: Option<&str>) -> Result<Vec<QualityProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PROFILE_COLUMNS} FROM quality_profiles
            WHERE ?1 IS NULL OR backend_id = ?1
            ORDER BY backend_id, name
            "#
        ))
        .bind(backend_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;

        rows.iter().map(row_to_profile).collect()
    }

    async fn delete(&self, backend_id: &str, name: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM quality_profiles WHERE backend_id = ? AND name = ?")
            .bind(backend_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM quality_profiles WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(result.rows_affected())
    }
}

fn row_to_profile(row: &SqliteRow) -> Result<QualityProfile, RepositoryError> {
    let params_json: String = row.try_get("params").map_err(map_column_error)?;
    let params: ParamMap = serde_json::from_str(&params_json)
        .map_err(|e| RepositoryError::Serialization(format!("params: {e}")))?;

    Ok(QualityProfile {
        name: row.try_get("name").map_err(map_column_error)?,
        backend_id: row.try_get("backend_id").map_err(map_column_error)?,
        params,
        is_default: row.try_get("is_default").map_err(map_column_error)?,
        created_at: get_timestamp(row, "created_at")?,
        expires_at: get_opt_timestamp(row, "expires_at")?,
    })
}
