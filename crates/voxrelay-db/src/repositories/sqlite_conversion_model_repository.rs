//! `SQLite` implementation of the `ConversionModelRepository` trait.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use voxrelay_core::{ConversionModel, ConversionModelId, ConversionModelRepository, RepositoryError};

use super::row_mappers::{
    get_timestamp, map_column_error, map_insert_error, map_storage_error, to_millis, to_sql_u64,
};

const MODEL_COLUMNS: &str = "id, display_name, weights_path, index_path, size_bytes, created_at";

pub struct SqliteConversionModelRepository {
    pool: SqlitePool,
}

impl SqliteConversionModelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<ConversionModel>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MODEL_COLUMNS} FROM conversion_models WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;
        row.as_ref().map(row_to_model).transpose()
    }
}

#[async_trait]
impl ConversionModelRepository for SqliteConversionModelRepository {
    async fn insert(&self, model: &ConversionModel) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversion_models (id, display_name, weights_path, index_path, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(model.id.as_str())
        .bind(&model.display_name)
        .bind(model.weights_path.to_string_lossy().into_owned())
        .bind(model.index_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(to_sql_u64(model.size_bytes))
        .bind(to_millis(model.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(&format!("conversion model '{}'", model.display_name), e))?;
        Ok(())
    }

    async fn get(&self, id: &ConversionModelId) -> Result<ConversionModel, RepositoryError> {
        self.fetch_where("id", id.as_str())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversion model {id}")))
    }

    async fn get_by_name(&self, display_name: &str) -> Result<ConversionModel, RepositoryError> {
        self.fetch_where("display_name", display_name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversion model '{display_name}'")))
    }

    async fn list(&self) -> Result<Vec<ConversionModel>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MODEL_COLUMNS} FROM conversion_models ORDER BY display_name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;
        rows.iter().map(row_to_model).collect()
    }

    async fn delete(&self, id: &ConversionModelId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM conversion_models WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_storage_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("conversion model {id}")));
        }
        Ok(())
    }
}

fn row_to_model(row: &SqliteRow) -> Result<ConversionModel, RepositoryError> {
    let id: String = row.try_get("id").map_err(map_column_error)?;
    let weights_path: String = row.try_get("weights_path").map_err(map_column_error)?;
    let index_path: Option<String> = row.try_get("index_path").map_err(map_column_error)?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(map_column_error)?;

    Ok(ConversionModel {
        id: ConversionModelId::new(id),
        display_name: row.try_get("display_name").map_err(map_column_error)?,
        weights_path: weights_path.into(),
        index_path: index_path.map(Into::into),
        size_bytes: u64::try_from(size_bytes).unwrap_or_default(),
        created_at: get_timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use chrono::Utc;

    fn model(id: &str, name: &str) -> ConversionModel {
        ConversionModel {
            id: ConversionModelId::new(id),
            display_name: name.to_string(),
            weights_path: format!("/models/{id}/weights.pth").into(),
            index_path: None,
            size_bytes: 1024,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let repo = SqliteConversionModelRepository::new(setup_test_database().await.unwrap());
        repo.insert(&model("0123456789abcdef", "alice")).await.unwrap();

        let by_id = repo.get(&ConversionModelId::new("0123456789abcdef")).await.unwrap();
        assert_eq!(by_id.display_name, "alice");
        let by_name = repo.get_by_name("alice").await.unwrap();
        assert_eq!(by_name.id, by_id.id);

        repo.delete(&by_id.id).await.unwrap();
        assert!(matches!(
            repo.delete(&by_id.id).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_display_name_unique() {
        let repo = SqliteConversionModelRepository::new(setup_test_database().await.unwrap());
        repo.insert(&model("0123456789abcdef", "alice")).await.unwrap();

        assert!(matches!(
            repo.insert(&model("fedcba9876543210", "alice")).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
