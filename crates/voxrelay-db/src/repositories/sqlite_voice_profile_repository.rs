//! `SQLite` implementation of the `VoiceProfileRepository` trait.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use voxrelay_core::{RepositoryError, VoiceProfile, VoiceProfileRepository};

use super::row_mappers::{
    get_timestamp, map_column_error, map_insert_error, map_storage_error, to_millis,
};

const VOICE_COLUMNS: &str = "id, name, reference_audio, reference_text, language, created_at";

pub struct SqliteVoiceProfileRepository {
    pool: SqlitePool,
}

impl SqliteVoiceProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoiceProfileRepository for SqliteVoiceProfileRepository {
    async fn insert(&self, profile: &VoiceProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO voice_profiles (id, name, reference_audio, reference_text, language, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(profile.reference_audio.to_string_lossy().into_owned())
        .bind(&profile.reference_text)
        .bind(&profile.language)
        .bind(to_millis(profile.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(&format!("voice profile '{}'", profile.name), e))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<VoiceProfile, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {VOICE_COLUMNS} FROM voice_profiles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        match row {
            Some(row) => row_to_voice(&row),
            None => Err(RepositoryError::NotFound(format!("voice profile {id}"))),
        }
    }

    async fn list(&self) -> Result<Vec<VoiceProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {VOICE_COLUMNS} FROM voice_profiles ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;
        rows.iter().map(row_to_voice).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM voice_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_storage_error)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_voice(row: &SqliteRow) -> Result<VoiceProfile, RepositoryError> {
    let reference_audio: String = row.try_get("reference_audio").map_err(map_column_error)?;
    Ok(VoiceProfile {
        id: row.try_get("id").map_err(map_column_error)?,
        name: row.try_get("name").map_err(map_column_error)?,
        reference_audio: reference_audio.into(),
        reference_text: row.try_get("reference_text").map_err(map_column_error)?,
        language: row.try_get("language").map_err(map_column_error)?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;

    #[tokio::test]
    async fn test_voice_profile_crud() {
        let repo = SqliteVoiceProfileRepository::new(setup_test_database().await.unwrap());
        let profile = VoiceProfile::new("narrator", "/voices/narrator.wav")
            .with_reference_text("The quick brown fox.")
            .with_language("en");
        repo.insert(&profile).await.unwrap();

        let fetched = repo.get(&profile.id).await.unwrap();
        assert_eq!(fetched.name, "narrator");
        assert_eq!(fetched.reference_text.as_deref(), Some("The quick brown fox."));

        let duplicate = VoiceProfile::new("narrator", "/voices/other.wav");
        assert!(matches!(
            repo.insert(&duplicate).await,
            Err(RepositoryError::AlreadyExists(_))
        ));

        assert!(repo.delete(&profile.id).await.unwrap());
        assert!(matches!(
            repo.get(&profile.id).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
