//! Voice profile service.

use std::sync::Arc;

use crate::domain::VoiceProfile;
use crate::ports::{CoreError, RepositoryError, VoiceProfileRepository};

pub struct VoiceProfileService {
    repo: Arc<dyn VoiceProfileRepository>,
}

impl VoiceProfileService {
    pub fn new(repo: Arc<dyn VoiceProfileRepository>) -> Self {
        Self { repo }
    }

    /// Register a voice. The reference recording must exist and be non-empty.
    pub async fn add(&self, profile: VoiceProfile) -> Result<VoiceProfile, CoreError> {
        if profile.name.trim().is_empty() {
            return Err(CoreError::Validation("voice name cannot be empty".into()));
        }
        let metadata = tokio::fs::metadata(&profile.reference_audio)
            .await
            .map_err(|e| {
                CoreError::Validation(format!(
                    "reference audio {} is not readable: {e}",
                    profile.reference_audio.display()
                ))
            })?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(CoreError::Validation(format!(
                "reference audio {} is empty or not a file",
                profile.reference_audio.display()
            )));
        }
        self.repo.insert(&profile).await?;
        tracing::info!(voice_id = %profile.id, name = %profile.name, "Voice profile added");
        Ok(profile)
    }

    /// `None` if no such profile exists.
    pub async fn get(&self, id: &str) -> Result<Option<VoiceProfile>, CoreError> {
        match self.repo.get(id).await {
            Ok(profile) => Ok(Some(profile)),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<VoiceProfile>, CoreError> {
        self.repo.list().await.map_err(CoreError::from)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, CoreError> {
        self.repo.delete(id).await.map_err(CoreError::from)
    }
}
