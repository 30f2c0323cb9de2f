//! Voice profile store port.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::VoiceProfile;

#[async_trait]
pub trait VoiceProfileRepository: Send + Sync {
    /// Returns `Err(RepositoryError::AlreadyExists)` if the name is taken.
    async fn insert(&self, profile: &VoiceProfile) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<VoiceProfile, RepositoryError>;

    async fn list(&self) -> Result<Vec<VoiceProfile>, RepositoryError>;

    /// Returns `false` if no such profile existed.
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
}
