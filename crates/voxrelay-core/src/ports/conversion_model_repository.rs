//! Conversion model metadata port.
//!
//! Only metadata lives here; the files themselves are managed by
//! `ConversionModelStore`.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{ConversionModel, ConversionModelId};

#[async_trait]
pub trait ConversionModelRepository: Send + Sync {
    /// Publish a model record.
    ///
    /// Returns `Err(RepositoryError::AlreadyExists)` if the identifier or
    /// the display name is taken.
    async fn insert(&self, model: &ConversionModel) -> Result<(), RepositoryError>;

    async fn get(&self, id: &ConversionModelId) -> Result<ConversionModel, RepositoryError>;

    async fn get_by_name(&self, display_name: &str) -> Result<ConversionModel, RepositoryError>;

    async fn list(&self) -> Result<Vec<ConversionModel>, RepositoryError>;

    /// Returns `Err(RepositoryError::NotFound)` if the model doesn't exist.
    async fn delete(&self, id: &ConversionModelId) -> Result<(), RepositoryError>;
}
