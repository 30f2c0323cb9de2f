//! Durable storage for produced audio.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{AudioArtifact, JobId};

/// Where finished audio is written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store the artifact for a job and return its location.
    ///
    /// Writing the same job twice replaces the earlier artifact.
    async fn put(&self, job_id: &JobId, audio: &AudioArtifact) -> Result<String, RepositoryError>;

    /// Delete the artifact for a job. Returns `false` if there was none.
    async fn remove(&self, job_id: &JobId) -> Result<bool, RepositoryError>;
}
