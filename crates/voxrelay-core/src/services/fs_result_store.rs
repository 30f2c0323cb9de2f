//! Filesystem storage for finished audio.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{AudioArtifact, JobId};
use crate::ports::{RepositoryError, ResultStore};

/// Writes `<root>/<job_id>.wav`, replacing any earlier artifact atomically.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.root.join(format!("{job_id}.wav"))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put(&self, job_id: &JobId, audio: &AudioArtifact) -> Result<String, RepositoryError> {
        let storage = |action: &str, e: std::io::Error| {
            RepositoryError::Storage(format!("failed to {action} result for job {job_id}: {e}"))
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage("prepare directory for", e))?;

        let target = self.path_for(job_id);
        let staging = self.root.join(format!(".{job_id}.wav.tmp"));
        tokio::fs::write(&staging, &audio.bytes)
            .await
            .map_err(|e| storage("write", e))?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staged result");
            }
            return Err(storage("publish", e));
        }

        tracing::debug!(job_id = %job_id, path = %target.display(), bytes = audio.bytes.len(), "Stored result");
        Ok(target.display().to_string())
    }

    async fn remove(&self, job_id: &JobId) -> Result<bool, RepositoryError> {
        let target = self.path_for(job_id);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, path = %target.display(), "Removed result");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RepositoryError::Storage(format!(
                "failed to remove result for job {job_id}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_writes_wav_named_after_job() {
        let dir = TempDir::new().unwrap();
        let store = FsResultStore::new(dir.path().join("results"));
        let job_id = JobId::from("job-1");

        let location = store
            .put(&job_id, &AudioArtifact::new(b"RIFF....".to_vec(), 1.0))
            .await
            .unwrap();

        assert_eq!(PathBuf::from(&location), store.path_for(&job_id));
        assert_eq!(std::fs::read(&location).unwrap(), b"RIFF....");
    }

    #[tokio::test]
    async fn test_put_replaces_previous_artifact_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = FsResultStore::new(dir.path());
        let job_id = JobId::from("job-2");

        store.put(&job_id, &AudioArtifact::new(vec![1, 2, 3], 0.1)).await.unwrap();
        let location = store.put(&job_id, &AudioArtifact::new(vec![9], 0.1)).await.unwrap();

        assert_eq!(std::fs::read(location).unwrap(), vec![9]);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_artifact_once() {
        let dir = TempDir::new().unwrap();
        let store = FsResultStore::new(dir.path());
        let job_id = JobId::from("job-3");
        let location = store.put(&job_id, &AudioArtifact::new(vec![1], 0.1)).await.unwrap();

        assert!(store.remove(&job_id).await.unwrap());
        assert!(!PathBuf::from(location).exists());
        assert!(!store.remove(&job_id).await.unwrap());
    }
}
