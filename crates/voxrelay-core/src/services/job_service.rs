//! Job service - the submission boundary of the job store.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Job, JobFilter, JobId, JobPatch, JobSpec, JobStatus};
use crate::ports::{CoreError, JobRepository, RepositoryError, ResultStore};

/// Creates, inspects and removes jobs.
///
/// Execution-side transitions belong to the dispatch bridge; the only
/// transition available here is cancelling a job that has not started.
pub struct JobService {
    repo: Arc<dyn JobRepository>,
    results: Arc<dyn ResultStore>,
}

impl JobService {
    pub fn new(repo: Arc<dyn JobRepository>, results: Arc<dyn ResultStore>) -> Self {
        Self { repo, results }
    }

    /// Validate and persist a new QUEUED job.
    ///
    /// Invalid input is rejected here and never reaches the store.
    pub async fn create(&self, spec: JobSpec) -> Result<Job, CoreError> {
        spec.validate()?;
        let job = Job::queued(JobId::generate(), spec, Utc::now());
        let job = self.repo.insert(&job).await?;
        tracing::info!(
            job_id = %job.id,
            backend_id = %job.backend_id,
            mode = %job.mode,
            conversion = job.enable_conversion,
            "Job queued"
        );
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Result<Job, CoreError> {
        match self.repo.get(id).await {
            Ok(job) => Ok(job),
            Err(RepositoryError::NotFound(_)) => Err(CoreError::NotFound(format!("job {id}"))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, CoreError> {
        self.repo.list(filter).await.map_err(CoreError::from)
    }

    /// Delete a job and its stored audio regardless of status.
    /// Returns `false` if the job did not exist.
    pub async fn delete(&self, id: &JobId) -> Result<bool, CoreError> {
        let deleted = self.repo.delete(id).await?;
        if deleted {
            if let Err(e) = self.results.remove(id).await {
                tracing::warn!(job_id = %id, error = %e, "Job deleted but its result was not removed");
            }
            tracing::info!(job_id = %id, "Job deleted");
        }
        Ok(deleted)
    }

    /// Cancel a job that is still QUEUED.
    ///
    /// A job that already started cannot be cancelled; this surfaces as a
    /// repository conflict.
    pub async fn cancel(&self, id: &JobId) -> Result<Job, CoreError> {
        let job = self
            .repo
            .transition(
                id,
                &[JobStatus::Queued],
                JobStatus::Cancelled,
                &JobPatch::cancelled(Utc::now()),
            )
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => CoreError::NotFound(format!("job {id}")),
                other => other.into(),
            })?;
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(job)
    }
}
