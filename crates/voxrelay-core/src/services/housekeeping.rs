//! Housekeeping - TTL sweeps and stuck-job reporting.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{Job, JobFilter, JobStatus};
use crate::ports::{CoreError, JobRepository, QualityProfileRepository, ResultStore};

/// Outcome of one housekeeping pass.
#[derive(Debug, Clone, Default)]
pub struct HousekeepingReport {
    pub purged_jobs: u64,
    /// Stored audio files removed along with purged jobs.
    pub purged_results: u64,
    pub purged_profiles: u64,
    /// RUNNING jobs that have not moved for longer than the ceiling.
    /// They are reported, never failed.
    pub stuck_jobs: Vec<Job>,
}

pub struct HousekeepingService {
    jobs: Arc<dyn JobRepository>,
    profiles: Arc<dyn QualityProfileRepository>,
    results: Arc<dyn ResultStore>,
    stuck_after: TimeDelta,
}

impl HousekeepingService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        profiles: Arc<dyn QualityProfileRepository>,
        results: Arc<dyn ResultStore>,
        stuck_after: TimeDelta,
    ) -> Self {
        Self {
            jobs,
            profiles,
            results,
            stuck_after,
        }
    }

    pub async fn run_once(&self) -> Result<HousekeepingReport, CoreError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<HousekeepingReport, CoreError> {
        let purged_ids = self.jobs.purge_expired(now).await?;
        let mut purged_results = 0;
        for id in &purged_ids {
            match self.results.remove(id).await {
                Ok(true) => purged_results += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to remove result of purged job"),
            }
        }
        let purged_jobs = purged_ids.len() as u64;
        let purged_profiles = self.profiles.purge_expired(now).await?;

        let filter = JobFilter {
            status: Some(JobStatus::Running),
            updated_before: Some(now - self.stuck_after),
            ..JobFilter::default()
        };
        let stuck_jobs = self.jobs.list(&filter).await?;
        for job in &stuck_jobs {
            tracing::warn!(
                job_id = %job.id,
                backend_id = %job.backend_id,
                started_at = ?job.started_at,
                "Job has been RUNNING longer than the stuck ceiling"
            );
        }

        tracing::info!(
            purged_jobs,
            purged_results,
            purged_profiles,
            stuck = stuck_jobs.len(),
            "Housekeeping pass complete"
        );
        Ok(HousekeepingReport {
            purged_jobs,
            purged_results,
            purged_profiles,
            stuck_jobs,
        })
    }
}
