//! `SQLite` implementation of the `JobRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use voxrelay_core::domain::{ErrorKind, JobFailure, JobMode};
use voxrelay_core::ports::check_transition;
use voxrelay_core::{
    ConversionParams, Job, JobFilter, JobId, JobPatch, JobRepository, JobStatus, RepositoryError,
};

use super::row_mappers::{
    get_opt_timestamp, get_timestamp, map_column_error, map_insert_error, map_storage_error,
    to_millis,
};

/// Shared SELECT column list for job queries.
const JOB_COLUMNS: &str = "id, mode, status, text, source_language, target_language, backend_id, \
    quality_profile, voice_profile_id, enable_conversion, conversion_model_id, conversion_params, \
    created_at, started_at, completed_at, updated_at, expires_at, result_ref, duration_seconds, \
    error_kind, error_message, conversion_applied, conversion_error";

/// `SQLite` implementation of the `JobRepository` trait.
///
/// Status transitions are a single conditional `UPDATE ... RETURNING`, so
/// they stay atomic across processes sharing the database file.
pub struct SqliteJobRepository {
    pool: SqlitePool,
    ttl: TimeDelta,
}

impl SqliteJobRepository {
    /// `ttl` is added to `updated_at` to compute `expires_at`.
    pub fn new(pool: SqlitePool, ttl: TimeDelta) -> Self {
        Self { pool, ttl }
    }

    fn ttl_millis(&self) -> i64 {
        self.ttl.num_milliseconds()
    }

    /// Fetch a row regardless of expiry.
    async fn fetch(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_storage_error)?;
        row.as_ref().map(row_to_job).transpose()
    }

    /// Explain why a conditional transition matched no row.
    async fn transition_miss(
        &self,
        id: &JobId,
        from: &[JobStatus],
        to: JobStatus,
        now: i64,
    ) -> RepositoryError {
        let current: Result<Option<String>, _> = sqlx::query_scalar(
            "SELECT status FROM jobs WHERE id = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        match current {
            Ok(Some(status)) => {
                let expected: Vec<&str> = from.iter().map(JobStatus::as_str).collect();
                tracing::debug!(
                    job_id = %id,
                    current = %status,
                    target = %to,
                    "Transition conflict"
                );
                RepositoryError::Conflict(format!(
                    "job {id} is {status}, expected one of [{}] for transition to {to}",
                    expected.join(", ")
                ))
            }
            Ok(None) => RepositoryError::NotFound(format!("job {id}")),
            Err(e) => map_storage_error(e),
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<Job, RepositoryError> {
        let params = serde_json::to_string(&job.conversion_params)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let updated_at = to_millis(job.updated_at);

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, mode, status, text, source_language, target_language, backend_id,
                quality_profile, voice_profile_id, enable_conversion, conversion_model_id,
                conversion_params, created_at, started_at, completed_at, updated_at, expires_at,
                result_ref, duration_seconds, error_kind, error_message, conversion_applied,
                conversion_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(&job.text)
        .bind(&job.source_language)
        .bind(&job.target_language)
        .bind(&job.backend_id)
        .bind(&job.quality_profile)
        .bind(&job.voice_profile_id)
        .bind(job.enable_conversion)
        .bind(&job.conversion_model_id)
        .bind(&params)
        .bind(to_millis(job.created_at))
        .bind(job.started_at.map(to_millis))
        .bind(job.completed_at.map(to_millis))
        .bind(updated_at)
        .bind(updated_at.saturating_add(self.ttl_millis()))
        .bind(&job.result_ref)
        .bind(job.duration_seconds)
        .bind(job.error.as_ref().map(|e| e.kind.as_str()))
        .bind(job.error.as_ref().map(|e| e.message.as_str()))
        .bind(job.conversion_applied)
        .bind(&job.conversion_error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(&format!("job {}", job.id), e))?;

        self.fetch(&job.id)
            .await?
            .ok_or_else(|| RepositoryError::Storage(format!("job {} vanished after insert", job.id)))
    }

    async fn get(&self, id: &JobId) -> Result<Job, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND (expires_at IS NULL OR expires_at > ?)"
        ))
        .bind(id.as_str())
        .bind(to_millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(RepositoryError::NotFound(format!("job {id}"))),
        }
    }

    async fn transition(
        &self,
        id: &JobId,
        from: &[JobStatus],
        to: JobStatus,
        patch: &JobPatch,
    ) -> Result<Job, RepositoryError> {
        check_transition(from, to)?;

        let now = to_millis(Utc::now());
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE jobs SET status = ");
        qb.push_bind(to.as_str());
        qb.push(", started_at = COALESCE(")
            .push_bind(patch.started_at.map(to_millis))
            .push(", started_at)");
        qb.push(", completed_at = COALESCE(")
            .push_bind(patch.completed_at.map(to_millis))
            .push(", completed_at)");
        qb.push(", result_ref = COALESCE(")
            .push_bind(patch.result_ref.clone())
            .push(", result_ref)");
        qb.push(", duration_seconds = COALESCE(")
            .push_bind(patch.duration_seconds)
            .push(", duration_seconds)");
        qb.push(", error_kind = COALESCE(")
            .push_bind(patch.error.as_ref().map(|e| e.kind.as_str().to_string()))
            .push(", error_kind)");
        qb.push(", error_message = COALESCE(")
            .push_bind(patch.error.as_ref().map(|e| e.message.clone()))
            .push(", error_message)");
        qb.push(", conversion_applied = COALESCE(")
            .push_bind(patch.conversion_applied)
            .push(", conversion_applied)");
        qb.push(", conversion_error = COALESCE(")
            .push_bind(patch.conversion_error.clone())
            .push(", conversion_error)");
        // Right-hand sides see the old row, so both use the pre-update updated_at.
        qb.push(", updated_at = MAX(updated_at, ")
            .push_bind(now)
            .push(")");
        qb.push(", expires_at = MAX(updated_at, ")
            .push_bind(now)
            .push(") + ")
            .push_bind(self.ttl_millis());
        qb.push(" WHERE id = ").push_bind(id.as_str());
        qb.push(" AND (expires_at IS NULL OR expires_at > ")
            .push_bind(now)
            .push(")");
        qb.push(" AND status IN (");
        let mut statuses = qb.separated(", ");
        for status in from {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");
        qb.push(" RETURNING ").push(JOB_COLUMNS);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_storage_error)?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(self.transition_miss(id, from, to, now).await),
        }
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RepositoryError> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(JOB_COLUMNS)
            .push(" FROM jobs WHERE (expires_at IS NULL OR expires_at > ")
            .push_bind(to_millis(Utc::now()))
            .push(")");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(backend_id) = &filter.backend_id {
            qb.push(" AND backend_id = ").push_bind(backend_id.clone());
        }
        if let Some(before) = filter.updated_before {
            qb.push(" AND updated_at < ").push_bind(to_millis(before));
        }
        qb.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_storage_error)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, RepositoryError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "DELETE FROM jobs WHERE expires_at IS NOT NULL AND expires_at <= ? RETURNING id",
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }
}

/// Convert a database row to a `Job`.
fn row_to_job(row: &SqliteRow) -> Result<Job, RepositoryError> {
    let mode_str: String = row.try_get("mode").map_err(map_column_error)?;
    let mode = mode_str
        .parse::<JobMode>()
        .map_err(RepositoryError::Serialization)?;

    let status_str: String = row.try_get("status").map_err(map_column_error)?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown job status '{status_str}'")))?;

    let params_json: String = row.try_get("conversion_params").map_err(map_column_error)?;
    let conversion_params: ConversionParams = serde_json::from_str(&params_json)
        .map_err(|e| RepositoryError::Serialization(format!("conversion_params: {e}")))?;

    let error_kind: Option<String> = row.try_get("error_kind").map_err(map_column_error)?;
    let error_message: Option<String> = row.try_get("error_message").map_err(map_column_error)?;
    let error = match error_kind {
        Some(kind) => {
            let kind = ErrorKind::parse(&kind)
                .ok_or_else(|| RepositoryError::Serialization(format!("unknown error kind '{kind}'")))?;
            Some(JobFailure::new(kind, error_message.unwrap_or_default()))
        }
        None => None,
    };

    let id: String = row.try_get("id").map_err(map_column_error)?;

    Ok(Job {
        id: JobId::from(id),
        mode,
        status,
        text: row.try_get("text").map_err(map_column_error)?,
        source_language: row.try_get("source_language").map_err(map_column_error)?,
        target_language: row.try_get("target_language").map_err(map_column_error)?,
        backend_id: row.try_get("backend_id").map_err(map_column_error)?,
        quality_profile: row.try_get("quality_profile").map_err(map_column_error)?,
        voice_profile_id: row.try_get("voice_profile_id").map_err(map_column_error)?,
        enable_conversion: row.try_get("enable_conversion").map_err(map_column_error)?,
        conversion_model_id: row.try_get("conversion_model_id").map_err(map_column_error)?,
        conversion_params,
        created_at: get_timestamp(row, "created_at")?,
        started_at: get_opt_timestamp(row, "started_at")?,
        completed_at: get_opt_timestamp(row, "completed_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
        expires_at: get_opt_timestamp(row, "expires_at")?,
        result_ref: row.try_get("result_ref").map_err(map_column_error)?,
        duration_seconds: row.try_get("duration_seconds").map_err(map_column_error)?,
        error,
        conversion_applied: row.try_get("conversion_applied").map_err(map_column_error)?,
        conversion_error: row.try_get("conversion_error").map_err(map_column_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use voxrelay_core::domain::ConversionOutcome;
    use voxrelay_core::JobSpec;

    async fn repo() -> SqliteJobRepository {
        let pool = setup_test_database().await.unwrap();
        SqliteJobRepository::new(pool, TimeDelta::days(7))
    }

    fn queued(text: &str) -> Job {
        Job::queued(JobId::generate(), JobSpec::new(text, "A"), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        let job = queued("Hello");

        let stored = repo.insert(&job).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.expires_at.is_some_and(|at| at > stored.updated_at));

        let fetched = repo.get(&job.id).await.unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_duplicate_insert_already_exists() {
        let repo = repo().await;
        let job = queued("Hello");
        repo.insert(&job).await.unwrap();

        assert!(matches!(
            repo.insert(&job).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let repo = repo().await;
        let job = repo.insert(&queued("Hello")).await.unwrap();
        let now = Utc::now();

        let running = repo
            .transition(&job.id, &[JobStatus::Queued], JobStatus::Running, &JobPatch::started(now))
            .await
            .unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.updated_at >= job.updated_at);

        let patch = JobPatch::completed(now, "/r/x.wav", 1.5, &ConversionOutcome::NotRequested);
        let done = repo
            .transition(&job.id, &[JobStatus::Running], JobStatus::Completed, &patch)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result_ref.as_deref(), Some("/r/x.wav"));
        assert_eq!(done.duration_seconds, Some(1.5));
        assert!(!done.conversion_applied);
        // Earlier fields survive later patches
        assert_eq!(done.started_at, running.started_at);
    }

    #[tokio::test]
    async fn test_stale_transition_is_conflict_and_leaves_state() {
        let repo = repo().await;
        let job = repo.insert(&queued("Hello")).await.unwrap();
        let now = Utc::now();
        repo.transition(&job.id, &[JobStatus::Queued], JobStatus::Running, &JobPatch::started(now))
            .await
            .unwrap();
        let failure = JobFailure::new(ErrorKind::BackendFailure, "boom");
        repo.transition(
            &job.id,
            &[JobStatus::Running],
            JobStatus::Failed,
            &JobPatch::failed(now, failure),
        )
        .await
        .unwrap();

        // A stale worker tries to complete the already-failed job
        let patch = JobPatch::completed(now, "/r/late.wav", 2.0, &ConversionOutcome::Applied);
        let err = repo
            .transition(&job.id, &[JobStatus::Running], JobStatus::Completed, &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let current = repo.get(&job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::Failed);
        assert_eq!(current.result_ref, None);
        assert_eq!(current.error.unwrap().kind, ErrorKind::BackendFailure);
    }

    #[tokio::test]
    async fn test_invalid_edge_rejected_before_storage() {
        let repo = repo().await;
        let err = repo
            .transition(
                &JobId::from("missing"),
                &[JobStatus::Completed],
                JobStatus::Running,
                &JobPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transition_unknown_job_not_found() {
        let repo = repo().await;
        let err = repo
            .transition(
                &JobId::from("missing"),
                &[JobStatus::Queued],
                JobStatus::Running,
                &JobPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_jobs_invisible_then_purged() {
        let repo = repo().await;
        let old = Job::queued(
            JobId::generate(),
            JobSpec::new("old", "A"),
            Utc::now() - TimeDelta::days(8),
        );
        repo.insert(&old).await.unwrap();
        let fresh = repo.insert(&queued("fresh")).await.unwrap();

        assert!(matches!(
            repo.get(&old.id).await,
            Err(RepositoryError::NotFound(_))
        ));
        let listed = repo.list(&JobFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);

        assert_eq!(repo.purge_expired(Utc::now()).await.unwrap(), vec![old.id.clone()]);
        assert!(!repo.delete(&old.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = repo().await;
        let a = repo.insert(&queued("one")).await.unwrap();
        let mut other = queued("two");
        other.backend_id = "B".into();
        repo.insert(&other).await.unwrap();
        repo.transition(
            &a.id,
            &[JobStatus::Queued],
            JobStatus::Cancelled,
            &JobPatch::cancelled(Utc::now()),
        )
        .await
        .unwrap();

        let queued_jobs = repo
            .list(&JobFilter::with_status(JobStatus::Queued))
            .await
            .unwrap();
        assert_eq!(queued_jobs.len(), 1);
        assert_eq!(queued_jobs[0].backend_id, "B");

        let by_backend = repo
            .list(&JobFilter {
                backend_id: Some("A".into()),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_backend.len(), 1);
        assert_eq!(by_backend[0].status, JobStatus::Cancelled);

        let limited = repo
            .list(&JobFilter {
                limit: Some(1),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo().await;
        let job = repo.insert(&queued("bye")).await.unwrap();
        assert!(repo.delete(&job.id).await.unwrap());
        assert!(!repo.delete(&job.id).await.unwrap());
    }
}
