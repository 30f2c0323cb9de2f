//! Cross-connection behavior of the job store.
//!
//! These tests use a file-backed database so competing claimers go through
//! separate connections, the way separate worker processes would.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use voxrelay_core::{
    Job, JobId, JobPatch, JobRepository, JobSpec, JobStatus, RepositoryError,
};
use voxrelay_db::{SqliteJobRepository, setup_database};

async fn file_repo(dir: &tempfile::TempDir) -> Arc<SqliteJobRepository> {
    let pool = setup_database(&dir.path().join("jobs.db")).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool, TimeDelta::days(7)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_claims_yield_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir).await;

    for _ in 0..10 {
        let job = Job::queued(JobId::generate(), JobSpec::new("Hello", "A"), Utc::now());
        repo.insert(&job).await.unwrap();

        let claims = (0..2).map(|_| {
            let repo = Arc::clone(&repo);
            let id = job.id.clone();
            tokio::spawn(async move {
                repo.transition(
                    &id,
                    &[JobStatus::Queued],
                    JobStatus::Running,
                    &JobPatch::started(Utc::now()),
                )
                .await
            })
        });
        let results: Vec<_> = futures_join(claims).await;

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(RepositoryError::Conflict(_))))
            .count();
        assert_eq!((wins, conflicts), (1, 1), "results: {results:?}");
        assert_eq!(repo.get(&job.id).await.unwrap().status, JobStatus::Running);
    }
}

#[tokio::test]
async fn test_separate_pools_share_state() {
    let dir = tempfile::tempdir().unwrap();
    let first = file_repo(&dir).await;
    let second = file_repo(&dir).await;

    let job = Job::queued(JobId::generate(), JobSpec::new("Hello", "A"), Utc::now());
    first.insert(&job).await.unwrap();

    second
        .transition(
            &job.id,
            &[JobStatus::Queued],
            JobStatus::Cancelled,
            &JobPatch::cancelled(Utc::now()),
        )
        .await
        .unwrap();

    let err = first
        .transition(
            &job.id,
            &[JobStatus::Queued],
            JobStatus::Running,
            &JobPatch::started(Utc::now()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
}

async fn futures_join<I, T>(handles: I) -> Vec<T>
where
    I: IntoIterator<Item = tokio::task::JoinHandle<T>>,
{
    let mut out = Vec::new();
    for handle in handles.into_iter().collect::<Vec<_>>() {
        out.push(handle.await.unwrap());
    }
    out
}
