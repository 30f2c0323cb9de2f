//! Job store port.
//!
//! The job store is the authoritative state machine for submitted work.
//! Implementations must make [`JobRepository::transition`] a single atomic
//! conditional update, because competing workers may run in separate
//! processes and share nothing but the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::domain::{Job, JobFilter, JobId, JobPatch, JobStatus};

/// Persistence for jobs.
///
/// # Visibility
///
/// Records whose `expires_at` has passed are invisible to `get` and `list`
/// even before `purge_expired` physically removes them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job. The store assigns `expires_at`.
    ///
    /// Returns `Err(RepositoryError::AlreadyExists)` on a duplicate id.
    async fn insert(&self, job: &Job) -> Result<Job, RepositoryError>;

    /// Returns `Err(RepositoryError::NotFound)` for unknown or expired jobs.
    async fn get(&self, id: &JobId) -> Result<Job, RepositoryError>;

    /// Move a job to `to` if, and only if, its current status is one of `from`.
    ///
    /// This is the only mutator of a stored job. On success `updated_at`
    /// advances (never backwards) and `expires_at` is recomputed.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the current status is not in `from`, or if the
    ///   requested edge is not part of the state machine. State is unchanged.
    /// - `NotFound` if the job does not exist.
    async fn transition(
        &self,
        id: &JobId,
        from: &[JobStatus],
        to: JobStatus,
        patch: &JobPatch,
    ) -> Result<Job, RepositoryError>;

    /// List visible jobs matching the filter, oldest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RepositoryError>;

    /// Delete a job. Returns `false` if it did not exist.
    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError>;

    /// Physically remove every job expired at `now`. Returns the removed ids.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, RepositoryError>;
}

/// Reject transitions that are not edges of the job state machine.
///
/// Implementations call this before touching storage.
pub fn check_transition(from: &[JobStatus], to: JobStatus) -> Result<(), RepositoryError> {
    if from.is_empty() {
        return Err(RepositoryError::Conflict(format!(
            "no source status given for transition to {to}"
        )));
    }
    match from.iter().find(|status| !status.can_transition_to(to)) {
        Some(invalid) => Err(RepositoryError::Conflict(format!(
            "transition {invalid} -> {to} is not permitted"
        ))),
        None => Ok(()),
    }
}
