//! Quality profile store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::domain::QualityProfile;

/// Persistence for quality profiles, keyed by `(backend_id, name)`.
///
/// Lookups take the current time so expired profiles are skipped without
/// being removed.
#[async_trait]
pub trait QualityProfileRepository: Send + Sync {
    /// Insert or replace a profile.
    ///
    /// When `profile.is_default` is set, any other default for the same
    /// backend is cleared in the same operation.
    async fn upsert(&self, profile: &QualityProfile) -> Result<QualityProfile, RepositoryError>;

    /// Returns `Err(RepositoryError::NotFound)` if absent or expired at `now`.
    async fn get(
        &self,
        backend_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<QualityProfile, RepositoryError>;

    /// The backend's unexpired default profile, if any.
    async fn get_default(
        &self,
        backend_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QualityProfile>, RepositoryError>;

    /// All profiles, optionally restricted to one backend. Includes expired
    /// entries that have not been swept yet.
    async fn list(&self, backend_id: Option<&str>) -> Result<Vec<QualityProfile>, RepositoryError>;

    /// Returns `false` if no such profile existed.
    async fn delete(&self, backend_id: &str, name: &str) -> Result<bool, RepositoryError>;

    /// Physically remove profiles expired at `now`. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
