//! Quality profile service - storage and resolution of parameter bundles.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::QualityProfile;
use crate::ports::{CoreError, QualityProfileRepository, RepositoryError};

pub struct QualityProfileService {
    repo: Arc<dyn QualityProfileRepository>,
    ttl: Option<TimeDelta>,
}

impl QualityProfileService {
    /// `ttl` is applied to stored profiles that carry no explicit expiry.
    pub fn new(repo: Arc<dyn QualityProfileRepository>, ttl: Option<TimeDelta>) -> Self {
        Self { repo, ttl }
    }

    /// Store a profile, replacing any with the same backend and name.
    pub async fn set(&self, mut profile: QualityProfile) -> Result<QualityProfile, CoreError> {
        if profile.name.trim().is_empty() {
            return Err(CoreError::Validation("profile name cannot be empty".into()));
        }
        if profile.backend_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "profile backend identifier cannot be empty".into(),
            ));
        }
        if profile.expires_at.is_none() {
            profile.expires_at = self.ttl.map(|ttl| profile.created_at + ttl);
        }
        let stored = self.repo.upsert(&profile).await?;
        tracing::debug!(
            backend_id = %stored.backend_id,
            profile = %stored.name,
            is_default = stored.is_default,
            "Quality profile stored"
        );
        Ok(stored)
    }

    /// Resolve the parameters for a job.
    ///
    /// A named profile that is missing or expired falls back to the
    /// backend's default; with neither available this is a validation error.
    pub async fn resolve(
        &self,
        backend_id: &str,
        name: Option<&str>,
    ) -> Result<QualityProfile, CoreError> {
        self.resolve_at(backend_id, name, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        backend_id: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<QualityProfile, CoreError> {
        if let Some(name) = name {
            match self.repo.get(backend_id, name, now).await {
                Ok(profile) => return Ok(profile),
                Err(RepositoryError::NotFound(_)) => {
                    tracing::debug!(
                        backend_id,
                        profile = name,
                        "Quality profile not found, trying backend default"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.repo
            .get_default(backend_id, now)
            .await?
            .ok_or_else(|| {
                CoreError::Validation(match name {
                    Some(name) => format!(
                        "quality profile '{name}' not found and backend '{backend_id}' has no default profile"
                    ),
                    None => format!("backend '{backend_id}' has no default quality profile"),
                })
            })
    }

    pub async fn list(&self, backend_id: Option<&str>) -> Result<Vec<QualityProfile>, CoreError> {
        self.repo.list(backend_id).await.map_err(CoreError::from)
    }

    pub async fn remove(&self, backend_id: &str, name: &str) -> Result<bool, CoreError> {
        self.repo.delete(backend_id, name).await.map_err(CoreError::from)
    }
}
