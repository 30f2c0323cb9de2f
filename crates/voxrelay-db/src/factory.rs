//! Composition utilities for building `AppCore` with `SQLite` backends.
//!
//! Construction only; no domain logic lives here.

use std::sync::Arc;

use chrono::TimeDelta;
use sqlx::SqlitePool;

use voxrelay_core::services::AppCore;
use voxrelay_core::{Repos, ServiceConfig};

use crate::repositories::{
    SqliteConversionModelRepository, SqliteJobRepository, SqliteQualityProfileRepository,
    SqliteVoiceProfileRepository,
};

/// Factory for creating repository instances with `SQLite` backends.
pub struct CoreFactory;

impl CoreFactory {
    /// Build all `SQLite` repositories from a pool.
    ///
    /// Returns a `Repos` struct from `voxrelay-core` containing
    /// trait-object-wrapped repositories.
    pub fn build_repos(pool: SqlitePool, config: &ServiceConfig) -> Repos {
        Repos::new(
            Arc::new(SqliteJobRepository::new(pool.clone(), config.job_ttl())),
            Arc::new(SqliteQualityProfileRepository::new(pool.clone())),
            Arc::new(SqliteConversionModelRepository::new(pool.clone())),
            Arc::new(SqliteVoiceProfileRepository::new(pool)),
        )
    }

    /// Build a complete `AppCore` from a pool.
    ///
    /// ```ignore
    /// let pool = setup_database(&config.database_path).await?;
    /// let core = CoreFactory::build_app_core(pool, &config);
    /// ```
    pub fn build_app_core(pool: SqlitePool, config: &ServiceConfig) -> AppCore {
        let repos = Self::build_repos(pool, config);
        AppCore::new(repos, config)
    }

    /// Create a job repository from a pool.
    pub fn job_repository(pool: SqlitePool, ttl: TimeDelta) -> Arc<SqliteJobRepository> {
        Arc::new(SqliteJobRepository::new(pool, ttl))
    }
}

/// Test database helper for integration tests.
///
/// Provides an in-memory `SQLite` database with the production schema.
#[cfg(any(test, feature = "test-utils"))]
pub struct TestDb {
    pool: SqlitePool,
}

#[cfg(any(test, feature = "test-utils"))]
impl TestDb {
    pub async fn new() -> anyhow::Result<Self> {
        let pool = crate::setup::setup_test_database().await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Repositories over this database, with default TTLs.
    pub fn repos(&self) -> Repos {
        CoreFactory::build_repos(self.pool.clone(), &ServiceConfig::default())
    }

    pub fn job_repository(&self, ttl: TimeDelta) -> SqliteJobRepository {
        SqliteJobRepository::new(self.pool.clone(), ttl)
    }
}
