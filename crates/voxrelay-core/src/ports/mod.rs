//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core domain expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` types in any signature
//! - No process/filesystem implementation details
//! - Repository traits are CRUD-focused, except the job store whose only
//!   mutator is the atomic `transition`

pub mod backend;
pub mod conversion_model_repository;
pub mod job_repository;
pub mod quality_profile_repository;
pub mod result_store;
pub mod voice_profile_repository;

use std::sync::Arc;
use thiserror::Error;

pub use backend::{BackendFactory, DevicePlacement, SynthesisBackend};
pub use conversion_model_repository::ConversionModelRepository;
pub use job_repository::{JobRepository, check_transition};
pub use quality_profile_repository::QualityProfileRepository;
pub use result_store::ResultStore;
pub use voice_profile_repository::VoiceProfileRepository;

/// Container for all repository trait objects.
///
/// Lives in `voxrelay-core` so services and the runtime can accept it
/// without depending on `voxrelay-db`.
///
/// ```ignore
/// let repos = voxrelay_db::CoreFactory::build_repos(pool, &config);
/// let core = AppCore::new(repos, &config);
/// ```
#[derive(Clone)]
pub struct Repos {
    pub jobs: Arc<dyn JobRepository>,
    pub quality_profiles: Arc<dyn QualityProfileRepository>,
    pub conversion_models: Arc<dyn ConversionModelRepository>,
    pub voice_profiles: Arc<dyn VoiceProfileRepository>,
}

impl Repos {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        quality_profiles: Arc<dyn QualityProfileRepository>,
        conversion_models: Arc<dyn ConversionModelRepository>,
        voice_profiles: Arc<dyn VoiceProfileRepository>,
    ) -> Self {
        Self {
            jobs,
            quality_profiles,
            conversion_models,
            voice_profiles,
        }
    }
}

/// Domain-specific errors for repository operations.
///
/// This error type abstracts away storage implementation details (e.g., sqlx errors)
/// and provides a clean interface for services to handle storage failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entity with the same identifier already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A conditional update lost against the current stored state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A constraint was violated (e.g., unique constraint).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Core error type for semantic domain errors.
///
/// Adapters map this to their own error types (CLI exit codes).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Validation error (invalid input).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (unexpected condition).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::domain::JobValidationError> for CoreError {
    fn from(err: crate::domain::JobValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<crate::config::ConfigError> for CoreError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
