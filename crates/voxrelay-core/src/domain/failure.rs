//! Pipeline error taxonomy.
//!
//! Every failure that can end a job is classified into an [`ErrorKind`]
//! whose snake_case name is what gets persisted on the job record.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::{JobFailure, JobValidationError};
use crate::ports::{CoreError, RepositoryError};

/// Persisted classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ResourceExhausted,
    BackendFailure,
    ConversionFailure,
    Conflict,
    Storage,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::ResourceExhausted => "resource_exhausted",
            Self::BackendFailure => "backend_failure",
            Self::ConversionFailure => "conversion_failure",
            Self::Conflict => "conflict",
            Self::Storage => "storage_error",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Validation,
            Self::ResourceExhausted,
            Self::BackendFailure,
            Self::ConversionFailure,
            Self::Conflict,
            Self::Storage,
            Self::Internal,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend raised while loading or running.
///
/// `poisoned` marks the backend handle as unusable; the registry drops it
/// instead of handing it out again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("backend '{backend_id}' failed: {message}")]
pub struct BackendFailure {
    pub backend_id: String,
    pub message: String,
    pub poisoned: bool,
}

impl BackendFailure {
    pub fn new(backend_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            message: message.into(),
            poisoned: false,
        }
    }

    /// A failure after which the handle must not be reused.
    pub fn poisoned(backend_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            poisoned: true,
            ..Self::new(backend_id, message)
        }
    }
}

/// Errors raised while preparing or executing a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid input or an unresolvable reference.
    #[error("{0}")]
    Validation(String),

    /// Not enough memory to place a backend even after eviction.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error(transparent)]
    Backend(#[from] BackendFailure),

    /// Conversion failed where no fallback applies.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Lost a status race; another actor moved the job first.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Backend(_) => ErrorKind::BackendFailure,
            Self::Conversion(_) => ErrorKind::ConversionFailure,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Render as the failure detail recorded on a job.
    #[must_use]
    pub fn to_failure(&self) -> JobFailure {
        JobFailure::new(self.kind(), self.to_string())
    }
}

impl From<JobValidationError> for PipelineError {
    fn from(err: JobValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            RepositoryError::NotFound(msg) => Self::Validation(format!("not found: {msg}")),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Repository(e) => e.into(),
            CoreError::Validation(msg) | CoreError::NotFound(msg) => Self::Validation(msg),
            CoreError::Io(e) => Self::Storage(e.to_string()),
            CoreError::Configuration(msg) | CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}
