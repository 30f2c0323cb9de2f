//! Core domain types, port definitions and services for voxrelay.
//!
//! This crate knows nothing about `SQLite`, processes or worker threads.
//! Storage lives in `voxrelay-db`; the backend registry, synthesis pipeline
//! and dispatch bridge live in `voxrelay-runtime`.
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod paths;
pub mod ports;
pub mod services;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{ConfigError, RegistryScope, ServiceConfig, validate_config};
pub use domain::{
    AudioArtifact, BackendFailure, ConversionModel, ConversionModelId, ConversionOutcome,
    ConversionParams, ErrorKind, Job, JobFailure, JobFilter, JobId, JobMode, JobPatch, JobSpec,
    JobStatus, JobValidationError, ModelUpload, ParamMap, PipelineError, QualityProfile,
    SynthesisOutput, VoiceProfile,
};
pub use ports::{
    BackendFactory, ConversionModelRepository, CoreError, DevicePlacement, JobRepository,
    QualityProfileRepository, Repos, RepositoryError, ResultStore, SynthesisBackend,
    VoiceProfileRepository,
};
pub use services::{
    AppCore, ConversionModelStore, FsResultStore, HousekeepingReport, HousekeepingService, JobService,
    QualityProfileService, VoiceProfileService,
};

// Silence unused dev-dependency warnings; these are used by tests/ only
#[cfg(test)]
use tokio_test as _;
#[cfg(test)]
use voxrelay_db as _;
