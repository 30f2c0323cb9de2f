//! Repository implementations using `SQLite`.
//!
//! These implementations encapsulate all SQL queries and database access.
//! The `SqlitePool` is confined to this module and never exposed through
//! the port trait signatures.

mod row_mappers;
mod sqlite_conversion_model_repository;
mod sqlite_job_repository;
mod sqlite_quality_profile_repository;
mod sqlite_voice_profile_repository;

pub use sqlite_conversion_model_repository::SqliteConversionModelRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_quality_profile_repository::SqliteQualityProfileRepository;
pub use sqlite_voice_profile_repository::SqliteVoiceProfileRepository;
