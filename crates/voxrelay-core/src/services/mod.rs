//! Core services - the application's business logic layer.
//!
//! Services orchestrate between ports (trait interfaces) and domain logic.
//! They don't know about concrete implementations, apart from
//! [`FsResultStore`], the filesystem result store `AppCore` wires in.

mod app_core;
mod conversion_model_store;
mod fs_result_store;
mod housekeeping;
mod job_service;
mod quality_profile_service;
mod voice_profile_service;

pub use app_core::AppCore;
pub use conversion_model_store::ConversionModelStore;
pub use fs_result_store::FsResultStore;
pub use housekeeping::{HousekeepingReport, HousekeepingService};
pub use job_service::JobService;
pub use quality_profile_service::QualityProfileService;
pub use voice_profile_service::VoiceProfileService;
