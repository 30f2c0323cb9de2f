//! Domain types for voxrelay.
//!
//! Pure data types with no infrastructure dependencies.

mod audio;
mod conversion_model;
mod failure;
mod job;
mod quality;
mod voice;

pub use audio::{AudioArtifact, ConversionOutcome, ParamMap, SynthesisOutput};
pub use conversion_model::{ConversionModel, ConversionModelId, MODEL_ID_LEN, ModelUpload};
pub use failure::{BackendFailure, ErrorKind, PipelineError};
pub use job::{
    ConversionParams, FILTER_RADIUS_RANGE, Job, JobFailure, JobFilter, JobId, JobMode, JobPatch,
    JobSpec, JobStatus, JobValidationError, MAX_TEXT_CHARS, PITCH_RANGE, RATIO_RANGE,
};
pub use quality::QualityProfile;
pub use voice::VoiceProfile;
