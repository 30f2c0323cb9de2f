//! Utility modules for voxrelay-core.

pub mod weights;

pub use weights::{WeightFormat, WeightValidationError, compute_sha256, validate_weight_file};
