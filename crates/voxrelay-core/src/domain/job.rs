//! Job domain types.
//!
//! A job is one unit of requested synthesis work with a persisted lifecycle.
//! These types are independent of the store that persists them.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::audio::{ConversionOutcome, ParamMap};
use super::failure::ErrorKind;

/// Maximum accepted input text length, in characters.
pub const MAX_TEXT_CHARS: usize = 5_000;

/// Accepted pitch shift, in semitones.
pub const PITCH_RANGE: RangeInclusive<i32> = -12..=12;

/// Accepted median filter radius for pitch smoothing.
pub const FILTER_RADIUS_RANGE: RangeInclusive<u32> = 0..=7;

/// Accepted range for every mix/ratio conversion parameter.
pub const RATIO_RANGE: RangeInclusive<f32> = 0.0..=1.0;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque unique job identifier, generated at creation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mode & Status
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Plain text-to-speech with the backend's stock voice.
    #[default]
    SynthesisOnly,
    /// Text-to-speech conditioned on a stored voice profile.
    SynthesisWithCloning,
}

impl JobMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SynthesisOnly => "synthesis_only",
            Self::SynthesisWithCloning => "synthesis_with_cloning",
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthesis_only" | "synthesis" | "tts" => Ok(Self::SynthesisOnly),
            "synthesis_with_cloning" | "cloning" | "clone" => Ok(Self::SynthesisWithCloning),
            other => Err(format!("unknown job mode '{other}'")),
        }
    }
}

/// Lifecycle status of a job.
///
/// Transitions are one-directional:
///
/// ```text
/// QUEUED ──► RUNNING ──► COMPLETED
///   │           └──────► FAILED
///   ├──────────────────► FAILED      (pre-flight validation)
///   └──────────────────► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [Self; 5] = [
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted representation. Unknown values yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Terminal statuses never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Failed | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(&s.trim().to_ascii_lowercase()).ok_or_else(|| format!("unknown status '{s}'"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────────────────────────

/// Input rejected at submission time. The job is never created.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobValidationError {
    #[error("text must not be empty")]
    EmptyText,

    #[error("text is {len} characters, maximum is {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("backend identifier must not be empty")]
    EmptyBackend,

    #[error("pitch must be within [-12, 12] semitones, got {0}")]
    PitchOutOfRange(i32),

    #[error("{field} must be within [0.0, 1.0], got {value}")]
    RatioOutOfRange { field: &'static str, value: f32 },

    #[error("filter radius must be within [0, 7], got {0}")]
    FilterRadiusOutOfRange(u32),

    #[error("cloning mode requires a voice profile reference")]
    MissingVoiceProfile,

    #[error("conversion is enabled but no conversion model is referenced")]
    MissingConversionModel,
}

/// Numeric voice-conversion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionParams {
    /// Pitch shift in semitones.
    pub pitch: i32,
    /// How much of the retrieval index feature to mix in.
    pub index_ratio: f32,
    /// Median filter radius applied to the pitch curve.
    pub filter_radius: u32,
    /// Mix between the source volume envelope and the converted one.
    pub envelope_ratio: f32,
    /// Protection for voiceless consonants and breath sounds.
    pub protect_ratio: f32,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            pitch: 0,
            index_ratio: 0.75,
            filter_radius: 3,
            envelope_ratio: 0.25,
            protect_ratio: 0.33,
        }
    }
}

impl ConversionParams {
    /// Check every field against its fixed bounds.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        if !PITCH_RANGE.contains(&self.pitch) {
            return Err(JobValidationError::PitchOutOfRange(self.pitch));
        }
        if !FILTER_RADIUS_RANGE.contains(&self.filter_radius) {
            return Err(JobValidationError::FilterRadiusOutOfRange(
                self.filter_radius,
            ));
        }
        for (field, value) in [
            ("index_ratio", self.index_ratio),
            ("envelope_ratio", self.envelope_ratio),
            ("protect_ratio", self.protect_ratio),
        ] {
            // NaN fails `contains`, so it is rejected here as well.
            if !RATIO_RANGE.contains(&value) {
                return Err(JobValidationError::RatioOutOfRange { field, value });
            }
        }
        Ok(())
    }

    /// Render as the parameter map handed to a conversion backend.
    #[must_use]
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("pitch".into(), self.pitch.into());
        params.insert("index_ratio".into(), f64::from(self.index_ratio).into());
        params.insert("filter_radius".into(), self.filter_radius.into());
        params.insert(
            "envelope_ratio".into(),
            f64::from(self.envelope_ratio).into(),
        );
        params.insert("protect_ratio".into(), f64::from(self.protect_ratio).into());
        params
    }
}

/// Everything a caller supplies when submitting a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub mode: JobMode,
    pub text: String,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub backend_id: String,
    /// Quality profile name; the backend default is used when absent.
    pub quality_profile: Option<String>,
    pub voice_profile_id: Option<String>,
    pub enable_conversion: bool,
    pub conversion_model_id: Option<String>,
    #[serde(default)]
    pub conversion_params: ConversionParams,
}

impl JobSpec {
    /// A plain synthesis request with default settings.
    pub fn new(text: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            mode: JobMode::SynthesisOnly,
            text: text.into(),
            source_language: None,
            target_language: None,
            backend_id: backend_id.into(),
            quality_profile: None,
            voice_profile_id: None,
            enable_conversion: false,
            conversion_model_id: None,
            conversion_params: ConversionParams::default(),
        }
    }

    #[must_use]
    pub fn with_quality_profile(mut self, name: impl Into<String>) -> Self {
        self.quality_profile = Some(name.into());
        self
    }

    /// Switch to cloning mode conditioned on the given voice profile.
    #[must_use]
    pub fn with_voice_profile(mut self, voice_profile_id: impl Into<String>) -> Self {
        self.mode = JobMode::SynthesisWithCloning;
        self.voice_profile_id = Some(voice_profile_id.into());
        self
    }

    /// Enable post-processing through a conversion model.
    #[must_use]
    pub fn with_conversion(mut self, model_id: impl Into<String>, params: ConversionParams) -> Self {
        self.enable_conversion = true;
        self.conversion_model_id = Some(model_id.into());
        self.conversion_params = params;
        self
    }

    #[must_use]
    pub fn with_languages(mut self, source: Option<String>, target: Option<String>) -> Self {
        self.source_language = source;
        self.target_language = target;
        self
    }

    /// Submission-time validation. References to stored entities are
    /// resolved later, before the job is claimed.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        if self.text.trim().is_empty() {
            return Err(JobValidationError::EmptyText);
        }
        let len = self.text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(JobValidationError::TextTooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }
        if self.backend_id.trim().is_empty() {
            return Err(JobValidationError::EmptyBackend);
        }
        if self.mode == JobMode::SynthesisWithCloning
            && self.voice_profile_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(JobValidationError::MissingVoiceProfile);
        }
        if self.enable_conversion
            && self.conversion_model_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(JobValidationError::MissingConversionModel);
        }
        self.conversion_params.validate()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted record
// ─────────────────────────────────────────────────────────────────────────────

/// Failure detail recorded on a FAILED job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A job as persisted by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub mode: JobMode,
    pub status: JobStatus,
    pub text: String,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub backend_id: String,
    pub quality_profile: Option<String>,
    pub voice_profile_id: Option<String>,
    pub enable_conversion: bool,
    pub conversion_model_id: Option<String>,
    pub conversion_params: ConversionParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped by every successful transition; never moves backwards.
    pub updated_at: DateTime<Utc>,
    /// Set by the store from `updated_at` and its TTL.
    pub expires_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error: Option<JobFailure>,
    pub conversion_applied: bool,
    /// Why a requested conversion was skipped, if it was.
    pub conversion_error: Option<String>,
}

impl Job {
    /// Build a fresh QUEUED job from a validated spec.
    #[must_use]
    pub fn queued(id: JobId, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            mode: spec.mode,
            status: JobStatus::Queued,
            text: spec.text,
            source_language: spec.source_language,
            target_language: spec.target_language,
            backend_id: spec.backend_id,
            quality_profile: spec.quality_profile,
            voice_profile_id: spec.voice_profile_id,
            enable_conversion: spec.enable_conversion,
            conversion_model_id: spec.conversion_model_id,
            conversion_params: spec.conversion_params,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            expires_at: None,
            result_ref: None,
            duration_seconds: None,
            error: None,
            conversion_applied: false,
            conversion_error: None,
        }
    }

    /// Apply a patch in memory, the same way the store applies it.
    pub fn apply(&mut self, status: JobStatus, patch: &JobPatch, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = self.updated_at.max(now);
        if let Some(at) = patch.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(result_ref) = &patch.result_ref {
            self.result_ref = Some(result_ref.clone());
        }
        if let Some(duration) = patch.duration_seconds {
            self.duration_seconds = Some(duration);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        if let Some(applied) = patch.conversion_applied {
            self.conversion_applied = applied;
        }
        if let Some(reason) = &patch.conversion_error {
            self.conversion_error = Some(reason.clone());
        }
    }
}

/// Fields written alongside a status transition. `None` leaves a field as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error: Option<JobFailure>,
    pub conversion_applied: Option<bool>,
    pub conversion_error: Option<String>,
}

impl JobPatch {
    /// Patch for QUEUED → RUNNING.
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::default()
        }
    }

    /// Patch for RUNNING → COMPLETED.
    #[must_use]
    pub fn completed(
        at: DateTime<Utc>,
        result_ref: impl Into<String>,
        duration_seconds: f64,
        conversion: &ConversionOutcome,
    ) -> Self {
        Self {
            completed_at: Some(at),
            result_ref: Some(result_ref.into()),
            duration_seconds: Some(duration_seconds),
            conversion_applied: Some(conversion.applied()),
            conversion_error: conversion.skip_reason().map(str::to_string),
            ..Self::default()
        }
    }

    /// Patch for any transition into FAILED.
    #[must_use]
    pub fn failed(at: DateTime<Utc>, failure: JobFailure) -> Self {
        Self {
            completed_at: Some(at),
            error: Some(failure),
            conversion_applied: Some(false),
            ..Self::default()
        }
    }

    /// Patch for QUEUED → CANCELLED.
    #[must_use]
    pub fn cancelled(at: DateTime<Utc>) -> Self {
        Self {
            completed_at: Some(at),
            ..Self::default()
        }
    }
}

/// Filter for listing jobs. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub backend_id: Option<String>,
    /// Only jobs whose `updated_at` is strictly older than this.
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl JobFilter {
    #[must_use]
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_one_directional() {
        use JobStatus::{Cancelled, Completed, Failed, Queued, Running};

        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Queued));
        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Completed));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(JobStatus::parse("running"), Some(JobStatus::Running));
        assert_eq!(JobStatus::parse("RUNNING"), None);
        assert_eq!("RUNNING".parse::<JobStatus>(), Ok(JobStatus::Running));
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_pitch_out_of_range_rejected() {
        let params = ConversionParams {
            pitch: 15,
            ..ConversionParams::default()
        };
        let spec = JobSpec::new("Hello", "A").with_conversion("m1", params);
        assert_eq!(spec.validate(), Err(JobValidationError::PitchOutOfRange(15)));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let params = ConversionParams {
            pitch: -12,
            index_ratio: 1.0,
            filter_radius: 7,
            envelope_ratio: 0.0,
            protect_ratio: 0.5,
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_ratio_and_radius_rejected() {
        let nan = ConversionParams {
            protect_ratio: f32::NAN,
            ..ConversionParams::default()
        };
        assert!(matches!(
            nan.validate(),
            Err(JobValidationError::RatioOutOfRange {
                field: "protect_ratio",
                ..
            })
        ));

        let radius = ConversionParams {
            filter_radius: 8,
            ..ConversionParams::default()
        };
        assert_eq!(
            radius.validate(),
            Err(JobValidationError::FilterRadiusOutOfRange(8))
        );
    }

    #[test]
    fn test_spec_reference_requirements() {
        let mut cloning = JobSpec::new("Hi", "A");
        cloning.mode = JobMode::SynthesisWithCloning;
        assert_eq!(
            cloning.validate(),
            Err(JobValidationError::MissingVoiceProfile)
        );

        let mut converting = JobSpec::new("Hi", "A");
        converting.enable_conversion = true;
        assert_eq!(
            converting.validate(),
            Err(JobValidationError::MissingConversionModel)
        );

        assert_eq!(
            JobSpec::new("   ", "A").validate(),
            Err(JobValidationError::EmptyText)
        );
        assert_eq!(
            JobSpec::new("Hi", "").validate(),
            Err(JobValidationError::EmptyBackend)
        );
    }

    #[test]
    fn test_apply_keeps_updated_at_monotonic() {
        let created = Utc::now();
        let mut job = Job::queued(JobId::generate(), JobSpec::new("Hi", "A"), created);
        let earlier = created - chrono::Duration::seconds(30);

        job.apply(JobStatus::Running, &JobPatch::started(earlier), earlier);

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.updated_at, created);
        assert_eq!(job.started_at, Some(earlier));
    }

    #[test]
    fn test_conversion_params_to_params() {
        let params = ConversionParams::default().to_params();
        assert_eq!(params["pitch"], 0);
        assert_eq!(params["filter_radius"], 3);
        assert!(params.contains_key("protect_ratio"));
    }
}
