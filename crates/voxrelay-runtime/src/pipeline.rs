//! Synthesis pipeline: turns a queued job into audio.
//!
//! Work is split in two phases. [`SynthesisPipeline::prepare`] resolves
//! every stored reference a job needs (quality profile, voice profile,
//! conversion model) without touching a backend, so bad references fail
//! the job before it is claimed. [`SynthesisPipeline::run`] then borrows
//! backends from the registry and produces the audio.
//!
//! Conversion is best-effort: if it fails for any reason the unconverted
//! audio is returned and the outcome records why.

use std::sync::Arc;

use tracing::{debug, warn};
use voxrelay_core::{
    AudioArtifact, ConversionModel, ConversionModelId, ConversionModelRepository,
    ConversionOutcome, Job, JobMode, JobValidationError, ParamMap, PipelineError,
    QualityProfileService, RepositoryError, SynthesisOutput, VoiceProfileRepository,
};

use crate::registry::BackendRegistry;

/// Parameter carrying the reference recording in cloning mode.
pub const PARAM_VOICE_REFERENCE: &str = "voice_reference";
/// Parameter carrying the reference transcript in cloning mode, when known.
pub const PARAM_VOICE_REFERENCE_TEXT: &str = "voice_reference_text";
pub const PARAM_SOURCE_LANGUAGE: &str = "source_language";
pub const PARAM_TARGET_LANGUAGE: &str = "target_language";

/// Stores the pipeline reads while preparing a job.
#[derive(Clone)]
pub struct PipelineDeps {
    pub quality_profiles: Arc<QualityProfileService>,
    pub voice_profiles: Arc<dyn VoiceProfileRepository>,
    pub conversion_models: Arc<dyn ConversionModelRepository>,
    /// Backend used for the conversion stage.
    pub conversion_backend_id: String,
}

/// A job with all references resolved.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: Job,
    /// Name of the quality profile that was applied.
    pub profile_name: String,
    /// Synthesis parameters: the profile's, plus language and voice hints.
    pub params: ParamMap,
    pub conversion: Option<PreparedConversion>,
}

#[derive(Debug, Clone)]
pub struct PreparedConversion {
    pub model: ConversionModel,
    pub params: ParamMap,
}

pub struct SynthesisPipeline {
    registry: BackendRegistry,
    deps: PipelineDeps,
}

impl SynthesisPipeline {
    pub const fn new(registry: BackendRegistry, deps: PipelineDeps) -> Self {
        Self { registry, deps }
    }

    #[must_use]
    pub const fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Prepare and run a job in one step.
    pub async fn execute(&self, job: &Job) -> Result<SynthesisOutput, PipelineError> {
        let prepared = self.prepare(job).await?;
        self.run(&prepared).await
    }

    /// Resolve the job's stored references.
    ///
    /// # Errors
    ///
    /// `Validation` when the quality profile (and the backend default), the
    /// voice profile, or the conversion model cannot be found.
    pub async fn prepare(&self, job: &Job) -> Result<PreparedJob, PipelineError> {
        let profile = self
            .deps
            .quality_profiles
            .resolve(&job.backend_id, job.quality_profile.as_deref())
            .await?;
        debug!(
            job_id = %job.id,
            backend_id = %job.backend_id,
            profile = %profile.name,
            "Resolved quality profile"
        );

        let mut params = profile.params;
        if let Some(language) = &job.source_language {
            params.insert(PARAM_SOURCE_LANGUAGE.into(), language.clone().into());
        }
        if let Some(language) = &job.target_language {
            params.insert(PARAM_TARGET_LANGUAGE.into(), language.clone().into());
        }

        if job.mode == JobMode::SynthesisWithCloning {
            let voice_id = job
                .voice_profile_id
                .as_deref()
                .ok_or(JobValidationError::MissingVoiceProfile)?;
            let voice = self
                .deps
                .voice_profiles
                .get(voice_id)
                .await
                .map_err(|e| {
                    missing_as_validation(e, format!("voice profile '{voice_id}' not found"))
                })?;
            params.insert(
                PARAM_VOICE_REFERENCE.into(),
                voice.reference_audio.display().to_string().into(),
            );
            if let Some(text) = voice.reference_text {
                params.insert(PARAM_VOICE_REFERENCE_TEXT.into(), text.into());
            }
        }

        let conversion = if job.enable_conversion {
            let model_id = job
                .conversion_model_id
                .as_deref()
                .ok_or(JobValidationError::MissingConversionModel)?;
            job.conversion_params.validate()?;
            let model = self
                .deps
                .conversion_models
                .get(&ConversionModelId::new(model_id))
                .await
                .map_err(|e| {
                    missing_as_validation(e, format!("conversion model '{model_id}' not found"))
                })?;
            Some(PreparedConversion {
                model,
                params: job.conversion_params.to_params(),
            })
        } else {
            None
        };

        Ok(PreparedJob {
            job: job.clone(),
            profile_name: profile.name,
            params,
            conversion,
        })
    }

    /// Synthesize, then convert if requested.
    ///
    /// # Errors
    ///
    /// Registry and synthesis failures are returned as-is. Conversion
    /// failures never are: they produce [`ConversionOutcome::SkippedDueToError`].
    pub async fn run(&self, prepared: &PreparedJob) -> Result<SynthesisOutput, PipelineError> {
        let job = &prepared.job;

        let raw = {
            let lease = self.registry.acquire(&job.backend_id).await?;
            match lease.backend().synthesize(&job.text, &prepared.params).await {
                Ok(audio) => audio,
                Err(failure) => {
                    if failure.poisoned {
                        lease.mark_stale();
                    }
                    return Err(failure.into());
                }
            }
        };

        let Some(conversion) = &prepared.conversion else {
            return Ok(SynthesisOutput {
                audio: raw,
                conversion: ConversionOutcome::NotRequested,
            });
        };

        match self.convert(&raw, conversion).await {
            Ok(converted) => Ok(SynthesisOutput {
                audio: converted,
                conversion: ConversionOutcome::Applied,
            }),
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    job_id = %job.id,
                    model_id = %conversion.model.id,
                    reason = %reason,
                    "Voice conversion failed, delivering unconverted audio"
                );
                Ok(SynthesisOutput {
                    audio: raw,
                    conversion: ConversionOutcome::SkippedDueToError(reason),
                })
            }
        }
    }

    async fn convert(
        &self,
        audio: &AudioArtifact,
        conversion: &PreparedConversion,
    ) -> Result<AudioArtifact, PipelineError> {
        let lease = self
            .registry
            .acquire(&self.deps.conversion_backend_id)
            .await?;
        lease
            .backend()
            .convert(audio, &conversion.model, &conversion.params)
            .await
            .map_err(|failure| {
                if failure.poisoned {
                    lease.mark_stale();
                }
                PipelineError::Conversion(failure.to_string())
            })
    }
}

fn missing_as_validation(err: RepositoryError, message: String) -> PipelineError {
    match err {
        RepositoryError::NotFound(_) => PipelineError::Validation(message),
        other => other.into(),
    }
}
