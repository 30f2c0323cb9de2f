//! Submit command handler.

use anyhow::Result;
use voxrelay_core::{ConversionParams, JobSpec};

use crate::bootstrap::CliContext;
use crate::commands::SubmitArgs;
use crate::error::CliError;

/// Queue a job and print its identifier.
///
/// A conversion model given by display name is translated to its
/// identifier. Unknown references are passed through unchanged; the job
/// then fails validation before it is claimed.
pub async fn execute(ctx: &CliContext, args: SubmitArgs) -> Result<()> {
    let model_id = match &args.conversion_model {
        Some(reference) => Some(
            ctx.app()
                .conversion_models()
                .resolve(reference)
                .await
                .map_err(CliError::from)?
                .map_or_else(|| reference.clone(), |model| model.id.to_string()),
        ),
        None => None,
    };

    let spec = build_spec(args, model_id);
    let job = ctx.app().jobs().create(spec).await.map_err(CliError::from)?;

    println!("{}", job.id);
    tracing::debug!(job_id = %job.id, "Submitted");
    Ok(())
}

/// Translate arguments into a job spec. Conversion parameters not given
/// on the command line keep their defaults.
pub fn build_spec(args: SubmitArgs, conversion_model_id: Option<String>) -> JobSpec {
    let mut spec = JobSpec::new(args.text, args.backend)
        .with_languages(args.source_language, args.target_language);
    if let Some(profile) = args.quality_profile {
        spec = spec.with_quality_profile(profile);
    }
    if let Some(voice) = args.voice {
        spec = spec.with_voice_profile(voice);
    }
    if let Some(model_id) = conversion_model_id {
        let defaults = ConversionParams::default();
        let params = ConversionParams {
            pitch: args.pitch.unwrap_or(defaults.pitch),
            index_ratio: args.index_ratio.unwrap_or(defaults.index_ratio),
            filter_radius: args.filter_radius.unwrap_or(defaults.filter_radius),
            envelope_ratio: args.envelope_ratio.unwrap_or(defaults.envelope_ratio),
            protect_ratio: args.protect_ratio.unwrap_or(defaults.protect_ratio),
        };
        spec = spec.with_conversion(model_id, params);
    }
    spec
}
