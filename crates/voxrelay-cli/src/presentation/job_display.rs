//! Detailed job display.

use voxrelay_core::Job;

use super::tables::format_optional;

/// Seconds as `1.25s`, or `--`.
pub fn format_duration(seconds: Option<f64>) -> String {
    seconds.map_or_else(|| "--".to_string(), |s| format!("{s:.2}s"))
}

/// Print every field of a job that a user would want to see.
pub fn display_job(job: &Job) {
    let timestamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map_or_else(
            || "--".to_string(),
            |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    };

    println!("Job:        {}", job.id);
    println!("Status:     {}", job.status);
    println!("Mode:       {}", job.mode);
    println!("Backend:    {}", job.backend_id);
    println!(
        "Profile:    {}",
        format_optional(job.quality_profile.as_ref(), "(backend default)")
    );
    if let Some(voice) = &job.voice_profile_id {
        println!("Voice:      {voice}");
    }
    if job.source_language.is_some() || job.target_language.is_some() {
        println!(
            "Languages:  {} -> {}",
            format_optional(job.source_language.as_ref(), "?"),
            format_optional(job.target_language.as_ref(), "?")
        );
    }
    println!("Text:       {}", job.text);
    println!("Created:    {}", timestamp(Some(job.created_at)));
    println!("Started:    {}", timestamp(job.started_at));
    println!("Finished:   {}", timestamp(job.completed_at));

    if job.enable_conversion {
        let outcome = if job.conversion_applied {
            "applied".to_string()
        } else if let Some(reason) = &job.conversion_error {
            format!("skipped ({reason})")
        } else {
            "pending".to_string()
        };
        println!(
            "Conversion: {} [{}]",
            format_optional(job.conversion_model_id.as_ref(), "?"),
            outcome
        );
    }

    if let Some(result) = &job.result_ref {
        println!("Result:     {result}");
        println!("Duration:   {}", format_duration(job.duration_seconds));
    }
    if let Some(error) = &job.error {
        println!("Error:      [{}] {}", error.kind, error.message);
    }
}
