//! Job inspection handlers: status, list, cancel, delete.

use anyhow::Result;
use voxrelay_core::{JobFilter, JobId, JobStatus};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{display_job, format_duration, print_separator, truncate_string};

/// Show one job, as text or JSON.
pub async fn status(ctx: &CliContext, job_id: &str, json: bool) -> Result<()> {
    let job = ctx
        .app()
        .jobs()
        .get(&JobId::from(job_id))
        .await
        .map_err(CliError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        display_job(&job);
    }
    Ok(())
}

/// List jobs in a table.
pub async fn list(
    ctx: &CliContext,
    status: Option<JobStatus>,
    backend: Option<String>,
    limit: u32,
) -> Result<()> {
    let filter = JobFilter {
        status,
        backend_id: backend,
        limit: Some(limit),
        ..JobFilter::default()
    };
    let jobs = ctx.app().jobs().list(&filter).await.map_err(CliError::from)?;

    if jobs.is_empty() {
        println!("No jobs found.");
        println!("Use 'voxrelay submit <text> --backend <id>' to queue one.");
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<12} {:<8} {:<20} Text",
        "ID", "Status", "Backend", "Length", "Created"
    );
    print_separator(110);
    for job in jobs {
        println!(
            "{:<36} {:<10} {:<12} {:<8} {:<20} {}",
            job.id,
            job.status,
            truncate_string(&job.backend_id, 11),
            format_duration(job.duration_seconds),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate_string(&job.text, 30)
        );
    }
    Ok(())
}

/// Cancel a QUEUED job.
pub async fn cancel(ctx: &CliContext, job_id: &str) -> Result<()> {
    let job = ctx
        .app()
        .jobs()
        .cancel(&JobId::from(job_id))
        .await
        .map_err(CliError::from)?;
    println!("Job {} cancelled.", job.id);
    Ok(())
}

/// Delete a job record.
pub async fn delete(ctx: &CliContext, job_id: &str) -> Result<()> {
    let id = JobId::from(job_id);
    if ctx.app().jobs().delete(&id).await.map_err(CliError::from)? {
        println!("Job {id} deleted.");
        Ok(())
    } else {
        Err(CliError::NotFound(format!("job {id}")).into())
    }
}
