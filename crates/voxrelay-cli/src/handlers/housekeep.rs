//! Housekeeping handler.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;

/// Run one housekeeping pass and summarize it.
pub async fn execute(ctx: &CliContext) -> Result<()> {
    let report = ctx
        .app()
        .housekeeping()
        .run_once()
        .await
        .map_err(CliError::from)?;

    println!(
        "Purged {} expired job(s) and {} stored result(s).",
        report.purged_jobs, report.purged_results
    );
    println!("Purged {} expired quality profile(s).", report.purged_profiles);
    if report.stuck_jobs.is_empty() {
        println!("No stuck jobs.");
    } else {
        println!("{} job(s) appear stuck in RUNNING:", report.stuck_jobs.len());
        for job in &report.stuck_jobs {
            println!(
                "  {} (backend {}, last update {})",
                job.id,
                job.backend_id,
                job.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}
