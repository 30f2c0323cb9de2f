//! CLI entry point - the composition root.
//!
//! Parses arguments, loads configuration, installs logging, bootstraps the
//! core and routes to a handler. Errors are printed once and mapped to an
//! exit code.

use clap::{CommandFactory, Parser};

use voxrelay_cli::{Cli, Commands, bootstrap, exit_code_for, handlers, init_tracing};

#[tokio::main]
async fn main() {
    bootstrap::load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = bootstrap::load_config(cli.data_dir.as_deref())?;
    let ctx = bootstrap(config).await?;

    match command {
        Commands::Submit(args) => handlers::submit::execute(&ctx, args).await,
        Commands::Status { job_id, json } => handlers::jobs::status(&ctx, &job_id, json).await,
        Commands::List {
            status,
            backend,
            limit,
        } => handlers::jobs::list(&ctx, status, backend, limit).await,
        Commands::Cancel { job_id } => handlers::jobs::cancel(&ctx, &job_id).await,
        Commands::Delete { job_id } => handlers::jobs::delete(&ctx, &job_id).await,
        Commands::Profiles { command } => handlers::profiles::execute(&ctx, command).await,
        Commands::Models { command } => handlers::models::execute(&ctx, command).await,
        Commands::Voices { command } => handlers::voices::execute(&ctx, command).await,
        Commands::Worker(args) => handlers::worker::execute(&ctx, args).await,
        Commands::Housekeep => handlers::housekeep::execute(&ctx).await,
    }
}
