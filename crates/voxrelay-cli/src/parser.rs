//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for the voxrelay synthesis job service.
#[derive(Parser)]
#[command(name = "voxrelay")]
#[command(about = "Queue, run and inspect speech synthesis jobs")]
#[command(version)]
pub struct Cli {
    /// Override the data directory for this invocation
    #[arg(long = "data-dir", global = true, env = "VOXRELAY_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["voxrelay", "--verbose", "--data-dir", "/tmp/vox", "list"]);
        assert!(cli.verbose);
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/vox"));
        assert!(matches!(cli.command, Some(Commands::List { .. })));
    }

    #[test]
    fn test_global_args_after_subcommand() {
        let cli = Cli::parse_from(["voxrelay", "housekeep", "-v"]);
        assert!(cli.verbose);
    }
}
