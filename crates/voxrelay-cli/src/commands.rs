//! Main commands enum and job/worker subcommands.

use clap::{Args, Subcommand};
use voxrelay_core::{JobStatus, RegistryScope};

use crate::store_commands::{ModelCommand, ProfileCommand, VoiceCommand};

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Queue a synthesis job
    Submit(SubmitArgs),

    /// Show one job
    Status {
        /// Job identifier
        job_id: String,
        /// Print the job as JSON
        #[arg(long)]
        json: bool,
    },

    /// List jobs
    List {
        /// Only jobs with this status (queued, running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<JobStatus>,
        /// Only jobs for this backend
        #[arg(short, long)]
        backend: Option<String>,
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Cancel a job that has not started
    Cancel {
        /// Job identifier
        job_id: String,
    },

    /// Delete a job record, whatever its status
    Delete {
        /// Job identifier
        job_id: String,
    },

    /// Manage quality profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// Manage voice conversion models
    Models {
        #[command(subcommand)]
        command: ModelCommand,
    },

    /// Manage voice profiles used for cloning
    Voices {
        #[command(subcommand)]
        command: VoiceCommand,
    },

    /// Run the worker pool until interrupted
    Worker(WorkerArgs),

    /// Purge expired jobs and profiles, and report stuck jobs
    Housekeep,
}

/// Arguments for `voxrelay submit`.
#[derive(Args, Debug, Clone, Default)]
pub struct SubmitArgs {
    /// Text to synthesize
    pub text: String,

    /// Synthesis backend identifier
    #[arg(short, long)]
    pub backend: String,

    /// Quality profile name (falls back to the backend default)
    #[arg(short = 'p', long = "profile")]
    pub quality_profile: Option<String>,

    /// Voice profile to clone; switches the job to cloning mode
    #[arg(long)]
    pub voice: Option<String>,

    /// Language of the input text
    #[arg(long = "source-lang")]
    pub source_language: Option<String>,

    /// Language to speak in
    #[arg(long = "target-lang")]
    pub target_language: Option<String>,

    /// Conversion model (identifier or name) to apply after synthesis
    #[arg(long = "convert")]
    pub conversion_model: Option<String>,

    /// Pitch shift in semitones
    #[arg(long, allow_hyphen_values = true, requires = "conversion_model")]
    pub pitch: Option<i32>,

    /// Retrieval index mix ratio
    #[arg(long, requires = "conversion_model")]
    pub index_ratio: Option<f32>,

    /// Pitch median filter radius
    #[arg(long, requires = "conversion_model")]
    pub filter_radius: Option<u32>,

    /// Volume envelope mix ratio
    #[arg(long, requires = "conversion_model")]
    pub envelope_ratio: Option<f32>,

    /// Voiceless consonant protection
    #[arg(long, requires = "conversion_model")]
    pub protect_ratio: Option<f32>,
}

/// Arguments for `voxrelay worker`.
#[derive(Args, Debug, Clone, Default)]
pub struct WorkerArgs {
    /// Number of worker threads (overrides VOXRELAY_WORKERS)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Registry scope: per_worker or shared (overrides VOXRELAY_REGISTRY_SCOPE)
    #[arg(long)]
    pub scope: Option<RegistryScope>,

    /// Memory budget in MiB (overrides VOXRELAY_MEMORY_BUDGET_MB)
    #[arg(long = "memory-budget-mb")]
    pub memory_budget_mb: Option<u64>,

    /// Evict backends as soon as their last lease is returned
    #[arg(long)]
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use crate::parser::Cli;
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command.unwrap()
    }

    #[test]
    fn test_submit_minimal() {
        let Commands::Submit(args) = parse(&["voxrelay", "submit", "Hello", "--backend", "A"]) else {
            panic!("expected submit");
        };
        assert_eq!(args.text, "Hello");
        assert_eq!(args.backend, "A");
        assert!(args.conversion_model.is_none());
        assert!(args.voice.is_none());
    }

    #[test]
    fn test_submit_with_conversion_params() {
        let Commands::Submit(args) = parse(&[
            "voxrelay", "submit", "Hi", "-b", "A", "--convert", "alice", "--pitch", "-5",
            "--index-ratio", "0.5",
        ]) else {
            panic!("expected submit");
        };
        assert_eq!(args.conversion_model.as_deref(), Some("alice"));
        assert_eq!(args.pitch, Some(-5));
        assert_eq!(args.index_ratio, Some(0.5));
    }

    #[test]
    fn test_conversion_params_require_a_model() {
        let result = Cli::try_parse_from(["voxrelay", "submit", "Hi", "-b", "A", "--pitch", "3"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_list_status_filter() {
        let Commands::List { status, limit, .. } =
            parse(&["voxrelay", "list", "--status", "failed"])
        else {
            panic!("expected list");
        };
        assert_eq!(status, Some(JobStatus::Failed));
        assert_eq!(limit, 50);
    }

    #[test]
    fn test_list_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["voxrelay", "list", "--status", "paused"]).is_err());
    }

    #[test]
    fn test_worker_overrides() {
        let Commands::Worker(args) =
            parse(&["voxrelay", "worker", "--workers", "4", "--scope", "shared", "--degraded"])
        else {
            panic!("expected worker");
        };
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.scope, Some(RegistryScope::Shared));
        assert!(args.degraded);
    }
}
