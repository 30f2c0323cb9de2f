//! Subcommands administering the profile, model and voice stores.

use std::path::PathBuf;

use clap::Subcommand;

/// Quality profile commands.
#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// List stored profiles
    List {
        /// Only profiles for this backend
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// Create or replace a profile
    Set {
        /// Backend the profile applies to
        backend: String,
        /// Profile name
        name: String,
        /// Parameter as KEY=VALUE; VALUE is parsed as JSON, falling back to a string
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Make this the backend's default profile
        #[arg(long)]
        default: bool,
    },

    /// Remove a profile
    Remove {
        /// Backend the profile applies to
        backend: String,
        /// Profile name
        name: String,
    },
}

/// Conversion model commands.
#[derive(Subcommand, Debug)]
pub enum ModelCommand {
    /// Import a model from its weight file
    Import {
        /// Display name for the model
        name: String,
        /// Primary weight file (.pth or .safetensors)
        weights: PathBuf,
        /// Optional retrieval index file
        #[arg(long)]
        index: Option<PathBuf>,
    },

    /// List imported models
    List,

    /// Remove a model and its files
    Remove {
        /// Model identifier or display name
        model: String,
    },
}

/// Voice profile commands.
#[derive(Subcommand, Debug)]
pub enum VoiceCommand {
    /// Register a reference recording
    Add {
        /// Voice name
        name: String,
        /// Reference audio file
        audio: PathBuf,
        /// Transcript of the reference audio
        #[arg(long)]
        text: Option<String>,
        /// Language spoken in the reference audio
        #[arg(long)]
        language: Option<String>,
    },

    /// List voice profiles
    List,

    /// Remove a voice profile
    Remove {
        /// Voice profile identifier
        id: String,
    },
}
