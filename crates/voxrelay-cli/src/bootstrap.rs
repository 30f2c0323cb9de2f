//! CLI bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the CLI adapter:
//! - Configuration (`.env` + `VOXRELAY_*` over defaults)
//! - Logging (`tracing-subscriber`)
//! - Database pool and repositories (via voxrelay-db)
//! - Core services (via voxrelay-core)
//!
//! The worker command additionally builds the runtime from the context.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use voxrelay_core::paths::ensure_directory;
use voxrelay_core::{AppCore, ServiceConfig};
use voxrelay_db::{CoreFactory, setup_database};

use crate::error::CliError;

/// Fully composed application context for CLI commands.
pub struct CliContext {
    /// The core application facade.
    pub app: AppCore,
    /// Resolved service configuration.
    pub config: ServiceConfig,
}

impl CliContext {
    /// Assemble a context from an already composed core (for testing).
    pub const fn new(app: AppCore, config: ServiceConfig) -> Self {
        Self { app, config }
    }

    /// Access the AppCore.
    pub const fn app(&self) -> &AppCore {
        &self.app
    }

    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `debug` and the
/// default is `info`. Logs go to stderr so command output stays clean.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load `.env` from the working directory, if present. Variables already
/// set in the process environment are not overridden.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::trace!(path = %path.display(), "Loaded .env");
    }
}

/// Load configuration from the environment.
///
/// `data_dir` (from `--data-dir`) re-roots every default path; explicit
/// per-path variables still take precedence.
pub fn load_config(data_dir: Option<&str>) -> Result<ServiceConfig, CliError> {
    let config = match data_dir {
        Some(dir) => ServiceConfig::from_lookup(|key| {
            if key == "VOXRELAY_DATA_DIR" {
                Some(dir.to_string())
            } else {
                std::env::var(key).ok()
            }
        })?,
        None => ServiceConfig::from_env()?,
    };
    Ok(config)
}

/// Bootstrap the CLI application.
///
/// 1. Ensures the data directory exists and is writable
/// 2. Opens the database (creating the schema if needed)
/// 3. Assembles the `AppCore` from repositories and configuration
pub async fn bootstrap(config: ServiceConfig) -> Result<CliContext> {
    ensure_directory(&config.data_dir)
        .map_err(|e| CliError::Config(e.to_string()))
        .with_context(|| format!("preparing data directory {}", config.data_dir.display()))?;

    let pool = setup_database(&config.database_path)
        .await
        .map_err(|e| CliError::Database(format!("{e:#}")))?;
    let app = CoreFactory::build_app_core(pool, &config);

    tracing::debug!(
        data_dir = %config.data_dir.display(),
        database = %config.database_path.display(),
        "CLI context ready"
    );
    Ok(CliContext { app, config })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_data_dir_override_reroots_paths() {
        let config = load_config(Some("/tmp/voxrelay-test-root")).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/voxrelay-test-root"));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::rooted_at(dir.path().join("data"));

        let ctx = bootstrap(config.clone()).await.unwrap();

        assert!(config.database_path.exists());
        let jobs = ctx
            .app()
            .jobs()
            .list(&voxrelay_core::JobFilter::default())
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }
}
