//! Service configuration.
//!
//! Values come from `VOXRELAY_*` environment variables layered over
//! defaults. Binaries load `.env` before calling [`ServiceConfig::from_env`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::default_data_dir;
use crate::ports::DevicePlacement;

pub const DEFAULT_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_JOB_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_QUALITY_PROFILE_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_STUCK_AFTER_SECS: u64 = 60 * 60;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CONVERSION_BACKEND_ID: &str = "rvc";

/// Upper bound for any TTL setting (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Whether backend instances are cached per worker or shared by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryScope {
    /// Each worker owns its registry; a backend may be loaded once per worker.
    #[default]
    PerWorker,
    /// One registry for the whole pool.
    Shared,
}

impl fmt::Display for RegistryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerWorker => "per_worker",
            Self::Shared => "shared",
        })
    }
}

impl FromStr for RegistryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_worker" | "worker" => Ok(Self::PerWorker),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown registry scope '{other}'")),
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Worker count must be between 1 and {MAX_WORKERS}, got {0}")]
    InvalidWorkers(usize),

    #[error("{0} must be between 1 and {MAX_TTL_SECS} seconds")]
    InvalidDuration(&'static str),

    #[error("Memory budget must be positive")]
    ZeroMemoryBudget,

    #[error("Conversion backend identifier cannot be empty")]
    EmptyConversionBackend,
}

/// Runtime configuration for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    /// Root of the content-addressed conversion model layout.
    pub conversion_models_dir: PathBuf,
    pub results_dir: PathBuf,
    /// JSON file declaring the command-backed capability providers.
    pub backends_file: PathBuf,
    pub workers: usize,
    pub device: DevicePlacement,
    /// Device memory budget for cached backends. Derived from the device
    /// capacity when unset.
    pub memory_budget_mb: Option<u64>,
    /// Evict every backend as soon as its last lease is released.
    pub degraded_memory_mode: bool,
    pub registry_scope: RegistryScope,
    pub job_ttl_secs: u64,
    /// Lifetime given to newly stored quality profiles. `0` disables expiry.
    pub quality_profile_ttl_secs: u64,
    /// RUNNING jobs older than this are reported by housekeeping.
    pub stuck_after_secs: u64,
    pub poll_interval_ms: u64,
    /// Backend that performs voice conversion.
    pub conversion_backend_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::rooted_at(default_data_dir())
    }
}

impl ServiceConfig {
    /// Defaults with every path placed under `data_dir`.
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join("voxrelay.db"),
            conversion_models_dir: data_dir.join("conversion-models"),
            results_dir: data_dir.join("results"),
            backends_file: data_dir.join("backends.json"),
            data_dir,
            workers: DEFAULT_WORKERS,
            device: DevicePlacement::Cpu,
            memory_budget_mb: None,
            degraded_memory_mode: false,
            registry_scope: RegistryScope::PerWorker,
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            quality_profile_ttl_secs: DEFAULT_QUALITY_PROFILE_TTL_SECS,
            stuck_after_secs: DEFAULT_STUCK_AFTER_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            conversion_backend_id: DEFAULT_CONVERSION_BACKEND_ID.to_string(),
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = get("VOXRELAY_DATA_DIR").map_or_else(Self::default, |dir| Self::rooted_at(dir));

        if let Some(v) = get("VOXRELAY_DATABASE_PATH") {
            config.database_path = v.into();
        }
        if let Some(v) = get("VOXRELAY_CONVERSION_MODELS_DIR") {
            config.conversion_models_dir = v.into();
        }
        if let Some(v) = get("VOXRELAY_RESULTS_DIR") {
            config.results_dir = v.into();
        }
        if let Some(v) = get("VOXRELAY_BACKENDS_FILE") {
            config.backends_file = v.into();
        }
        if let Some(v) = get("VOXRELAY_WORKERS") {
            config.workers = parse_value("VOXRELAY_WORKERS", &v)?;
        }
        if let Some(v) = get("VOXRELAY_DEVICE") {
            config.device = parse_value("VOXRELAY_DEVICE", &v)?;
        }
        if let Some(v) = get("VOXRELAY_MEMORY_BUDGET_MB") {
            config.memory_budget_mb = Some(parse_value("VOXRELAY_MEMORY_BUDGET_MB", &v)?);
        }
        if let Some(v) = get("VOXRELAY_DEGRADED_MEMORY_MODE") {
            config.degraded_memory_mode = parse_bool("VOXRELAY_DEGRADED_MEMORY_MODE", &v)?;
        }
        if let Some(v) = get("VOXRELAY_REGISTRY_SCOPE") {
            config.registry_scope = parse_value("VOXRELAY_REGISTRY_SCOPE", &v)?;
        }
        if let Some(v) = get("VOXRELAY_JOB_TTL_SECS") {
            config.job_ttl_secs = parse_value("VOXRELAY_JOB_TTL_SECS", &v)?;
        }
        if let Some(v) = get("VOXRELAY_QUALITY_PROFILE_TTL_SECS") {
            config.quality_profile_ttl_secs =
                parse_value("VOXRELAY_QUALITY_PROFILE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("VOXRELAY_STUCK_AFTER_SECS") {
            config.stuck_after_secs = parse_value("VOXRELAY_STUCK_AFTER_SECS", &v)?;
        }
        if let Some(v) = get("VOXRELAY_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_value("VOXRELAY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("VOXRELAY_CONVERSION_BACKEND") {
            config.conversion_backend_id = v.trim().to_string();
        }

        validate_config(&config)?;
        Ok(config)
    }

    #[must_use]
    pub fn job_ttl(&self) -> TimeDelta {
        seconds(self.job_ttl_secs)
    }

    /// `None` when stored profiles never expire.
    #[must_use]
    pub fn quality_profile_ttl(&self) -> Option<TimeDelta> {
        (self.quality_profile_ttl_secs > 0).then(|| seconds(self.quality_profile_ttl_secs))
    }

    #[must_use]
    pub fn stuck_after(&self) -> TimeDelta {
        seconds(self.stuck_after_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Explicit memory budget in bytes, if configured.
    #[must_use]
    pub fn memory_budget_bytes(&self) -> Option<u64> {
        self.memory_budget_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Validate configuration values.
pub fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if !(1..=MAX_WORKERS).contains(&config.workers) {
        return Err(ConfigError::InvalidWorkers(config.workers));
    }

    for (name, value) in [
        ("job_ttl_secs", config.job_ttl_secs),
        ("stuck_after_secs", config.stuck_after_secs),
        ("poll_interval_ms", config.poll_interval_ms),
    ] {
        if !(1..=MAX_TTL_SECS).contains(&value) {
            return Err(ConfigError::InvalidDuration(name));
        }
    }

    if config.quality_profile_ttl_secs > MAX_TTL_SECS {
        return Err(ConfigError::InvalidDuration("quality_profile_ttl_secs"));
    }

    if config.memory_budget_mb == Some(0) {
        return Err(ConfigError::ZeroMemoryBudget);
    }

    if config.conversion_backend_id.trim().is_empty() {
        return Err(ConfigError::EmptyConversionBackend);
    }

    Ok(())
}
