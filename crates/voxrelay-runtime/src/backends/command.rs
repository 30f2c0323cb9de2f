//! Backends implemented by external executables.
//!
//! Each backend is declared in a JSON file:
//!
//! ```json
//! {
//!   "backends": [
//!     { "id": "piper", "command": "/opt/tts/piper-wrap", "footprint_mb": 512 },
//!     { "id": "rvc", "command": "rvc-convert", "footprint_mb": 1024, "supports_conversion": true }
//!   ]
//! }
//! ```
//!
//! Synthesis writes the text to the process's stdin and expects WAV bytes on
//! stdout. Conversion writes WAV to stdin and passes the model files through
//! `VOXRELAY_MODEL_WEIGHTS` / `VOXRELAY_MODEL_INDEX`. Parameters are passed
//! as a JSON object in `VOXRELAY_PARAMS`, the operation in `VOXRELAY_MODE`
//! and the device in `VOXRELAY_DEVICE`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use voxrelay_core::{
    AudioArtifact, BackendFactory, BackendFailure, ConversionModel, DevicePlacement, ParamMap,
    SynthesisBackend,
};

use super::wav::wav_duration;

pub const ENV_PARAMS: &str = "VOXRELAY_PARAMS";
pub const ENV_MODE: &str = "VOXRELAY_MODE";
pub const ENV_DEVICE: &str = "VOXRELAY_DEVICE";
pub const ENV_MODEL_WEIGHTS: &str = "VOXRELAY_MODEL_WEIGHTS";
pub const ENV_MODEL_INDEX: &str = "VOXRELAY_MODEL_INDEX";

const STDERR_TAIL_CHARS: usize = 512;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Errors loading the backends file.
#[derive(Debug, Error)]
pub enum BackendConfigError {
    #[error("failed to read backends file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backends file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("backend '{0}' is declared more than once")]
    Duplicate(String),

    #[error("backend '{id}': {reason}")]
    Invalid { id: String, reason: String },
}

/// One declared backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub id: String,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Memory one loaded instance is accounted for.
    #[serde(default)]
    pub footprint_mb: u64,
    #[serde(default)]
    pub supports_conversion: bool,
    /// Kill the process after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    pub fn new(id: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            footprint_mb: 0,
            supports_conversion: false,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BackendsFile {
    backends: Vec<CommandSpec>,
}

/// Factory over the backends declared in a JSON file.
#[derive(Debug, Clone, Default)]
pub struct CommandBackendFactory {
    specs: HashMap<String, CommandSpec>,
}

impl CommandBackendFactory {
    /// Read and validate a backends file.
    pub fn load(path: &Path) -> Result<Self, BackendConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| BackendConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, BackendConfigError> {
        let file: BackendsFile = serde_json::from_str(contents)?;
        Self::from_specs(file.backends)
    }

    pub fn from_specs(specs: Vec<CommandSpec>) -> Result<Self, BackendConfigError> {
        let mut by_id = HashMap::with_capacity(specs.len());
        for spec in specs {
            if spec.id.trim().is_empty() {
                return Err(BackendConfigError::Invalid {
                    id: spec.id,
                    reason: "identifier is empty".into(),
                });
            }
            if spec.command.as_os_str().is_empty() {
                return Err(BackendConfigError::Invalid {
                    id: spec.id,
                    reason: "command is empty".into(),
                });
            }
            if by_id.contains_key(&spec.id) {
                return Err(BackendConfigError::Duplicate(spec.id));
            }
            by_id.insert(spec.id.clone(), spec);
        }
        Ok(Self { specs: by_id })
    }

    #[must_use]
    pub fn spec(&self, backend_id: &str) -> Option<&CommandSpec> {
        self.specs.get(backend_id)
    }
}

impl BackendFactory for CommandBackendFactory {
    fn footprint_bytes(&self, backend_id: &str) -> Option<u64> {
        self.specs
            .get(backend_id)
            .map(|spec| spec.footprint_mb.saturating_mul(BYTES_PER_MB))
    }

    fn instantiate(
        &self,
        backend_id: &str,
        device: DevicePlacement,
    ) -> Result<Arc<dyn SynthesisBackend>, BackendFailure> {
        let spec = self
            .specs
            .get(backend_id)
            .ok_or_else(|| BackendFailure::new(backend_id, "backend is not declared"))?;

        // Bare names are resolved through PATH when the process starts.
        if spec.command.components().count() > 1 && !spec.command.is_file() {
            return Err(BackendFailure::new(
                backend_id,
                format!("executable not found: {}", spec.command.display()),
            ));
        }

        Ok(Arc::new(CommandBackend {
            spec: spec.clone(),
            device,
        }))
    }

    fn available(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// A backend that runs its executable once per call.
#[derive(Debug)]
pub struct CommandBackend {
    spec: CommandSpec,
    device: DevicePlacement,
}

impl CommandBackend {
    async fn run(&self, input: &[u8], env: &[(&str, String)]) -> Result<Vec<u8>, BackendFailure> {
        let id = self.spec.id.as_str();
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .env(ENV_DEVICE, self.device.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        debug!(backend_id = id, command = %self.spec.command.display(), "Starting backend process");
        let mut child = cmd.spawn().map_err(|e| {
            BackendFailure::poisoned(
                id,
                format!("failed to start {}: {e}", self.spec.command.display()),
            )
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendFailure::new(id, "stdin was not captured"))?;

        let feed = async move {
            stdin.write_all(input).await?;
            stdin.shutdown().await
        };
        let exchange = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = match self.spec.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exchange)
                .await
                .map_err(|_| BackendFailure::new(id, format!("timed out after {secs}s")))?,
            None => exchange.await,
        };
        let output = output.map_err(|e| BackendFailure::new(id, format!("process error: {e}")))?;

        if !output.status.success() {
            return Err(BackendFailure::new(
                id,
                format!("exited with {}: {}", output.status, stderr_tail(&output.stderr)),
            ));
        }
        if let Err(e) = fed {
            debug!(backend_id = id, error = %e, "Backend closed stdin early");
        }
        Ok(output.stdout)
    }

    fn artifact(&self, bytes: Vec<u8>) -> Result<AudioArtifact, BackendFailure> {
        let duration = wav_duration(&bytes).map_err(|e| {
            BackendFailure::new(self.spec.id.as_str(), format!("output is not valid WAV: {e}"))
        })?;
        Ok(AudioArtifact::new(bytes, duration))
    }

    fn params_json(&self, params: &ParamMap) -> Result<String, BackendFailure> {
        serde_json::to_string(params).map_err(|e| {
            BackendFailure::new(self.spec.id.as_str(), format!("unserializable params: {e}"))
        })
    }
}

#[async_trait]
impl SynthesisBackend for CommandBackend {
    fn backend_id(&self) -> &str {
        &self.spec.id
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &ParamMap,
    ) -> Result<AudioArtifact, BackendFailure> {
        let env = [
            (ENV_MODE, "synthesize".to_string()),
            (ENV_PARAMS, self.params_json(params)?),
        ];
        let stdout = self.run(text.as_bytes(), &env).await?;
        self.artifact(stdout)
    }

    async fn convert(
        &self,
        audio: &AudioArtifact,
        model: &ConversionModel,
        params: &ParamMap,
    ) -> Result<AudioArtifact, BackendFailure> {
        if !self.spec.supports_conversion {
            return Err(BackendFailure::new(
                self.spec.id.as_str(),
                "backend does not support voice conversion",
            ));
        }

        let mut env = vec![
            (ENV_MODE, "convert".to_string()),
            (ENV_PARAMS, self.params_json(params)?),
            (ENV_MODEL_WEIGHTS, model.weights_path.display().to_string()),
        ];
        if let Some(index) = &model.index_path {
            env.push((ENV_MODEL_INDEX, index.display().to_string()));
        }
        let stdout = self.run(&audio.bytes, &env).await?;
        self.artifact(stdout)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}
