//! Backend capability provider ports.
//!
//! Synthesis and conversion engines are opaque. The core only knows how to
//! ask a factory for an instance on a device and how to call it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AudioArtifact, BackendFailure, ConversionModel, ParamMap};

/// Where a backend instance is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePlacement {
    #[default]
    Cpu,
    /// A CUDA device by ordinal.
    Cuda(u32),
    Metal,
}

impl fmt::Display for DevicePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Self::Metal => f.write_str("metal"),
        }
    }
}

impl FromStr for DevicePlacement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "metal" | "mps" => Ok(Self::Metal),
            "cuda" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| format!("unknown device '{other}' (expected cpu, cuda:N or metal)")),
        }
    }
}

impl TryFrom<String> for DevicePlacement {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePlacement> for String {
    fn from(value: DevicePlacement) -> Self {
        value.to_string()
    }
}

/// A loaded synthesis or conversion engine.
///
/// Instances are shared between concurrent leases, so calls take `&self`.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Identifier this instance was created for.
    fn backend_id(&self) -> &str;

    /// Turn text into audio.
    async fn synthesize(&self, text: &str, params: &ParamMap)
    -> Result<AudioArtifact, BackendFailure>;

    /// Reshape audio toward the voice of `model`.
    ///
    /// Synthesis-only engines keep the default, which refuses.
    async fn convert(
        &self,
        audio: &AudioArtifact,
        model: &ConversionModel,
        params: &ParamMap,
    ) -> Result<AudioArtifact, BackendFailure> {
        let _ = (audio, model, params);
        Err(BackendFailure::new(
            self.backend_id(),
            "backend does not support voice conversion",
        ))
    }
}

/// Creates backend instances on demand.
pub trait BackendFactory: Send + Sync {
    /// Approximate device memory one instance occupies, in bytes.
    ///
    /// `None` means the backend identifier is unknown.
    fn footprint_bytes(&self, backend_id: &str) -> Option<u64>;

    /// Load a new instance. May block for seconds.
    fn instantiate(
        &self,
        backend_id: &str,
        device: DevicePlacement,
    ) -> Result<Arc<dyn SynthesisBackend>, BackendFailure>;

    /// Identifiers this factory can instantiate.
    fn available(&self) -> Vec<String>;
}
