//! Audio artifacts and backend parameter maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named backend settings. Ordered so serialized output is stable.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// Encoded audio produced by a backend, plus its length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    /// WAV-encoded bytes.
    pub bytes: Vec<u8>,
    pub duration_seconds: f64,
}

impl AudioArtifact {
    #[must_use]
    pub const fn new(bytes: Vec<u8>, duration_seconds: f64) -> Self {
        Self {
            bytes,
            duration_seconds,
        }
    }
}

/// What happened to the optional conversion stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ConversionOutcome {
    NotRequested,
    Applied,
    /// Conversion raised; the unconverted audio was delivered instead.
    SkippedDueToError(String),
}

impl ConversionOutcome {
    #[must_use]
    pub const fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[must_use]
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::SkippedDueToError(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Final output of a pipeline run, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub audio: AudioArtifact,
    pub conversion: ConversionOutcome,
}
