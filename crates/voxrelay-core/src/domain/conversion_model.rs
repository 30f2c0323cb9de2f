//! Uploaded voice-conversion model artifacts.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of hex characters of the weight digest used as the identifier.
pub const MODEL_ID_LEN: usize = 16;

/// Content-derived identifier: a prefix of the weight file's SHA-256.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionModelId(String);

impl ConversionModelId {
    /// Derive the identifier from a full hex digest.
    #[must_use]
    pub fn from_digest(hex_digest: &str) -> Self {
        Self(hex_digest.chars().take(MODEL_ID_LEN).collect())
    }

    /// Wrap an identifier supplied by a caller or read from storage.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like an identifier this system would generate.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == MODEL_ID_LEN && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for ConversionModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A published conversion model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionModel {
    pub id: ConversionModelId,
    /// Unique among stored models.
    pub display_name: String,
    pub weights_path: PathBuf,
    pub index_path: Option<PathBuf>,
    /// Combined size of the weight and index files.
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Source files for a model import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUpload {
    pub display_name: String,
    pub weights: PathBuf,
    pub index: Option<PathBuf>,
}

impl ModelUpload {
    pub fn new(display_name: impl Into<String>, weights: impl Into<PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            weights: weights.into(),
            index: None,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: impl Into<PathBuf>) -> Self {
        self.index = Some(index.into());
        self
    }
}
