//! Voice profiles used to condition cloning-mode synthesis.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored reference voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    pub name: String,
    /// Path to a reference recording of the target speaker.
    pub reference_audio: PathBuf,
    /// Transcript of the reference recording, if known.
    pub reference_text: Option<String>,
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VoiceProfile {
    /// Create a profile with a freshly generated identifier.
    pub fn new(name: impl Into<String>, reference_audio: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            reference_audio: reference_audio.into(),
            reference_text: None,
            language: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_reference_text(mut self, text: impl Into<String>) -> Self {
        self.reference_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}
