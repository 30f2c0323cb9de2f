//! Quality profiles: named, backend-specific parameter bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audio::ParamMap;

/// A named parameter bundle for one backend.
///
/// At most one profile per backend carries `is_default = true`; the store
/// enforces this on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub name: String,
    pub backend_id: String,
    pub params: ParamMap,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    /// Excluded from lookup once reached; removed by housekeeping.
    pub expires_at: Option<DateTime<Utc>>,
}

impl QualityProfile {
    pub fn new(name: impl Into<String>, backend_id: impl Into<String>, params: ParamMap) -> Self {
        Self {
            name: name.into(),
            backend_id: backend_id.into(),
            params,
            is_default: false,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    #[must_use]
    pub const fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
