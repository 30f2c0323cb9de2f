//! Conversion model store - content-addressed model files plus metadata.
//!
//! Layout: `<root>/<model-id>/weights.<ext>` and, when supplied,
//! `<root>/<model-id>/index.<ext>`. A model becomes visible to lookup only
//! after its staged weight file has been validated and moved into place.
//! Imports and removals through one store run one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ConversionModel, ConversionModelId, ModelUpload};
use crate::ports::{ConversionModelRepository, CoreError, RepositoryError};
use crate::utils::weights::{compute_sha256, validate_weight_file};

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

pub struct ConversionModelStore {
    repo: Arc<dyn ConversionModelRepository>,
    root: PathBuf,
    /// Held across the directory and record steps of import and remove.
    publish: Mutex<()>,
}

impl ConversionModelStore {
    pub fn new(repo: Arc<dyn ConversionModelRepository>, root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            root: root.into(),
            publish: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate, copy and publish an uploaded model.
    ///
    /// Nothing is published if any step fails; staged files are removed.
    pub async fn import(&self, upload: ModelUpload) -> Result<ConversionModel, CoreError> {
        let display_name = upload.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(CoreError::Validation("model name cannot be empty".into()));
        }
        let _publish = self.publish.lock().await;
        match self.repo.get_by_name(&display_name).await {
            Ok(_) => {
                return Err(RepositoryError::AlreadyExists(format!(
                    "conversion model named '{display_name}'"
                ))
                .into());
            }
            Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir(&staging).await?;

        match self.stage_and_publish(&staging, &display_name, &upload).await {
            Ok(model) => Ok(model),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                }
                Err(e)
            }
        }
    }

    async fn stage_and_publish(
        &self,
        staging: &Path,
        display_name: &str,
        upload: &ModelUpload,
    ) -> Result<ConversionModel, CoreError> {
        let weights_name = staged_name("weights", &upload.weights);
        let staged_weights = staging.join(&weights_name);
        let mut size_bytes = copy_file(&upload.weights, &staged_weights).await?;

        let index_name = match &upload.index {
            Some(index) => {
                let name = staged_name("index", index);
                size_bytes += copy_file(index, &staging.join(&name)).await?;
                Some(name)
            }
            None => None,
        };

        // Validate the copy that will actually be published.
        let digest = {
            let path = staged_weights.clone();
            tokio::task::spawn_blocking(move || {
                validate_weight_file(&path)?;
                compute_sha256(&path)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("weight validation task failed: {e}")))?
            .map_err(|e| CoreError::Validation(format!("invalid weight file: {e}")))?
        };
        let id = ConversionModelId::from_digest(&digest);

        match self.repo.get(&id).await {
            Ok(existing) => {
                return Err(RepositoryError::AlreadyExists(format!(
                    "conversion model {id} (as '{}')",
                    existing.display_name
                ))
                .into());
            }
            Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let final_dir = self.model_dir(&id);
        if tokio::fs::try_exists(&final_dir).await? {
            // Left behind by an interrupted import; no record references it.
            tracing::warn!(model_id = %id, "Replacing orphaned model directory");
            tokio::fs::remove_dir_all(&final_dir).await?;
        }
        tokio::fs::rename(staging, &final_dir).await?;

        let model = ConversionModel {
            weights_path: final_dir.join(&weights_name),
            index_path: index_name.map(|name| final_dir.join(name)),
            id,
            display_name: display_name.to_string(),
            size_bytes,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repo.insert(&model).await {
            self.discard_unpublished(&model.id, &final_dir).await;
            return Err(e.into());
        }

        tracing::info!(
            model_id = %model.id,
            name = %model.display_name,
            size_bytes = model.size_bytes,
            "Conversion model published"
        );
        Ok(model)
    }

    /// Remove a directory this import moved into place, unless a record
    /// for the same id now owns it.
    async fn discard_unpublished(&self, id: &ConversionModelId, dir: &Path) {
        match self.repo.get(id).await {
            Ok(_) => {
                tracing::warn!(model_id = %id, "Model directory is owned by an existing record, keeping it");
            }
            Err(RepositoryError::NotFound(_)) => {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to remove unpublished model directory");
                }
            }
            Err(e) => {
                tracing::warn!(model_id = %id, error = %e, "Cannot tell whether model directory is published, keeping it");
            }
        }
    }

    /// Look up a model by identifier, then by display name.
    pub async fn resolve(&self, reference: &str) -> Result<Option<ConversionModel>, CoreError> {
        match self.repo.get(&ConversionModelId::new(reference)).await {
            Ok(model) => return Ok(Some(model)),
            Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        match self.repo.get_by_name(reference).await {
            Ok(model) => Ok(Some(model)),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<ConversionModel>, CoreError> {
        self.repo.list().await.map_err(CoreError::from)
    }

    /// Remove a model's record and its directory as one unit.
    ///
    /// The directory is first moved aside; if the record cannot be deleted
    /// it is moved back and the model stays intact.
    pub async fn remove(&self, reference: &str) -> Result<ConversionModel, CoreError> {
        let _publish = self.publish.lock().await;
        let model = self
            .resolve(reference)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("conversion model {reference}")))?;

        let dir = self.model_dir(&model.id);
        let trash = self
            .root
            .join(format!("{TRASH_PREFIX}{}", Uuid::new_v4().simple()));
        let moved = if tokio::fs::try_exists(&dir).await? {
            tokio::fs::rename(&dir, &trash).await?;
            true
        } else {
            tracing::warn!(model_id = %model.id, "Model directory already missing");
            false
        };

        if let Err(e) = self.repo.delete(&model.id).await {
            if moved && let Err(restore) = tokio::fs::rename(&trash, &dir).await {
                tracing::error!(
                    model_id = %model.id,
                    path = %trash.display(),
                    error = %restore,
                    "Failed to restore model files after a failed removal"
                );
            }
            return Err(e.into());
        }

        if moved && let Err(e) = tokio::fs::remove_dir_all(&trash).await {
            tracing::warn!(path = %trash.display(), error = %e, "Failed to remove model files");
        }
        tracing::info!(model_id = %model.id, name = %model.display_name, "Conversion model removed");
        Ok(model)
    }

    fn model_dir(&self, id: &ConversionModelId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

/// `weights.pth` style name that keeps the source extension.
fn staged_name(stem: &str, source: &Path) -> String {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem.to_string(),
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<u64, CoreError> {
    tokio::fs::copy(from, to).await.map_err(|e| {
        CoreError::Validation(format!("cannot read {}: {e}", from.display()))
    })
}
