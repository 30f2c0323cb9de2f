//! Core services against a real (in-memory) database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use voxrelay_core::{
    AppCore, AudioArtifact, ConversionModel, ConversionModelId, ConversionModelRepository,
    ConversionModelStore, CoreError, JobFilter, JobId, JobPatch, JobRepository, JobSpec,
    JobStatus, ModelUpload, ParamMap, QualityProfile, RepositoryError, ServiceConfig,
    VoiceProfile,
};
use voxrelay_db::TestDb;

struct Fixture {
    dir: TempDir,
    core: AppCore,
    _db: TestDb,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::rooted_at(dir.path());
        let db = TestDb::new().await.unwrap();
        let core = AppCore::new(db.repos(), &config);
        Self { dir, core, _db: db }
    }

    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn models_root(&self) -> &Path {
        self.core.conversion_models().root()
    }
}

fn torch_zip(tag: &str) -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversion models
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_import_publishes_content_addressed_model() {
    let fx = Fixture::new().await;
    let contents = torch_zip("alice");
    let weights = fx.write("alice.pth", &contents);
    let index = fx.write("alice.index", b"index data");

    let model = fx
        .core
        .conversion_models()
        .import(ModelUpload::new("alice", &weights).with_index(&index))
        .await
        .unwrap();

    let digest = format!("{:x}", Sha256::digest(&contents));
    assert_eq!(model.id.as_str(), &digest[..16]);
    assert!(model.id.is_well_formed());
    assert_eq!(model.weights_path, fx.models_root().join(model.id.as_str()).join("weights.pth"));
    assert_eq!(std::fs::read(&model.weights_path).unwrap(), contents);
    assert!(model.index_path.as_ref().unwrap().exists());
    assert_eq!(model.size_bytes, (contents.len() + b"index data".len()) as u64);
    assert_eq!(entries(fx.models_root()), vec![model.id.to_string()]);

    let by_name = fx.core.conversion_models().resolve("alice").await.unwrap().unwrap();
    let by_id = fx
        .core
        .conversion_models()
        .resolve(model.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_name.id, model.id);
    assert_eq!(by_id.weights_path, model.weights_path);
}

#[tokio::test]
async fn test_invalid_weights_leave_nothing_behind() {
    let fx = Fixture::new().await;
    let weights = fx.write("junk.pth", b"definitely not a checkpoint");

    let err = fx
        .core
        .conversion_models()
        .import(ModelUpload::new("junk", &weights))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)), "got {err:?}");
    assert!(fx.core.conversion_models().list().await.unwrap().is_empty());
    assert!(entries(fx.models_root()).is_empty());
}

#[tokio::test]
async fn test_empty_weights_are_rejected() {
    let fx = Fixture::new().await;
    let weights = fx.write("empty.pth", b"");

    let err = fx
        .core
        .conversion_models()
        .import(ModelUpload::new("empty", &weights))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)));
    assert!(entries(fx.models_root()).is_empty());
}

#[tokio::test]
async fn test_missing_weight_file_is_validation_error() {
    let fx = Fixture::new().await;

    let err = fx
        .core
        .conversion_models()
        .import(ModelUpload::new("ghost", fx.dir.path().join("ghost.pth")))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn test_duplicate_name_and_content_are_rejected() {
    let fx = Fixture::new().await;
    let weights = fx.write("alice.pth", &torch_zip("alice"));
    let store = fx.core.conversion_models();
    let first = store.import(ModelUpload::new("alice", &weights)).await.unwrap();

    let other = fx.write("bob.pth", &torch_zip("bob"));
    let same_name = store.import(ModelUpload::new("alice", &other)).await.unwrap_err();
    assert!(matches!(
        same_name,
        CoreError::Repository(RepositoryError::AlreadyExists(_))
    ));

    let same_content = store.import(ModelUpload::new("alice-copy", &weights)).await.unwrap_err();
    assert!(matches!(
        same_content,
        CoreError::Repository(RepositoryError::AlreadyExists(_))
    ));

    assert_eq!(store.list().await.unwrap().len(), 1);
    assert_eq!(entries(fx.models_root()), vec![first.id.to_string()]);
}

#[tokio::test]
async fn test_remove_deletes_record_and_files() {
    let fx = Fixture::new().await;
    let weights = fx.write("alice.pth", &torch_zip("alice"));
    let store = fx.core.conversion_models();
    let model = store.import(ModelUpload::new("alice", &weights)).await.unwrap();

    let removed = store.remove("alice").await.unwrap();

    assert_eq!(removed.id, model.id);
    assert!(store.resolve(model.id.as_str()).await.unwrap().is_none());
    assert!(entries(fx.models_root()).is_empty());
    // The uploaded source file is not touched.
    assert!(weights.exists());

    let again = store.remove("alice").await.unwrap_err();
    assert!(matches!(again, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_imports_of_same_weights_publish_one_intact_model() {
    let fx = Fixture::new().await;
    let contents = torch_zip("alice");
    let first = fx.write("alice.pth", &contents);
    let second = fx.write("alice-again.ckpt", &contents);
    let store = fx.core.conversion_models();

    let (a, b) = tokio::join!(
        store.import(ModelUpload::new("alice", &first)),
        store.import(ModelUpload::new("alice-again", &second)),
    );

    let (published, rejected) = match (a, b) {
        (Ok(model), Err(err)) | (Err(err), Ok(model)) => (model, err),
        other => panic!("expected exactly one import to succeed, got {other:?}"),
    };
    assert!(matches!(
        rejected,
        CoreError::Repository(RepositoryError::AlreadyExists(_))
    ));
    assert_eq!(std::fs::read(&published.weights_path).unwrap(), contents);
    assert_eq!(entries(fx.models_root()), vec![published.id.to_string()]);
    let resolved = store.resolve(published.id.as_str()).await.unwrap().unwrap();
    assert!(resolved.weights_path.exists());
}

/// Delegates to a real repository but refuses every delete.
struct UndeletableModels(Arc<dyn ConversionModelRepository>);

#[async_trait]
impl ConversionModelRepository for UndeletableModels {
    async fn insert(&self, model: &ConversionModel) -> Result<(), RepositoryError> {
        self.0.insert(model).await
    }

    async fn get(&self, id: &ConversionModelId) -> Result<ConversionModel, RepositoryError> {
        self.0.get(id).await
    }

    async fn get_by_name(&self, display_name: &str) -> Result<ConversionModel, RepositoryError> {
        self.0.get_by_name(display_name).await
    }

    async fn list(&self) -> Result<Vec<ConversionModel>, RepositoryError> {
        self.0.list().await
    }

    async fn delete(&self, _id: &ConversionModelId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Storage("database is locked".into()))
    }
}

#[tokio::test]
async fn test_failed_record_delete_keeps_model_intact() {
    let fx = Fixture::new().await;
    let root = fx.dir.path().join("guarded-models");
    let store = ConversionModelStore::new(
        Arc::new(UndeletableModels(Arc::clone(&fx.core.repos().conversion_models))),
        &root,
    );
    let weights = fx.write("alice.pth", &torch_zip("alice"));
    let model = store.import(ModelUpload::new("alice", &weights)).await.unwrap();

    let err = store.remove("alice").await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Repository(RepositoryError::Storage(_))
    ));
    assert_eq!(entries(&root), vec![model.id.to_string()]);
    assert!(model.weights_path.exists());
    let still_there = store.resolve("alice").await.unwrap().unwrap();
    assert_eq!(still_there.weights_path, model.weights_path);
}

// ─────────────────────────────────────────────────────────────────────────────
// Quality profiles
// ─────────────────────────────────────────────────────────────────────────────

fn params(speed: f64) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("speed".into(), json!(speed));
    params
}

#[tokio::test]
async fn test_profile_resolution_falls_back_to_default() {
    let fx = Fixture::new().await;
    let profiles = fx.core.quality_profiles();
    profiles
        .set(QualityProfile::new("standard", "A", params(1.0)).as_default())
        .await
        .unwrap();
    profiles
        .set(QualityProfile::new("fast", "A", params(1.5)))
        .await
        .unwrap();

    let named = profiles.resolve("A", Some("fast")).await.unwrap();
    let missing = profiles.resolve("A", Some("nonexistent")).await.unwrap();
    let unnamed = profiles.resolve("A", None).await.unwrap();

    assert_eq!(named.params["speed"], json!(1.5));
    assert_eq!(missing.name, "standard");
    assert_eq!(unnamed.name, "standard");

    let other_backend = profiles.resolve("B", Some("fast")).await.unwrap_err();
    assert!(matches!(other_backend, CoreError::Validation(_)));
}

#[tokio::test]
async fn test_stored_profiles_expire_after_ttl() {
    let fx = Fixture::new().await;
    let profiles = fx.core.quality_profiles();
    let stored = profiles
        .set(QualityProfile::new("standard", "A", params(1.0)).as_default())
        .await
        .unwrap();

    let expires_at = stored.expires_at.expect("ttl applied");
    assert_eq!(expires_at - stored.created_at, TimeDelta::days(30));

    let before = profiles
        .resolve_at("A", None, expires_at - TimeDelta::seconds(1))
        .await
        .unwrap();
    assert_eq!(before.name, "standard");

    let after = profiles.resolve_at("A", None, expires_at).await.unwrap_err();
    assert!(matches!(after, CoreError::Validation(_)));
}

#[tokio::test]
async fn test_explicit_expiry_is_kept() {
    let fx = Fixture::new().await;
    let at = Utc::now() + TimeDelta::hours(1);

    let stored = fx
        .core
        .quality_profiles()
        .set(QualityProfile::new("short", "A", params(1.0)).expiring_at(at))
        .await
        .unwrap();

    assert_eq!(
        stored.expires_at.map(|t| t.timestamp_millis()),
        Some(at.timestamp_millis())
    );
}

#[tokio::test]
async fn test_profile_requires_name_and_backend() {
    let fx = Fixture::new().await;
    let profiles = fx.core.quality_profiles();

    assert!(matches!(
        profiles.set(QualityProfile::new("  ", "A", ParamMap::new())).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        profiles.set(QualityProfile::new("x", "", ParamMap::new())).await,
        Err(CoreError::Validation(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Voice profiles
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_voice_requires_readable_reference() {
    let fx = Fixture::new().await;
    let voices = fx.core.voice_profiles();

    let missing = voices
        .add(VoiceProfile::new("ghost", fx.dir.path().join("ghost.wav")))
        .await
        .unwrap_err();
    assert!(matches!(missing, CoreError::Validation(_)));

    let empty = fx.write("empty.wav", b"");
    let err = voices.add(VoiceProfile::new("quiet", empty)).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let reference = fx.write("narrator.wav", b"RIFF....WAVE");
    let added = voices
        .add(VoiceProfile::new("narrator", reference).with_reference_text("hello there"))
        .await
        .unwrap();

    let stored = voices.get(&added.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "narrator");
    assert_eq!(stored.reference_text.as_deref(), Some("hello there"));
    assert_eq!(voices.list().await.unwrap().len(), 1);
    assert!(voices.remove(&added.id).await.unwrap());
    assert!(voices.get(&added.id).await.unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs and housekeeping
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_submission_is_never_stored() {
    let fx = Fixture::new().await;

    let err = fx.core.jobs().create(JobSpec::new("   ", "A")).await.unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)));
    assert!(
        fx.core
            .jobs()
            .list(&JobFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_cancel_only_while_queued() {
    let fx = Fixture::new().await;
    let jobs = fx.core.jobs();
    let job = jobs.create(JobSpec::new("Hello", "A")).await.unwrap();

    let cancelled = jobs.cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let again = jobs.cancel(&job.id).await.unwrap_err();
    assert!(matches!(
        again,
        CoreError::Repository(RepositoryError::Conflict(_))
    ));

    let unknown = jobs.cancel(&JobId::from("no-such-job")).await.unwrap_err();
    assert!(matches!(unknown, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_housekeeping_purges_and_reports_stuck_jobs() {
    let fx = Fixture::new().await;
    let jobs = fx.core.jobs();
    let queued = jobs.create(JobSpec::new("waiting", "A")).await.unwrap();
    let running = jobs.create(JobSpec::new("working", "A")).await.unwrap();
    fx.core
        .repos()
        .jobs
        .transition(
            &running.id,
            &[JobStatus::Queued],
            JobStatus::Running,
            &JobPatch::started(Utc::now()),
        )
        .await
        .unwrap();

    // Two hours on, the running job is past the one-hour stuck ceiling.
    let report = fx
        .core
        .housekeeping()
        .run_at(Utc::now() + TimeDelta::hours(2))
        .await
        .unwrap();
    assert_eq!(report.purged_jobs, 0);
    let stuck: Vec<_> = report.stuck_jobs.iter().map(|j| j.id.clone()).collect();
    assert_eq!(stuck, vec![running.id.clone()]);
    // Reported, not failed.
    assert_eq!(jobs.get(&running.id).await.unwrap().status, JobStatus::Running);

    // Past the seven-day job TTL everything is purged.
    let report = fx
        .core
        .housekeeping()
        .run_at(Utc::now() + TimeDelta::days(8))
        .await
        .unwrap();
    assert_eq!(report.purged_jobs, 2);
    assert!(matches!(
        jobs.get(&queued.id).await.unwrap_err(),
        CoreError::NotFound(_)
    ));
}

fn audio() -> AudioArtifact {
    AudioArtifact::new(b"RIFF....WAVE".to_vec(), 0.5)
}

#[tokio::test]
async fn test_delete_removes_stored_result() {
    let fx = Fixture::new().await;
    let job = fx.core.jobs().create(JobSpec::new("Hello", "A")).await.unwrap();
    let location = fx.core.results().put(&job.id, &audio()).await.unwrap();
    assert!(Path::new(&location).exists());

    assert!(fx.core.jobs().delete(&job.id).await.unwrap());

    assert!(!Path::new(&location).exists());
    assert!(!fx.core.jobs().delete(&job.id).await.unwrap());
}

#[tokio::test]
async fn test_purged_jobs_take_their_results_along() {
    let fx = Fixture::new().await;
    let jobs = fx.core.jobs();
    let with_audio = jobs.create(JobSpec::new("Hello", "A")).await.unwrap();
    jobs.create(JobSpec::new("no audio yet", "A")).await.unwrap();
    let location = fx.core.results().put(&with_audio.id, &audio()).await.unwrap();

    let report = fx
        .core
        .housekeeping()
        .run_at(Utc::now() + TimeDelta::days(8))
        .await
        .unwrap();

    assert_eq!(report.purged_jobs, 2);
    assert_eq!(report.purged_results, 1);
    assert!(!Path::new(&location).exists());
}
