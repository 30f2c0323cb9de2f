//! Shared fakes for runtime integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use voxrelay_core::{
    AppCore, AudioArtifact, BackendFactory, BackendFailure, ConversionModel, DevicePlacement,
    ModelUpload, ParamMap, QualityProfile, RegistryScope, ServiceConfig, SynthesisBackend,
    VoiceProfile,
};
use voxrelay_db::{CoreFactory, TestDb, setup_database};
use voxrelay_runtime::backends::{encode_pcm16, wav_duration};
use voxrelay_runtime::{
    BackendRegistry, DispatchBridge, DispatchStores, PipelineDeps, RegistryConfig,
    SynthesisPipeline, WorkerPoolConfig,
};

pub const MB: u64 = 1024 * 1024;
pub const SAMPLE_RATE: u32 = 16_000;
pub const CONVERSION_BACKEND: &str = "rvc";

/// How a fake backend behaves when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// 0.1 s of silence per character of text.
    Speak,
    /// Like `Speak`, after sleeping.
    Slow(Duration),
    Fail,
    /// Fails and reports the instance unusable.
    Poisoned,
    Panic,
    /// Speaks, and converts by replacing the samples.
    Converter,
    /// Speaks, but every conversion fails.
    BrokenConverter,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub backend_id: String,
    pub text: String,
    pub params: ParamMap,
}

/// Backend factory with per-id footprints and an instantiation counter.
#[derive(Default)]
pub struct FakeFactory {
    backends: HashMap<String, (u64, Behavior)>,
    instantiations: AtomicU64,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, backend_id: &str, footprint_mb: u64, behavior: Behavior) -> Self {
        self.backends
            .insert(backend_id.to_string(), (footprint_mb * MB, behavior));
        self
    }

    pub fn instantiations(&self) -> u64 {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl BackendFactory for FakeFactory {
    fn footprint_bytes(&self, backend_id: &str) -> Option<u64> {
        self.backends.get(backend_id).map(|(footprint, _)| *footprint)
    }

    fn instantiate(
        &self,
        backend_id: &str,
        _device: DevicePlacement,
    ) -> Result<Arc<dyn SynthesisBackend>, BackendFailure> {
        let (_, behavior) = self
            .backends
            .get(backend_id)
            .ok_or_else(|| BackendFailure::new(backend_id, "not declared"))?;
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBackend {
            id: backend_id.to_string(),
            behavior: *behavior,
            calls: Arc::clone(&self.calls),
        }))
    }

    fn available(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

struct FakeBackend {
    id: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Call>>>,
}

#[async_trait::async_trait]
impl SynthesisBackend for FakeBackend {
    fn backend_id(&self) -> &str {
        &self.id
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &ParamMap,
    ) -> Result<AudioArtifact, BackendFailure> {
        self.calls.lock().unwrap().push(Call {
            backend_id: self.id.clone(),
            text: text.to_string(),
            params: params.clone(),
        });
        match self.behavior {
            Behavior::Speak | Behavior::Converter | Behavior::BrokenConverter => Ok(speech(text, 0)),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(speech(text, 0))
            }
            Behavior::Fail => Err(BackendFailure::new(&self.id, "synthesis crashed")),
            Behavior::Poisoned => Err(BackendFailure::poisoned(&self.id, "device lost")),
            Behavior::Panic => panic!("backend exploded"),
        }
    }

    async fn convert(
        &self,
        audio: &AudioArtifact,
        _model: &ConversionModel,
        _params: &ParamMap,
    ) -> Result<AudioArtifact, BackendFailure> {
        match self.behavior {
            Behavior::Converter => {
                let samples = (audio.duration_seconds * f64::from(SAMPLE_RATE)).round() as usize;
                let bytes = encode_pcm16(&vec![7; samples], SAMPLE_RATE).unwrap();
                Ok(AudioArtifact::new(bytes, audio.duration_seconds))
            }
            Behavior::BrokenConverter => Err(BackendFailure::new(&self.id, "model weights corrupt")),
            _ => Err(BackendFailure::new(&self.id, "no conversion support")),
        }
    }
}

/// Silence lasting 0.1 s per character.
pub fn speech(text: &str, sample: i16) -> AudioArtifact {
    let samples = text.chars().count() * (SAMPLE_RATE as usize / 10);
    let bytes = encode_pcm16(&vec![sample; samples], SAMPLE_RATE).unwrap();
    let duration = wav_duration(&bytes).unwrap();
    AudioArtifact::new(bytes, duration)
}

/// A database, core services and a fake backend factory in a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub config: ServiceConfig,
    pub core: AppCore,
    pub factory: Arc<FakeFactory>,
    _db: Option<TestDb>,
}

impl Harness {
    /// Backed by an in-memory database.
    pub async fn in_memory(factory: FakeFactory) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::rooted_at(dir.path());
        let db = TestDb::new().await.unwrap();
        let core = AppCore::new(db.repos(), &config);
        Self {
            dir,
            config,
            core,
            factory: Arc::new(factory),
            _db: Some(db),
        }
    }

    /// Backed by a database file, so several harnesses can share it the
    /// way separate worker processes would.
    pub async fn file_backed(db_path: &Path, factory: Arc<FakeFactory>) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::rooted_at(dir.path());
        let pool = setup_database(db_path).await.unwrap();
        let core = CoreFactory::build_app_core(pool, &config);
        Self {
            dir,
            config,
            core,
            factory,
            _db: None,
        }
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            quality_profiles: Arc::clone(self.core.quality_profiles()),
            voice_profiles: Arc::clone(&self.core.repos().voice_profiles),
            conversion_models: Arc::clone(&self.core.repos().conversion_models),
            conversion_backend_id: CONVERSION_BACKEND.to_string(),
        }
    }

    pub fn registry_config(budget_mb: u64) -> RegistryConfig {
        RegistryConfig {
            budget_bytes: budget_mb * MB,
            device: DevicePlacement::Cpu,
            degraded: false,
        }
    }

    pub fn registry(&self, budget_mb: u64) -> BackendRegistry {
        let factory: Arc<dyn BackendFactory> = self.factory.clone();
        BackendRegistry::new(factory, Self::registry_config(budget_mb))
    }

    pub fn pipeline(&self, budget_mb: u64) -> SynthesisPipeline {
        SynthesisPipeline::new(self.registry(budget_mb), self.deps())
    }

    pub fn start_bridge(&self, workers: usize, scope: RegistryScope) -> DispatchBridge {
        self.start_bridge_with(workers, scope, &self.deps())
    }

    pub fn start_bridge_with(
        &self,
        workers: usize,
        scope: RegistryScope,
        deps: &PipelineDeps,
    ) -> DispatchBridge {
        let factory: Arc<dyn BackendFactory> = self.factory.clone();
        let config = WorkerPoolConfig {
            workers,
            scope,
            registry: Self::registry_config(1024),
        };
        let stores = DispatchStores {
            jobs: Arc::clone(&self.core.repos().jobs),
            results: Arc::clone(self.core.results()),
        };
        DispatchBridge::start(&config, &factory, deps, stores).unwrap()
    }

    /// Make `standard` the default profile of `backend_id`.
    pub async fn default_profile(&self, backend_id: &str) -> QualityProfile {
        let mut params = ParamMap::new();
        params.insert("speed".into(), serde_json::json!(1.0));
        self.core
            .quality_profiles()
            .set(QualityProfile::new("standard", backend_id, params).as_default())
            .await
            .unwrap()
    }

    /// Import a model whose weights look like a PyTorch zip archive.
    pub async fn import_model(&self, name: &str) -> ConversionModel {
        let weights = self.dir.path().join(format!("{name}.pth"));
        let mut contents = b"PK\x03\x04".to_vec();
        contents.extend_from_slice(name.as_bytes());
        std::fs::write(&weights, contents).unwrap();
        self.core
            .conversion_models()
            .import(ModelUpload::new(name, weights))
            .await
            .unwrap()
    }

    pub async fn add_voice(&self, name: &str, transcript: Option<&str>) -> VoiceProfile {
        let reference = self.dir.path().join(format!("{name}.wav"));
        std::fs::write(&reference, speech("reference", 0).bytes).unwrap();
        let mut profile = VoiceProfile::new(name, reference);
        if let Some(text) = transcript {
            profile = profile.with_reference_text(text);
        }
        self.core.voice_profiles().add(profile).await.unwrap()
    }
}
