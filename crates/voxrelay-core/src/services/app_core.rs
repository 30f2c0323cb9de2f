//! `AppCore` - the primary application facade.
//!
//! This is the composition root for core services. The CLI and the worker
//! pool receive an `AppCore` instance and use it to access all functionality.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::ports::{Repos, ResultStore};

use super::{
    ConversionModelStore, FsResultStore, HousekeepingService, JobService, QualityProfileService,
    VoiceProfileService,
};

/// The core application facade.
///
/// ```ignore
/// let repos = CoreFactory::build_repos(pool, &config);
/// let core = AppCore::new(repos, &config);
/// let job = core.jobs().create(spec).await?;
/// ```
pub struct AppCore {
    repos: Repos,
    results: Arc<dyn ResultStore>,
    jobs: JobService,
    quality_profiles: Arc<QualityProfileService>,
    conversion_models: Arc<ConversionModelStore>,
    voice_profiles: VoiceProfileService,
    housekeeping: HousekeepingService,
}

impl AppCore {
    pub fn new(repos: Repos, config: &ServiceConfig) -> Self {
        let results: Arc<dyn ResultStore> =
            Arc::new(FsResultStore::new(config.results_dir.clone()));
        Self {
            jobs: JobService::new(Arc::clone(&repos.jobs), Arc::clone(&results)),
            quality_profiles: Arc::new(QualityProfileService::new(
                Arc::clone(&repos.quality_profiles),
                config.quality_profile_ttl(),
            )),
            conversion_models: Arc::new(ConversionModelStore::new(
                Arc::clone(&repos.conversion_models),
                config.conversion_models_dir.clone(),
            )),
            voice_profiles: VoiceProfileService::new(Arc::clone(&repos.voice_profiles)),
            housekeeping: HousekeepingService::new(
                Arc::clone(&repos.jobs),
                Arc::clone(&repos.quality_profiles),
                Arc::clone(&results),
                config.stuck_after(),
            ),
            repos,
            results,
        }
    }

    /// The underlying repositories, for wiring the runtime.
    pub const fn repos(&self) -> &Repos {
        &self.repos
    }

    /// Storage for finished audio, shared with the worker pool.
    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    pub const fn jobs(&self) -> &JobService {
        &self.jobs
    }

    pub fn quality_profiles(&self) -> &Arc<QualityProfileService> {
        &self.quality_profiles
    }

    pub fn conversion_models(&self) -> &Arc<ConversionModelStore> {
        &self.conversion_models
    }

    pub const fn voice_profiles(&self) -> &VoiceProfileService {
        &self.voice_profiles
    }

    pub const fn housekeeping(&self) -> &HousekeepingService {
        &self.housekeeping
    }
}
