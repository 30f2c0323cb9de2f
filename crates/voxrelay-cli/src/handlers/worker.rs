//! Worker command handler - hosts the dispatch bridge.
//!
//! Builds the runtime from the CLI context: command-backed backends from
//! the declarations file, a memory budget, one or more registries, and the
//! worker pool. Runs until Ctrl-C, then drains and reports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use voxrelay_core::{BackendFactory, ServiceConfig, validate_config};
use voxrelay_runtime::{
    CommandBackendFactory, DispatchBridge, DispatchStores, PipelineDeps,
    RegistryConfig, WorkerPoolConfig, resolve_budget_bytes,
};

use crate::bootstrap::CliContext;
use crate::commands::WorkerArgs;
use crate::error::CliError;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Apply command-line overrides on top of the loaded configuration.
pub fn effective_config(base: &ServiceConfig, args: &WorkerArgs) -> Result<ServiceConfig, CliError> {
    let mut config = base.clone();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(scope) = args.scope {
        config.registry_scope = scope;
    }
    if let Some(mb) = args.memory_budget_mb {
        config.memory_budget_mb = Some(mb);
    }
    if args.degraded {
        config.degraded_memory_mode = true;
    }
    validate_config(&config)?;
    Ok(config)
}

pub async fn execute(ctx: &CliContext, args: WorkerArgs) -> Result<()> {
    let config = effective_config(ctx.config(), &args)?;

    let factory = CommandBackendFactory::load(&config.backends_file).with_context(|| {
        format!(
            "loading backend declarations from {}",
            config.backends_file.display()
        )
    })?;
    let factory: Arc<dyn BackendFactory> = Arc::new(factory);

    let pool = WorkerPoolConfig {
        workers: config.workers,
        scope: config.registry_scope,
        registry: RegistryConfig {
            budget_bytes: resolve_budget_bytes(&config),
            device: config.device,
            degraded: config.degraded_memory_mode,
        },
    };
    let repos = ctx.app().repos();
    let deps = PipelineDeps {
        quality_profiles: Arc::clone(ctx.app().quality_profiles()),
        voice_profiles: Arc::clone(&repos.voice_profiles),
        conversion_models: Arc::clone(&repos.conversion_models),
        conversion_backend_id: config.conversion_backend_id.clone(),
    };
    let stores = DispatchStores {
        jobs: Arc::clone(&repos.jobs),
        results: Arc::clone(ctx.app().results()),
    };

    let bridge = DispatchBridge::start(&pool, &factory, &deps, stores)?;
    info!(
        backends = ?factory.available(),
        budget_mb = pool.registry.budget_bytes / (1024 * 1024),
        "Worker ready; press Ctrl-C to stop"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C, stopping");
        }
    };
    tokio::select! {
        () = bridge.run_until(config.poll_interval(), shutdown) => {}
        () = housekeeping_loop(ctx) => {}
    }

    info!(pending = bridge.pending_count(), "Draining worker pool");
    let counts = bridge.shutdown().await;
    println!(
        "Worker stopped: {} claimed, {} completed, {} failed, {} conflicts.",
        counts.claimed, counts.completed, counts.failed, counts.conflicts
    );
    Ok(())
}

async fn housekeeping_loop(ctx: &CliContext) {
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = ctx.app().housekeeping().run_once().await {
            warn!(error = %e, "Housekeeping pass failed");
        }
    }
}
