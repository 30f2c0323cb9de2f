//! Dispatch bridge: a fixed pool of synchronous worker threads that execute
//! queued jobs.
//!
//! A worker that receives a job id:
//!
//! 1. reads the job and prepares it (reference lookups); a failure here moves
//!    QUEUED → FAILED without the job ever running,
//! 2. claims it with the atomic QUEUED → RUNNING transition; losing that race
//!    drops the task,
//! 3. runs the pipeline on a runtime built for this one task and torn down
//!    afterwards, with panics caught at the task boundary,
//! 4. stores the audio and records RUNNING → COMPLETED, or RUNNING → FAILED
//!    with the error kind.
//!
//! A panic anywhere in that sequence fails the job with `internal_error`
//! and leaves the worker running.
//!
//! Job-store calls go through the handle of the runtime that started the
//! bridge. Only pipeline execution gets a private runtime.
//!
//! The configured memory budget covers the whole pool: with per-worker
//! registries each one gets an equal share.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use voxrelay_core::{
    BackendFactory, Job, JobFilter, JobId, JobPatch, JobRepository, JobStatus, PipelineError,
    RegistryScope, RepositoryError, ResultStore, SynthesisOutput,
};

use crate::pipeline::{PipelineDeps, PreparedJob, SynthesisPipeline};
use crate::registry::{BackendRegistry, RegistryConfig};

/// Attempts at writing a job's terminal status before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("the dispatch bridge must be started from within a tokio runtime")]
    NoRuntime,

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub scope: RegistryScope,
    pub registry: RegistryConfig,
}

impl WorkerPoolConfig {
    /// Settings for one registry. Per-worker registries split the budget
    /// evenly so the pool as a whole stays within it.
    #[must_use]
    pub fn registry_share(&self) -> RegistryConfig {
        match self.scope {
            RegistryScope::Shared => self.registry,
            RegistryScope::PerWorker => {
                let workers = u64::try_from(self.workers.max(1)).unwrap_or(u64::MAX);
                RegistryConfig {
                    budget_bytes: self.registry.budget_bytes / workers,
                    ..self.registry
                }
            }
        }
    }
}

/// Job-store and result-store access shared by all workers.
#[derive(Clone)]
pub struct DispatchStores {
    pub jobs: Arc<dyn JobRepository>,
    pub results: Arc<dyn ResultStore>,
}

/// Running totals across all workers of one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks dropped because another actor moved the job first.
    pub conflicts: u64,
}

#[derive(Default)]
struct Counters {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    conflicts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    stores: DispatchStores,
    control: Handle,
    receiver: Mutex<UnboundedReceiver<JobId>>,
    pending: Mutex<HashSet<JobId>>,
    counters: Counters,
}

/// Handle to a running worker pool.
pub struct DispatchBridge {
    sender: UnboundedSender<JobId>,
    shared: Arc<Shared>,
    registries: Vec<BackendRegistry>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchBridge {
    /// Start `config.workers` worker threads.
    ///
    /// Must be called from within a tokio runtime; its handle is used for
    /// job-store access and must stay alive while the bridge runs.
    pub fn start(
        config: &WorkerPoolConfig,
        factory: &Arc<dyn BackendFactory>,
        deps: &PipelineDeps,
        stores: DispatchStores,
    ) -> Result<Self, DispatchError> {
        if config.workers == 0 {
            return Err(DispatchError::NoWorkers);
        }
        let control = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            stores,
            control,
            receiver: Mutex::new(receiver),
            pending: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        });

        let registry_config = config.registry_share();
        let registries: Vec<BackendRegistry> = match config.scope {
            RegistryScope::Shared => {
                vec![BackendRegistry::new(Arc::clone(factory), registry_config)]
            }
            RegistryScope::PerWorker => (0..config.workers)
                .map(|_| BackendRegistry::new(Arc::clone(factory), registry_config))
                .collect(),
        };

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let registry = registries[index % registries.len()].clone();
            let pipeline = Arc::new(SynthesisPipeline::new(registry, deps.clone()));
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("voxrelay-worker-{index}"))
                .spawn(move || worker_loop(index, &shared, &pipeline))?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            scope = %config.scope,
            device = %config.registry.device,
            budget_bytes = config.registry.budget_bytes,
            registry_budget_bytes = registry_config.budget_bytes,
            degraded = config.registry.degraded,
            "Worker pool started"
        );
        Ok(Self {
            sender,
            shared,
            registries,
            workers,
        })
    }

    /// Queue a job for execution.
    ///
    /// Returns `false` if the job is already waiting or executing in this
    /// pool, or the pool is shutting down.
    pub fn submit(&self, job_id: JobId) -> bool {
        if !self.shared.pending().insert(job_id.clone()) {
            debug!(job_id = %job_id, "Job already pending, not queued again");
            return false;
        }
        if let Err(rejected) = self.sender.send(job_id) {
            self.shared.pending().remove(&rejected.0);
            return false;
        }
        true
    }

    /// Submit every QUEUED job in the store. Returns how many were new.
    pub async fn resubmit_queued(&self) -> Result<usize, RepositoryError> {
        let queued = self
            .shared
            .stores
            .jobs
            .list(&JobFilter::with_status(JobStatus::Queued))
            .await?;
        Ok(queued
            .into_iter()
            .filter(|job| self.submit(job.id.clone()))
            .count())
    }

    /// Poll the store for queued jobs until `shutdown` resolves.
    ///
    /// The first poll happens immediately, which recovers jobs queued
    /// before the pool started.
    pub async fn run_until<F>(&self, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.resubmit_queued().await {
                    Ok(0) => {}
                    Ok(submitted) => debug!(submitted, "Submitted queued jobs"),
                    Err(e) => warn!(error = %e, "Polling for queued jobs failed"),
                },
            }
        }
    }

    /// Jobs submitted but not yet finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    #[must_use]
    pub fn counts(&self) -> DispatchCounts {
        self.shared.counters.snapshot()
    }

    /// The registries in use: one when shared, one per worker otherwise.
    #[must_use]
    pub fn registries(&self) -> &[BackendRegistry] {
        &self.registries
    }

    /// Stop accepting work, let workers drain what is queued, and wait
    /// for them to exit.
    pub async fn shutdown(self) -> DispatchCounts {
        let Self {
            sender,
            shared,
            workers,
            ..
        } = self;
        drop(sender);

        let joined = tokio::task::spawn_blocking(move || {
            for handle in workers {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                if handle.join().is_err() {
                    error!(worker = %name, "Worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!(error = %e, "Failed to join worker threads");
        }

        let counts = shared.counters.snapshot();
        info!(
            claimed = counts.claimed,
            completed = counts.completed,
            failed = counts.failed,
            conflicts = counts.conflicts,
            "Worker pool stopped"
        );
        counts
    }
}

fn worker_loop(index: usize, shared: &Shared, pipeline: &Arc<SynthesisPipeline>) {
    debug!(worker = index, "Worker started");
    loop {
        let next = shared.receiver().blocking_recv();
        let Some(job_id) = next else { break };
        let _pending = PendingEntry {
            shared,
            job_id: &job_id,
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            shared.execute(pipeline, &job_id);
        }));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(worker = index, job_id = %job_id, panic = %message, "Worker panicked while handling job");
            shared.finish_failed(
                &job_id,
                &[JobStatus::Queued, JobStatus::Running],
                &PipelineError::Internal(format!("worker panicked: {message}")),
            );
        }
    }
    debug!(worker = index, "Worker stopped");
}

/// Clears a job from the pending set when its handling ends, however it ends.
struct PendingEntry<'a> {
    shared: &'a Shared,
    job_id: &'a JobId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(self.job_id);
    }
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receiver(&self) -> MutexGuard<'_, UnboundedReceiver<JobId>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, pipeline: &Arc<SynthesisPipeline>, job_id: &JobId) {
        let jobs = &self.stores.jobs;

        let job = match self.control.block_on(jobs.get(job_id)) {
            Ok(job) => job,
            Err(RepositoryError::NotFound(_)) => {
                debug!(job_id = %job_id, "Job no longer exists, dropping task");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to load job");
                return;
            }
        };
        if job.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %job.status, "Job is no longer queued, dropping task");
            Counters::bump(&self.counters.conflicts);
            return;
        }

        let prepared = match self.control.block_on(pipeline.prepare(&job)) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(job_id = %job_id, kind = %e.kind(), error = %e, "Job failed pre-flight checks");
                self.finish_failed(job_id, &[JobStatus::Queued], &e);
                return;
            }
        };

        let claim = self.control.block_on(jobs.transition(
            job_id,
            &[JobStatus::Queued],
            JobStatus::Running,
            &JobPatch::started(Utc::now()),
        ));
        match claim {
            Ok(_) => {
                Counters::bump(&self.counters.claimed);
                info!(
                    job_id = %job_id,
                    backend_id = %job.backend_id,
                    profile = %prepared.profile_name,
                    conversion = prepared.conversion.is_some(),
                    "Job claimed"
                );
            }
            Err(RepositoryError::Conflict(_)) => {
                debug!(job_id = %job_id, "Job claimed by another worker");
                Counters::bump(&self.counters.conflicts);
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to claim job");
                return;
            }
        }

        match run_isolated(pipeline, prepared) {
            Ok(output) => self.finish_completed(job_id, &output),
            Err(e) => self.finish_failed(job_id, &[JobStatus::Running], &e),
        }
    }

    fn finish_completed(&self, job_id: &JobId, output: &SynthesisOutput) {
        let location = match self
            .control
            .block_on(self.stores.results.put(job_id, &output.audio))
        {
            Ok(location) => location,
            Err(e) => {
                self.finish_failed(job_id, &[JobStatus::Running], &PipelineError::from(e));
                return;
            }
        };

        let patch = JobPatch::completed(
            Utc::now(),
            location,
            output.audio.duration_seconds,
            &output.conversion,
        );
        let done = self.record_terminal(job_id, &[JobStatus::Running], JobStatus::Completed, &patch);
        match done {
            Ok(job) => {
                Counters::bump(&self.counters.completed);
                info!(
                    job_id = %job_id,
                    duration_seconds = output.audio.duration_seconds,
                    conversion_applied = job.conversion_applied,
                    "Job completed"
                );
            }
            Err(e) => {
                if matches!(e, RepositoryError::NotFound(_)) {
                    self.discard_result(job_id);
                }
                self.record_lost_transition(job_id, JobStatus::Completed, &e);
            }
        }
    }

    fn finish_failed(&self, job_id: &JobId, from: &[JobStatus], err: &PipelineError) {
        let patch = JobPatch::failed(Utc::now(), err.to_failure());
        let result = self.record_terminal(job_id, from, JobStatus::Failed, &patch);
        match result {
            Ok(_) => {
                Counters::bump(&self.counters.failed);
                error!(job_id = %job_id, kind = %err.kind(), error = %err, "Job failed");
            }
            Err(e) => self.record_lost_transition(job_id, JobStatus::Failed, &e),
        }
    }

    /// Write a terminal transition, retrying storage failures.
    ///
    /// Conflicts and missing jobs are final and returned at once.
    fn record_terminal(
        &self,
        job_id: &JobId,
        from: &[JobStatus],
        to: JobStatus,
        patch: &JobPatch,
    ) -> Result<Job, RepositoryError> {
        let mut attempt = 1;
        loop {
            let result = self
                .control
                .block_on(self.stores.jobs.transition(job_id, from, to, patch));
            match result {
                Err(ref e)
                    if attempt < TERMINAL_WRITE_ATTEMPTS
                        && !matches!(e, RepositoryError::Conflict(_) | RepositoryError::NotFound(_)) =>
                {
                    warn!(job_id = %job_id, to = %to, attempt, error = %e, "Retrying terminal status write");
                    std::thread::sleep(TERMINAL_WRITE_BACKOFF * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Remove audio stored for a job whose record vanished mid-run.
    fn discard_result(&self, job_id: &JobId) {
        if let Err(e) = self.control.block_on(self.stores.results.remove(job_id)) {
            warn!(job_id = %job_id, error = %e, "Failed to remove result of deleted job");
        }
    }

    fn record_lost_transition(&self, job_id: &JobId, to: JobStatus, err: &RepositoryError) {
        match err {
            RepositoryError::Conflict(_) => {
                debug!(job_id = %job_id, to = %to, "Transition lost to another actor");
                Counters::bump(&self.counters.conflicts);
            }
            RepositoryError::NotFound(_) => {
                info!(job_id = %job_id, to = %to, "Job was deleted while it ran");
            }
            _ => {
                error!(
                    job_id = %job_id,
                    to = %to,
                    error = %err,
                    attempts = TERMINAL_WRITE_ATTEMPTS,
                    "Failed to record job outcome; the job stays in its previous status until housekeeping reports it"
                );
            }
        }
    }
}

/// Run the pipeline on a runtime that lives only for this task.
fn run_isolated(
    pipeline: &Arc<SynthesisPipeline>,
    prepared: PreparedJob,
) -> Result<SynthesisOutput, PipelineError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PipelineError::Internal(format!("failed to start task runtime: {e}")))?;

    let pipeline = Arc::clone(pipeline);
    let task = runtime.spawn(async move { pipeline.run(&prepared).await });
    match runtime.block_on(task) {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(PipelineError::Internal(format!(
            "pipeline panicked: {}",
            panic_message(e.into_panic().as_ref())
        ))),
        Err(e) => Err(PipelineError::Internal(format!("pipeline task aborted: {e}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
