//! Execution side of voxrelay.
//!
//! - [`BackendRegistry`] caches loaded backends under a memory budget.
//! - [`SynthesisPipeline`] resolves a job's references and produces audio.
//! - [`DispatchBridge`] runs a fixed pool of worker threads over the job store.
//! - [`CommandBackendFactory`] declares backends as external executables.
#![deny(unsafe_code)]

pub mod backends;
pub mod dispatch;
pub mod pipeline;
pub mod registry;
pub mod system;

pub use backends::{CommandBackendFactory, CommandSpec};
pub use dispatch::{
    DispatchBridge, DispatchCounts, DispatchError, DispatchStores, WorkerPoolConfig,
};
pub use pipeline::{PipelineDeps, PreparedJob, SynthesisPipeline};
pub use registry::{
    BackendLease, BackendRegistry, EvictionReason, RegistryConfig, RegistrySnapshot,
};
pub use system::resolve_budget_bytes;

