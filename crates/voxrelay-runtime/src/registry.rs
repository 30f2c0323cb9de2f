//! Backend registry: a bounded, reference-counted cache of loaded backends.
//!
//! Instances are keyed by backend identifier and shared between leases.
//! Every instance reserves its declared footprint against a memory budget;
//! when a new instance does not fit, idle instances are evicted in
//! least-recently-used order. Nothing is evicted while a lease is held.
//!
//! A registry is an explicit value. Workers either own one each or share a
//! single clone, depending on the configured scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};
use voxrelay_core::{BackendFactory, DevicePlacement, PipelineError, SynthesisBackend};

/// Registry limits and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub budget_bytes: u64,
    pub device: DevicePlacement,
    /// Drop every instance as soon as its last lease is released.
    pub degraded: bool,
}

/// Why an instance left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Room was needed for another instance.
    Pressure,
    /// Degraded-memory mode released an idle instance.
    Degraded,
    /// The instance reported an unrecoverable failure.
    Stale,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pressure => "pressure",
            Self::Degraded => "degraded",
            Self::Stale => "stale",
        })
    }
}

/// Point-in-time view of the registry, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub budget_bytes: u64,
    pub reserved_bytes: u64,
    /// `(backend_id, active leases)` for every cached instance, sorted by id.
    pub cached: Vec<(String, usize)>,
    /// Identifiers of stale instances still held by a lease.
    pub retired: Vec<String>,
}

struct Entry {
    handle: Arc<dyn SynthesisBackend>,
    generation: u64,
    refs: usize,
    last_used: Instant,
    footprint: u64,
}

struct Retired {
    backend_id: String,
    refs: usize,
    footprint: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Stale instances keyed by generation, kept until their leases drain.
    retired: HashMap<u64, Retired>,
    reserved: u64,
    next_generation: u64,
}

impl State {
    fn lease_cached(&mut self, backend_id: &str) -> Option<(Arc<dyn SynthesisBackend>, u64)> {
        let entry = self.entries.get_mut(backend_id)?;
        entry.refs += 1;
        entry.last_used = Instant::now();
        Some((Arc::clone(&entry.handle), entry.generation))
    }

    /// Evict idle instances, oldest first, until `needed` more bytes fit.
    ///
    /// Returns the evicted handles so they can be dropped outside the lock,
    /// or `None` when not enough idle memory exists. Nothing is evicted in
    /// that case.
    fn make_room(
        &mut self,
        needed: u64,
        budget: u64,
    ) -> Option<Vec<(String, Arc<dyn SynthesisBackend>)>> {
        let mut idle: Vec<(&String, Instant, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.refs == 0)
            .map(|(id, entry)| (id, entry.last_used, entry.footprint))
            .collect();
        idle.sort_by_key(|(_, last_used, _)| *last_used);

        let mut projected = self.reserved;
        let mut victims = Vec::new();
        for (id, _, footprint) in idle {
            if projected.saturating_add(needed) <= budget {
                break;
            }
            projected -= footprint;
            victims.push(id.clone());
        }
        if projected.saturating_add(needed) > budget {
            return None;
        }

        let mut evicted = Vec::with_capacity(victims.len());
        for id in victims {
            if let Some(entry) = self.entries.remove(&id) {
                self.reserved -= entry.footprint;
                evicted.push((id, entry.handle));
            }
        }
        Some(evicted)
    }
}

struct Inner {
    factory: Arc<dyn BackendFactory>,
    config: RegistryConfig,
    state: Mutex<State>,
    /// Serializes instantiation so reservations never race.
    load_lock: tokio::sync::Mutex<()>,
    instantiations: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, backend_id: &str, generation: u64) {
        let dropped = {
            let mut state = self.state();
            let current = state
                .entries
                .get_mut(backend_id)
                .filter(|entry| entry.generation == generation);

            if let Some(entry) = current {
                entry.refs = entry.refs.saturating_sub(1);
                entry.last_used = Instant::now();
                if entry.refs == 0 && self.config.degraded {
                    state.entries.remove(backend_id).map(|entry| {
                        state.reserved -= entry.footprint;
                        (EvictionReason::Degraded, entry.footprint, Some(entry.handle))
                    })
                } else {
                    None
                }
            } else if let Some(retired) = state.retired.get_mut(&generation) {
                retired.refs = retired.refs.saturating_sub(1);
                if retired.refs == 0 {
                    state.retired.remove(&generation).map(|retired| {
                        state.reserved -= retired.footprint;
                        (EvictionReason::Stale, retired.footprint, None)
                    })
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some((reason, footprint, handle)) = dropped {
            drop(handle);
            info!(backend_id, footprint_bytes = footprint, reason = %reason, "Backend evicted");
        }
    }

    fn mark_stale(&self, backend_id: &str, generation: u64) {
        let evicted = {
            let mut state = self.state();
            let is_current = state
                .entries
                .get(backend_id)
                .is_some_and(|entry| entry.generation == generation);
            if !is_current {
                return;
            }
            let Some(entry) = state.entries.remove(backend_id) else {
                return;
            };
            if entry.refs == 0 {
                state.reserved -= entry.footprint;
                Some((entry.footprint, entry.handle))
            } else {
                debug!(
                    backend_id,
                    leases = entry.refs,
                    "Backend marked stale, freeing after last lease"
                );
                state.retired.insert(
                    generation,
                    Retired {
                        backend_id: backend_id.to_string(),
                        refs: entry.refs,
                        footprint: entry.footprint,
                    },
                );
                None
            }
        };

        if let Some((footprint, handle)) = evicted {
            drop(handle);
            info!(backend_id, footprint_bytes = footprint, reason = %EvictionReason::Stale, "Backend evicted");
        }
    }
}

/// Cache of loaded backends with a memory budget.
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct BackendRegistry {
    inner: Arc<Inner>,
}

impl BackendRegistry {
    pub fn new(factory: Arc<dyn BackendFactory>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                state: Mutex::new(State::default()),
                load_lock: tokio::sync::Mutex::new(()),
                instantiations: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        self.inner.config
    }

    /// Borrow an instance of `backend_id`, loading it if needed.
    ///
    /// A cached instance is reused without touching the budget. Loading
    /// blocks while another load is in progress and may take seconds.
    ///
    /// # Errors
    ///
    /// - `Validation` if the factory does not know the identifier.
    /// - `ResourceExhausted` if the footprint cannot fit even after evicting
    ///   every idle instance.
    /// - `Backend` if instantiation fails.
    pub async fn acquire(&self, backend_id: &str) -> Result<BackendLease, PipelineError> {
        if let Some(lease) = self.try_cached(backend_id) {
            return Ok(lease);
        }

        let _loading = self.inner.load_lock.lock().await;
        // Another task may have finished loading while we waited.
        if let Some(lease) = self.try_cached(backend_id) {
            return Ok(lease);
        }

        let footprint = self
            .inner
            .factory
            .footprint_bytes(backend_id)
            .ok_or_else(|| PipelineError::Validation(format!("unknown backend '{backend_id}'")))?;
        self.reserve(backend_id, footprint)?;

        let factory = Arc::clone(&self.inner.factory);
        let device = self.inner.config.device;
        let id = backend_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || factory.instantiate(&id, device)).await;

        let handle = match loaded {
            Ok(Ok(handle)) => handle,
            Ok(Err(failure)) => {
                self.unreserve(footprint);
                return Err(failure.into());
            }
            Err(join_err) => {
                self.unreserve(footprint);
                return Err(PipelineError::Internal(format!(
                    "loading backend '{backend_id}' aborted: {join_err}"
                )));
            }
        };

        let generation = {
            let mut state = self.inner.state();
            let generation = state.next_generation;
            state.next_generation += 1;
            state.entries.insert(
                backend_id.to_string(),
                Entry {
                    handle: Arc::clone(&handle),
                    generation,
                    refs: 1,
                    last_used: Instant::now(),
                    footprint,
                },
            );
            generation
        };
        self.inner.instantiations.fetch_add(1, Ordering::Relaxed);
        info!(
            backend_id,
            device = %device,
            footprint_bytes = footprint,
            "Backend instantiated"
        );

        Ok(BackendLease {
            inner: Arc::clone(&self.inner),
            backend_id: backend_id.to_string(),
            generation,
            handle,
        })
    }

    /// Return a lease. Equivalent to dropping it.
    pub fn release(&self, lease: BackendLease) {
        drop(lease);
    }

    /// Number of instances created over the registry's lifetime.
    #[must_use]
    pub fn instantiation_count(&self) -> u64 {
        self.inner.instantiations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.inner.state();
        let mut cached: Vec<(String, usize)> = state
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.refs))
            .collect();
        cached.sort();
        let mut retired: Vec<String> = state
            .retired
            .values()
            .map(|retired| retired.backend_id.clone())
            .collect();
        retired.sort();
        RegistrySnapshot {
            budget_bytes: self.inner.config.budget_bytes,
            reserved_bytes: state.reserved,
            cached,
            retired,
        }
    }

    fn try_cached(&self, backend_id: &str) -> Option<BackendLease> {
        let (handle, generation) = self.inner.state().lease_cached(backend_id)?;
        debug!(backend_id, "Reusing cached backend");
        Some(BackendLease {
            inner: Arc::clone(&self.inner),
            backend_id: backend_id.to_string(),
            generation,
            handle,
        })
    }

    fn reserve(&self, backend_id: &str, footprint: u64) -> Result<(), PipelineError> {
        let budget = self.inner.config.budget_bytes;
        if footprint > budget {
            warn!(
                backend_id,
                footprint_bytes = footprint,
                budget_bytes = budget,
                "Backend footprint exceeds memory budget"
            );
            return Err(PipelineError::ResourceExhausted(format!(
                "backend '{backend_id}' needs {footprint} bytes, budget is {budget}"
            )));
        }

        let evicted = {
            let mut state = self.inner.state();
            let Some(evicted) = state.make_room(footprint, budget) else {
                let reserved = state.reserved;
                let busy = state.entries.len() + state.retired.len();
                drop(state);
                warn!(
                    backend_id,
                    footprint_bytes = footprint,
                    reserved_bytes = reserved,
                    busy_instances = busy,
                    "No evictable backend for requested footprint"
                );
                return Err(PipelineError::ResourceExhausted(format!(
                    "backend '{backend_id}' needs {footprint} bytes; {reserved} of {budget} held by busy backends"
                )));
            };
            state.reserved += footprint;
            evicted
        };

        for (id, handle) in evicted {
            drop(handle);
            info!(backend_id = %id, reason = %EvictionReason::Pressure, "Backend evicted");
        }
        Ok(())
    }

    fn unreserve(&self, footprint: u64) {
        let mut state = self.inner.state();
        state.reserved = state.reserved.saturating_sub(footprint);
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("config", &self.inner.config)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// A borrowed backend instance. Dropping the lease releases it.
pub struct BackendLease {
    inner: Arc<Inner>,
    backend_id: String,
    generation: u64,
    handle: Arc<dyn SynthesisBackend>,
}

impl BackendLease {
    #[must_use]
    pub fn backend(&self) -> &dyn SynthesisBackend {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Stop handing this instance out. Its memory is freed once every
    /// lease on it has been released.
    pub fn mark_stale(&self) {
        self.inner.mark_stale(&self.backend_id, self.generation);
    }

    /// Whether two leases point at the same loaded instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.inner.release(&self.backend_id, self.generation);
    }
}

impl fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLease")
            .field("backend_id", &self.backend_id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voxrelay_core::{AudioArtifact, BackendFailure, ErrorKind, ParamMap};

    const MB: u64 = 1024 * 1024;

    struct Silent(String);

    #[async_trait]
    impl SynthesisBackend for Silent {
        fn backend_id(&self) -> &str {
            &self.0
        }

        async fn synthesize(
            &self,
            _text: &str,
            _params: &ParamMap,
        ) -> Result<AudioArtifact, BackendFailure> {
            Ok(AudioArtifact::new(Vec::new(), 0.0))
        }
    }

    struct Sized100;

    impl BackendFactory for Sized100 {
        fn footprint_bytes(&self, backend_id: &str) -> Option<u64> {
            (backend_id != "unknown").then_some(100 * MB)
        }

        fn instantiate(
            &self,
            backend_id: &str,
            _device: DevicePlacement,
        ) -> Result<Arc<dyn SynthesisBackend>, BackendFailure> {
            if backend_id == "broken" {
                return Err(BackendFailure::new(backend_id, "weights missing"));
            }
            Ok(Arc::new(Silent(backend_id.to_string())))
        }

        fn available(&self) -> Vec<String> {
            vec!["A".into(), "B".into(), "C".into()]
        }
    }

    fn registry(budget_mb: u64, degraded: bool) -> BackendRegistry {
        BackendRegistry::new(
            Arc::new(Sized100),
            RegistryConfig {
                budget_bytes: budget_mb * MB,
                device: DevicePlacement::Cpu,
                degraded,
            },
        )
    }

    #[tokio::test]
    async fn test_same_id_reuses_instance() {
        let registry = registry(200, false);
        let first = registry.acquire("A").await.unwrap();
        let second = registry.acquire("A").await.unwrap();
        assert!(first.same_instance(&second));
        assert_eq!(registry.instantiation_count(), 1);
        assert_eq!(registry.snapshot().cached, vec![("A".to_string(), 2)]);
        assert_eq!(registry.snapshot().reserved_bytes, 100 * MB);
    }

    #[tokio::test]
    async fn test_release_keeps_instance_cached() {
        let registry = registry(200, false);
        let lease = registry.acquire("A").await.unwrap();
        registry.release(lease);
        assert_eq!(registry.snapshot().cached, vec![("A".to_string(), 0)]);

        let _again = registry.acquire("A").await.unwrap();
        assert_eq!(registry.instantiation_count(), 1);
    }

    #[tokio::test]
    async fn test_lru_idle_instance_is_evicted_under_pressure() {
        let registry = registry(200, false);
        drop(registry.acquire("A").await.unwrap());
        drop(registry.acquire("B").await.unwrap());
        // Touch A so B becomes least recently used.
        drop(registry.acquire("A").await.unwrap());

        let _c = registry.acquire("C").await.unwrap();
        let cached: Vec<String> = registry
            .snapshot()
            .cached
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(cached, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(registry.snapshot().reserved_bytes, 200 * MB);
    }

    #[tokio::test]
    async fn test_exhausted_when_every_instance_is_leased() {
        let registry = registry(200, false);
        let _a = registry.acquire("A").await.unwrap();
        let _b = registry.acquire("B").await.unwrap();

        let err = registry.acquire("C").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(registry.snapshot().reserved_bytes, 200 * MB);
        assert_eq!(registry.instantiation_count(), 2);
    }

    #[tokio::test]
    async fn test_footprint_larger_than_budget_is_exhausted() {
        let registry = registry(50, false);
        let err = registry.acquire("A").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_validation_error() {
        let registry = registry(200, false);
        let err = registry.acquire("unknown").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_failed_instantiation_returns_reservation() {
        let registry = registry(200, false);
        let err = registry.acquire("broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendFailure);
        assert_eq!(registry.snapshot().reserved_bytes, 0);
        assert_eq!(registry.instantiation_count(), 0);
    }

    #[tokio::test]
    async fn test_degraded_mode_evicts_on_last_release() {
        let registry = registry(200, true);
        let first = registry.acquire("A").await.unwrap();
        let second = registry.acquire("A").await.unwrap();
        drop(first);
        assert_eq!(registry.snapshot().cached.len(), 1);
        drop(second);
        assert!(registry.snapshot().cached.is_empty());
        assert_eq!(registry.snapshot().reserved_bytes, 0);

        let _again = registry.acquire("A").await.unwrap();
        assert_eq!(registry.instantiation_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_instance_is_replaced_and_freed_after_leases() {
        let registry = registry(300, false);
        let held = registry.acquire("A").await.unwrap();
        held.mark_stale();

        let fresh = registry.acquire("A").await.unwrap();
        assert!(!held.same_instance(&fresh));
        assert_eq!(registry.instantiation_count(), 2);
        assert_eq!(registry.snapshot().retired, vec!["A".to_string()]);
        assert_eq!(registry.snapshot().reserved_bytes, 200 * MB);

        drop(held);
        assert!(registry.snapshot().retired.is_empty());
        assert_eq!(registry.snapshot().reserved_bytes, 100 * MB);
        assert_eq!(registry.snapshot().cached, vec![("A".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_stale_instance_is_freed_by_last_lease() {
        let registry = registry(200, false);
        let lease = registry.acquire("A").await.unwrap();
        let other = registry.acquire("A").await.unwrap();
        lease.mark_stale();
        // Marking twice is harmless.
        other.mark_stale();

        drop(other);
        assert_eq!(registry.snapshot().retired, vec!["A".to_string()]);
        drop(lease);
        assert!(registry.snapshot().retired.is_empty());
        assert!(registry.snapshot().cached.is_empty());
        assert_eq!(registry.snapshot().reserved_bytes, 0);
    }
}
