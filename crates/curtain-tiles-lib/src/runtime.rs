//! Process-wide registry shared by every curtain layer
//!
//! Holds the texture tile memory cache, the set of tiles currently loading, the per-dataset disk
//! locks and the bounded worker pool. Build one per process and hand it to layers as an `Arc`.

use crate::{RuntimeConfig, TileKey, TileMemoryCache};
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// A key held in the in-flight set, released when dropped
///
/// A worker permit attached with [`LoadClaim::with_permit`] is released after the key.
pub struct LoadClaim {
    runtime: Arc<TileRuntime>,
    key: TileKey,
    permit: Option<OwnedSemaphorePermit>,
}

impl LoadClaim {
    #[inline]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }
}

impl fmt::Debug for LoadClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadClaim")
            .field("key", &self.key)
            .field("has_permit", &self.permit.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for LoadClaim {
    fn drop(&mut self) {
        self.runtime.finish_load(&self.key);
    }
}

#[derive(Debug)]
pub struct TileRuntime {
    config: RuntimeConfig,
    memory_cache: TileMemoryCache,
    in_flight: DashSet<TileKey>,
    dataset_locks: DashMap<Arc<str>, Arc<Mutex<()>>>,
    handle: Handle,
    permits: Arc<Semaphore>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileRuntime {
    pub fn new(config: RuntimeConfig, handle: Handle) -> Arc<Self> {
        let max_loads = config.max_concurrent_loads.max(1);
        tracing::info!(
            max_concurrent_loads = max_loads,
            memory_cache_capacity = config.memory_cache_capacity,
            "Starting tile runtime"
        );
        Arc::new(Self {
            memory_cache: TileMemoryCache::new(config.memory_cache_capacity),
            in_flight: DashSet::new(),
            dataset_locks: DashMap::new(),
            handle,
            permits: Arc::new(Semaphore::new(max_loads)),
            config,
        })
    }

    /// Runtime bound to the tokio runtime of the calling thread
    pub fn current(config: RuntimeConfig) -> crate::Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|err| {
            crate::CurtainError::Config(format!("no tokio runtime available: {err}"))
        })?;
        Ok(Self::new(config, handle))
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn memory_cache(&self) -> &TileMemoryCache {
        &self.memory_cache
    }

    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Claim `key` for loading, false when another task already holds it
    pub fn try_begin_load(&self, key: &TileKey) -> bool {
        self.in_flight.insert(key.clone())
    }

    /// Claim `key` for loading until the returned guard is dropped
    pub fn claim_load(self: &Arc<Self>, key: &TileKey) -> Option<LoadClaim> {
        self.try_begin_load(key).then(|| LoadClaim {
            runtime: self.clone(),
            key: key.clone(),
            permit: None,
        })
    }

    pub fn finish_load(&self, key: &TileKey) {
        self.in_flight.remove(key);
    }

    pub fn is_loading(&self, key: &TileKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn loads_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Lock serializing disk access to one dataset's cache files
    pub fn dataset_lock(&self, cache_name: &Arc<str>) -> Arc<Mutex<()>> {
        self.dataset_locks
            .entry(cache_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// A free worker slot, if any
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        #[cfg(feature = "profiling")]
        {
            self.handle.spawn(async move {
                profiling::scope!("tile_runtime::load");
                future.await
            })
        }
        #[cfg(not(feature = "profiling"))]
        {
            self.handle.spawn(future)
        }
    }

    /// Wait until every spawned load has released its worker slot
    pub async fn wait_for_idle(&self) {
        let total = self.config.max_concurrent_loads.max(1) as u32;
        if let Ok(all) = self.permits.acquire_many(total).await {
            drop(all);
        }
    }
}
