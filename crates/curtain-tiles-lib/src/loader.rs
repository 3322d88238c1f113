//! Asynchronous tile loading: disk cache first, then the network
//!
//! Every failure is absorbed here. Callers only observe whether a tile ended up with texture
//! data, and the absent-resource tracker keeps failing tiles from being retried every frame.

use crate::services::{FileStore, Retriever, TileDecoder, decoder_for_format};
use crate::{LevelSet, RequestQueue, TextureTile, TileRuntime};
use std::fmt;
use std::path::Path as FilePath;
use std::sync::{Arc, PoisonError};
use std::time::{Instant, SystemTime};

/// Result of one load attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Decoded from the disk cache
    LoadedFromDisk,
    /// Fetched, stored in the disk cache and decoded
    Downloaded,
    /// Not in the disk cache (disk-only loads)
    NotCached,
    /// Fetch failed or was not allowed; the tile was marked absent
    Absent,
    /// The service host is unreachable; the tile was marked absent
    HostUnavailable,
    /// Stored or fetched bytes failed to decode; any cached file was removed and the tile
    /// marked absent
    Corrupt,
    /// Another task is loading the tile
    AlreadyLoading,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::LoadedFromDisk | Self::Downloaded)
    }
}

/// Loads tiles of one level set
#[derive(Clone)]
pub struct TileLoader {
    level_set: Arc<LevelSet>,
    runtime: Arc<TileRuntime>,
    store: Arc<dyn FileStore>,
    retriever: Arc<dyn Retriever>,
    decoder: Arc<dyn TileDecoder>,
}

impl fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileLoader")
            .field("cache_name", self.level_set.cache_name())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileLoader {
    /// Loader decoding with the decoder matching the level set's format suffix
    pub fn new(
        level_set: Arc<LevelSet>,
        runtime: Arc<TileRuntime>,
        store: Arc<dyn FileStore>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        let decoder = decoder_for_format(&level_set.config().format_suffix);
        Self {
            level_set,
            runtime,
            store,
            retriever,
            decoder,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    #[inline]
    pub fn level_set(&self) -> &Arc<LevelSet> {
        &self.level_set
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<TileRuntime> {
        &self.runtime
    }

    /// Synchronous disk-only load, used for forced level-zero tiles on the render thread
    pub fn force_load(&self, tile: &TextureTile) -> LoadOutcome {
        let Some(claim) = self.runtime.claim_load(tile.key()) else {
            return LoadOutcome::AlreadyLoading;
        };
        let outcome = self.load_from_disk(tile);
        drop(claim);
        tracing::debug!(tile = %tile.key(), ?outcome, "Forced tile load");
        outcome
    }

    /// Full pipeline: disk cache, then network
    ///
    /// The caller must hold the tile's key in the runtime's in-flight set. Cache file access
    /// runs on the blocking pool.
    pub async fn load(&self, tile: Arc<TextureTile>) -> LoadOutcome {
        let disk_tile = tile.clone();
        let outcome = self
            .on_blocking_pool(move |loader| loader.load_from_disk(&disk_tile))
            .await
            .unwrap_or(LoadOutcome::NotCached);
        match outcome {
            LoadOutcome::NotCached => self.load_from_network(&tile).await,
            outcome => outcome,
        }
    }

    async fn on_blocking_pool<T, F>(&self, work: F) -> Option<T>
    where
        F: FnOnce(&TileLoader) -> T + Send + 'static,
        T: Send + 'static,
    {
        let loader = self.clone();
        match self.runtime.handle().spawn_blocking(move || work(&loader)).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("Cache file task failed: {}", err);
                None
            }
        }
    }

    fn load_from_disk(&self, tile: &TextureTile) -> LoadOutcome {
        let path = tile.tile().path();
        let lock = self.runtime.dataset_lock(self.level_set.cache_name());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(file) = self.store.find_file(&path) else {
            return LoadOutcome::NotCached;
        };

        if is_file_expired(&file, tile.tile().level().expiry_time(), SystemTime::now()) {
            tracing::debug!(tile = %tile.key(), "Removing expired cache file");
            self.remove_cached(&path);
            return LoadOutcome::NotCached;
        }

        let bytes = match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("Failed to read {}: {}", file.display(), err);
                return LoadOutcome::NotCached;
            }
        };

        match self.decoder.decode(&bytes) {
            Ok(data) => {
                tile.set_texture_data(data);
                self.level_set.unmark_resource_absent(tile.key());
                LoadOutcome::LoadedFromDisk
            }
            Err(err) => {
                tracing::warn!("Corrupt cache file {}: {}", file.display(), err);
                self.remove_cached(&path);
                self.level_set.mark_resource_absent(tile.key());
                LoadOutcome::Corrupt
            }
        }
    }

    async fn load_from_network(&self, tile: &TextureTile) -> LoadOutcome {
        let key = tile.key();
        if !self.level_set.config().network_retrieval_enabled {
            self.level_set.mark_resource_absent(key);
            return LoadOutcome::Absent;
        }

        let url = match self.level_set.tile_url(tile.tile()) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(tile = %key, "Cannot build tile URL: {}", err);
                self.level_set.mark_resource_absent(key);
                return LoadOutcome::Absent;
            }
        };

        if !self.retriever.is_available(&url) {
            self.level_set.mark_resource_absent(key);
            return LoadOutcome::HostUnavailable;
        }

        let bytes = match self.retriever.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(tile = %key, "Fetch failed: {}", err);
                self.level_set.mark_resource_absent(key);
                return LoadOutcome::Absent;
            }
        };

        // Only payloads that decode reach the disk cache
        match self.decoder.decode(&bytes) {
            Ok(data) => {
                let path = tile.tile().path();
                self.on_blocking_pool(move |loader| loader.store_bytes(&path, &bytes)).await;
                tile.set_texture_data(data);
                self.level_set.unmark_resource_absent(key);
                LoadOutcome::Downloaded
            }
            Err(err) => {
                tracing::warn!(tile = %key, "Downloaded tile failed to decode: {}", err);
                self.level_set.mark_resource_absent(key);
                LoadOutcome::Corrupt
            }
        }
    }

    fn store_bytes(&self, path: &str, bytes: &[u8]) {
        let lock = self.runtime.dataset_lock(self.level_set.cache_name());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self
            .store
            .new_file(path)
            .and_then(|file| std::fs::write(file, bytes));
        if let Err(err) = result {
            tracing::warn!("Failed to write cache file {}: {}", path, err);
        }
    }

    fn remove_cached(&self, path: &str) {
        if let Err(err) = self.store.remove_file(path) {
            tracing::warn!("Failed to remove cache file {}: {}", path, err);
        }
    }

    /// Hand queued requests to the worker pool, nearest first
    ///
    /// Requests beyond the free worker capacity are dropped. Returns the number of loads
    /// started.
    pub fn flush(&self, queue: &mut RequestQueue) -> usize {
        let tasks = queue.drain_sorted(Instant::now());
        let mut started = 0;

        for task in tasks {
            if self.runtime.is_loading(task.key()) {
                continue;
            }
            let Some(permit) = self.runtime.try_acquire_permit() else {
                break;
            };
            let Some(claim) = self.runtime.claim_load(task.key()) else {
                continue;
            };
            // Released together, even when the load panics
            let claim = claim.with_permit(permit);

            let loader = self.clone();
            let tile = task.tile;
            self.runtime.spawn(async move {
                let outcome = loader.load(tile).await;
                tracing::trace!(tile = %claim.key(), ?outcome, "Tile load finished");
                drop(claim);
            });
            started += 1;
        }

        started
    }
}

/// A cached file is stale when it predates an expiry time that has passed
fn is_file_expired(file: &FilePath, expiry: Option<SystemTime>, now: SystemTime) -> bool {
    let Some(expiry) = expiry else {
        return false;
    };
    if expiry > now {
        return false;
    }
    match std::fs::metadata(file).and_then(|meta| meta.modified()) {
        Ok(modified) => modified < expiry,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LocalFileStore;
    use crate::services::testing::{MockRetriever, dds_bytes, put_file, temp_store};
    use crate::{LevelSetConfig, RuntimeConfig, TextureData, Tile};
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};
    use std::time::{Duration, UNIX_EPOCH};

    const SERVICE: &str = "http://tiles.test/wms";

    fn config() -> LevelSetConfig {
        LevelSetConfig {
            dataset_name: "section".to_string(),
            cache_name: "cache".to_string(),
            service_url: Some(SERVICE.to_string()),
            num_levels: 3,
            num_empty_levels: 1,
            full_width: 1000,
            full_height: 1000,
            ..Default::default()
        }
    }

    struct Fixture {
        loader: TileLoader,
        store: Arc<LocalFileStore>,
        retriever: Arc<MockRetriever>,
    }

    fn fixture(name: &str, config: LevelSetConfig, retriever: MockRetriever) -> Fixture {
        let level_set = Arc::new(LevelSet::new(config, 0.01).unwrap());
        let runtime = TileRuntime::current(RuntimeConfig::default()).unwrap();
        let store = Arc::new(temp_store(name));
        let retriever = Arc::new(retriever);
        let loader = TileLoader::new(level_set, runtime, store.clone(), retriever.clone());
        Fixture {
            loader,
            store,
            retriever,
        }
    }

    fn texture_tile(loader: &TileLoader, level: usize) -> Arc<TextureTile> {
        let tile: Tile = loader.level_set().create_tile(level, 0, 0).unwrap();
        Arc::new(TextureTile::new(tile))
    }

    /// Store recording the threads its lookups ran on
    struct ThreadRecordingStore {
        inner: LocalFileStore,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl FileStore for ThreadRecordingStore {
        fn find_file(&self, path: &str) -> Option<PathBuf> {
            self.threads.lock().unwrap().push(thread::current().id());
            self.inner.find_file(path)
        }

        fn new_file(&self, path: &str) -> io::Result<PathBuf> {
            self.inner.new_file(path)
        }

        fn remove_file(&self, path: &str) -> io::Result<()> {
            self.inner.remove_file(path)
        }
    }

    struct PanickingDecoder;

    impl TileDecoder for PanickingDecoder {
        fn decode(&self, _bytes: &[u8]) -> crate::Result<TextureData> {
            panic!("decoder bug");
        }
    }

    fn url_for(tile: &TextureTile) -> String {
        format!("{SERVICE}?T=section&L={}&X=0&Y=0", tile.tile().level().level_name())
    }

    #[tokio::test]
    async fn test_disk_hit() {
        let f = fixture("disk-hit", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);
        put_file(&f.store, &tile.tile().path(), &dds_bytes(512, 512));
        f.loader.level_set().mark_resource_absent(tile.key());

        assert_eq!(f.loader.load(tile.clone()).await, LoadOutcome::LoadedFromDisk);
        assert!(tile.has_texture_data());
        assert_eq!(f.loader.level_set().levels()[2].absent_resources().attempts(0), 0);
        assert_eq!(f.retriever.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_disk_access_off_async_thread() {
        let store = Arc::new(ThreadRecordingStore {
            inner: temp_store("disk-thread"),
            threads: Mutex::new(Vec::new()),
        });
        let level_set = Arc::new(LevelSet::new(config(), 0.01).unwrap());
        let runtime = TileRuntime::current(RuntimeConfig::default()).unwrap();
        let retriever = Arc::new(MockRetriever::default());
        let loader = TileLoader::new(level_set, runtime, store.clone(), retriever);
        let tile = texture_tile(&loader, 2);
        put_file(&store.inner, &tile.tile().path(), &dds_bytes(512, 512));

        assert_eq!(loader.load(tile).await, LoadOutcome::LoadedFromDisk);
        let threads = store.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
    }

    #[tokio::test]
    async fn test_corrupt_disk_file_removed() {
        let f = fixture("disk-corrupt", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);
        put_file(&f.store, &tile.tile().path(), b"garbage");

        assert_eq!(f.loader.force_load(&tile), LoadOutcome::Corrupt);
        assert!(f.store.find_file(&tile.tile().path()).is_none());
        assert_eq!(f.loader.level_set().levels()[2].absent_resources().attempts(0), 1);
        assert!(!tile.has_texture_data());
    }

    #[tokio::test]
    async fn test_force_load_missing_file() {
        let f = fixture("force-missing", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 0);
        assert_eq!(f.loader.force_load(&tile), LoadOutcome::NotCached);
        assert!(!f.loader.runtime().is_loading(tile.key()));
    }

    #[tokio::test]
    async fn test_expired_file_removed() {
        let store_name = "disk-expired";
        let seeded = temp_store(store_name);
        put_file(&seeded, "cache/1/0/0_0.dds", &dds_bytes(512, 512));
        std::thread::sleep(Duration::from_millis(50));
        let expiry = SystemTime::now() - Duration::from_millis(10);
        let expiry_ms = expiry.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;

        // Built after the file was written, the fixture keeps it
        let level_set = Arc::new(
            LevelSet::new(
                LevelSetConfig {
                    expiry_time: Some(expiry_ms),
                    network_retrieval_enabled: false,
                    ..config()
                },
                0.01,
            )
            .unwrap(),
        );
        let runtime = TileRuntime::current(RuntimeConfig::default()).unwrap();
        let store = Arc::new(seeded);
        let retriever = Arc::new(MockRetriever::default());
        let loader = TileLoader::new(level_set, runtime, store.clone(), retriever);
        let tile = texture_tile(&loader, 2);

        assert_eq!(loader.load(tile.clone()).await, LoadOutcome::Absent);
        assert!(store.find_file(&tile.tile().path()).is_none());
        assert!(!tile.has_texture_data());
    }

    #[tokio::test]
    async fn test_download_stored_and_decoded() {
        let f = fixture("net-ok", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);
        f.retriever
            .responses
            .lock()
            .unwrap()
            .insert(url_for(&tile), dds_bytes(512, 512));

        assert_eq!(f.loader.load(tile.clone()).await, LoadOutcome::Downloaded);
        assert!(tile.has_texture_data());
        assert!(f.store.find_file(&tile.tile().path()).is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_absent() {
        let f = fixture("net-fail", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);

        assert_eq!(f.loader.load(tile.clone()).await, LoadOutcome::Absent);
        assert_eq!(f.retriever.fetch_count(), 1);
        assert!(f.store.find_file(&tile.tile().path()).is_none());
        assert_eq!(f.loader.level_set().levels()[2].absent_resources().attempts(0), 1);
    }

    #[tokio::test]
    async fn test_unavailable_host_skips_fetch() {
        let retriever = MockRetriever {
            unavailable: true,
            ..Default::default()
        };
        let f = fixture("net-down", config(), retriever);
        let tile = texture_tile(&f.loader, 2);

        assert_eq!(f.loader.load(tile).await, LoadOutcome::HostUnavailable);
        assert_eq!(f.retriever.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_network_disabled_marks_absent() {
        let config = LevelSetConfig {
            network_retrieval_enabled: false,
            ..config()
        };
        let f = fixture("net-off", config, MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);

        assert_eq!(f.loader.load(tile).await, LoadOutcome::Absent);
        assert_eq!(f.retriever.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_download_removed() {
        let f = fixture("net-corrupt", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);
        f.retriever
            .responses
            .lock()
            .unwrap()
            .insert(url_for(&tile), b"<html>error</html>".to_vec());

        assert_eq!(f.loader.load(tile.clone()).await, LoadOutcome::Corrupt);
        assert!(f.store.find_file(&tile.tile().path()).is_none());
        assert_eq!(f.loader.level_set().levels()[2].absent_resources().attempts(0), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_deduplicates_across_queues() {
        let f = fixture("flush-dedup", config(), MockRetriever::default());
        let tile = texture_tile(&f.loader, 2);
        f.retriever
            .responses
            .lock()
            .unwrap()
            .insert(url_for(&tile), dds_bytes(512, 512));

        // Two layers over the same dataset both want the tile
        let mut first = RequestQueue::new(8, Duration::from_secs(5));
        let mut second = RequestQueue::new(8, Duration::from_secs(5));
        first.push(tile.clone(), 10.0);
        second.push(Arc::new(TextureTile::new(tile.tile().clone())), 10.0);

        assert!(f.loader.runtime().try_begin_load(tile.key()));
        assert_eq!(f.loader.flush(&mut first), 0);
        f.loader.runtime().finish_load(tile.key());

        assert_eq!(f.loader.flush(&mut second), 1);
        f.loader.runtime().wait_for_idle().await;
        assert_eq!(f.retriever.fetch_count(), 1);
        assert!(!f.loader.runtime().is_loading(tile.key()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_bounded_by_free_workers() {
        let f = fixture("flush-bounded", config(), MockRetriever::default());
        let mut queue = RequestQueue::new(8, Duration::from_secs(5));
        for column in 0..2 {
            for row in 0..2 {
                let tile = f.loader.level_set().create_tile(2, row, column).unwrap();
                queue.push(Arc::new(TextureTile::new(tile)), (row * 2 + column) as f64);
            }
        }

        let held: Vec<_> = (0..6).filter_map(|_| f.loader.runtime().try_acquire_permit()).collect();
        assert_eq!(held.len(), 6);

        assert_eq!(f.loader.flush(&mut queue), 2);
        assert!(queue.is_empty());
        drop(held);
        f.loader.runtime().wait_for_idle().await;
        assert_eq!(f.retriever.fetch_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_load_releases_tile() {
        let f = fixture("flush-panic", config(), MockRetriever::default());
        let loader = f.loader.clone().with_decoder(Arc::new(PanickingDecoder));
        let tile = texture_tile(&loader, 2);
        f.retriever
            .responses
            .lock()
            .unwrap()
            .insert(url_for(&tile), dds_bytes(512, 512));

        let mut queue = RequestQueue::new(8, Duration::from_secs(5));
        queue.push(tile.clone(), 10.0);
        assert_eq!(loader.flush(&mut queue), 1);
        loader.runtime().wait_for_idle().await;
        assert!(!loader.runtime().is_loading(tile.key()));

        // The tile can be requested again
        queue.push(tile.clone(), 10.0);
        assert_eq!(loader.flush(&mut queue), 1);
        loader.runtime().wait_for_idle().await;
        assert_eq!(f.retriever.fetch_count(), 2);
    }
}
