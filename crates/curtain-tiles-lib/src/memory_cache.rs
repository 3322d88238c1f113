//! Size-bounded LRU map of texture tiles shared by all layers of a runtime

use crate::{TextureTile, TileKey};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct TileMemoryCache {
    tiles: Mutex<LruCache<TileKey, Arc<TextureTile>>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileMemoryCache {
    /// Create a cache holding at most `capacity` tiles (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<TileKey, Arc<TextureTile>>> {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &TileKey) -> Option<Arc<TextureTile>> {
        self.lock().get(key).cloned()
    }

    /// Fetch a tile, creating and caching it when missing
    pub fn get_or_insert_with(
        &self,
        key: &TileKey,
        create: impl FnOnce() -> TextureTile,
    ) -> Arc<TextureTile> {
        let mut tiles = self.lock();
        if let Some(tile) = tiles.get(key) {
            return tile.clone();
        }
        let tile = Arc::new(create());
        tiles.put(key.clone(), tile.clone());
        tile
    }

    pub fn insert(&self, tile: Arc<TextureTile>) {
        self.lock().put(tile.key().clone(), tile);
    }

    pub fn remove(&self, key: &TileKey) -> Option<Arc<TextureTile>> {
        self.lock().pop(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
