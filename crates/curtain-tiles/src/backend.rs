//! Graphics backend that keeps textures in host memory and counts draw calls

use curtain_tiles_lib::services::{GraphicsBackend, TextureHandle, TileDraw, UploadOptions};
use curtain_tiles_lib::{TextureData, TileKey};
use lru::LruCache;
use std::collections::HashMap;

#[derive(Debug)]
struct ResidentTexture {
    handle: TextureHandle,
    size_in_bytes: usize,
}

/// Counters since the last [`HeadlessBackend::take_stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub uploads: usize,
    pub uploaded_bytes: usize,
    pub evictions: usize,
    pub draws: usize,
    pub vertices: usize,
}

/// Stand-in for a GPU: textures live in a byte-budgeted LRU, pinned ones outside it
#[derive(Debug)]
pub struct HeadlessBackend {
    textures: LruCache<TileKey, ResidentTexture>,
    pinned: HashMap<TileKey, ResidentTexture>,
    budget_bytes: usize,
    used_bytes: usize,
    next_handle: u64,
    bound: Option<TileKey>,
    stats: BackendStats,
}

impl HeadlessBackend {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            textures: LruCache::unbounded(),
            pinned: HashMap::new(),
            budget_bytes,
            used_bytes: 0,
            next_handle: 1,
            bound: None,
            stats: BackendStats::default(),
        }
    }

    pub fn resident_count(&self) -> usize {
        self.textures.len() + self.pinned.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn take_stats(&mut self) -> BackendStats {
        std::mem::take(&mut self.stats)
    }

    fn texture_size(data: &TextureData, options: UploadOptions) -> usize {
        let base = data.size_in_bytes();
        if options.use_mipmaps { base + base / 3 } else { base }
    }

    fn evict_to_budget(&mut self) {
        while self.used_bytes > self.budget_bytes {
            let Some((key, texture)) = self.textures.pop_lru() else {
                break;
            };
            self.used_bytes -= texture.size_in_bytes;
            self.stats.evictions += 1;
            if self.bound.as_ref() == Some(&key) {
                self.bound = None;
            }
            tracing::trace!(tile = %key, handle = texture.handle.0, "Evicted texture");
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn is_resident(&self, key: &TileKey) -> bool {
        self.pinned.contains_key(key) || self.textures.contains(key)
    }

    fn upload(
        &mut self,
        key: &TileKey,
        data: TextureData,
        options: UploadOptions,
    ) -> TextureHandle {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;

        let texture = ResidentTexture {
            handle,
            size_in_bytes: Self::texture_size(&data, options),
        };
        self.used_bytes += texture.size_in_bytes;
        self.stats.uploads += 1;
        self.stats.uploaded_bytes += texture.size_in_bytes;

        // A key lives in exactly one of the two maps
        let (moved, replaced) = if options.pinned {
            let moved = self.textures.pop(key);
            (moved, self.pinned.insert(key.clone(), texture))
        } else {
            let moved = self.pinned.remove(key);
            let replaced = self.textures.push(key.clone(), texture).map(|(_, old)| old);
            (moved, replaced)
        };
        for old in moved.into_iter().chain(replaced) {
            self.used_bytes -= old.size_in_bytes;
        }

        self.evict_to_budget();
        handle
    }

    fn bind(&mut self, key: &TileKey) -> bool {
        let resident = self.pinned.contains_key(key) || self.textures.get(key).is_some();
        if resident {
            self.bound = Some(key.clone());
        }
        resident
    }

    fn draw(&mut self, draw: &TileDraw<'_>) {
        if self.bound.as_ref() != Some(draw.texture) {
            tracing::warn!(tile = %draw.key, texture = %draw.texture, "Draw without bound texture");
            return;
        }
        self.stats.draws += 1;
        self.stats.vertices += draw.geometry.vertex_count();
        if draw.uses_fallback() {
            tracing::trace!(tile = %draw.key, texture = %draw.texture, "Fallback draw");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curtain_tiles_lib::TextureFormat;
    use std::sync::Arc;

    fn key(column: u32) -> TileKey {
        TileKey::new(1, 0, column, Arc::from("cache"))
    }

    fn data(size: usize) -> TextureData {
        TextureData {
            width: 16,
            height: 16,
            format: TextureFormat::Dds,
            bytes: vec![0; size],
        }
    }

    #[test]
    fn test_upload_and_bind() {
        let mut backend = HeadlessBackend::new(1_000);
        assert!(!backend.is_resident(&key(0)));
        assert!(!backend.bind(&key(0)));

        let first = backend.upload(&key(0), data(100), UploadOptions::default());
        let second = backend.upload(&key(1), data(100), UploadOptions::default());
        assert_ne!(first, second);
        assert!(backend.is_resident(&key(0)));
        assert!(backend.bind(&key(0)));
        assert_eq!(backend.used_bytes(), 200);
    }

    #[test]
    fn test_budget_evicts_least_recently_bound() {
        let mut backend = HeadlessBackend::new(250);
        backend.upload(&key(0), data(100), UploadOptions::default());
        backend.upload(&key(1), data(100), UploadOptions::default());
        backend.bind(&key(0));
        backend.upload(&key(2), data(100), UploadOptions::default());

        assert!(backend.is_resident(&key(0)));
        assert!(!backend.is_resident(&key(1)));
        assert!(backend.is_resident(&key(2)));
        assert_eq!(backend.take_stats().evictions, 1);
    }

    #[test]
    fn test_pinned_textures_survive_budget() {
        let mut backend = HeadlessBackend::new(50);
        let pinned = UploadOptions {
            use_mipmaps: false,
            pinned: true,
        };
        backend.upload(&key(0), data(100), pinned);
        backend.upload(&key(1), data(100), UploadOptions::default());

        assert!(backend.is_resident(&key(0)));
        assert!(!backend.is_resident(&key(1)));
        assert_eq!(backend.resident_count(), 1);
    }

    #[test]
    fn test_mipmaps_add_a_third() {
        let mut backend = HeadlessBackend::new(10_000);
        let options = UploadOptions {
            use_mipmaps: true,
            pinned: false,
        };
        backend.upload(&key(0), data(300), options);
        assert_eq!(backend.used_bytes(), 400);
    }

    #[test]
    fn test_reupload_replaces_size() {
        let mut backend = HeadlessBackend::new(10_000);
        backend.upload(&key(0), data(300), UploadOptions::default());
        backend.upload(&key(0), data(100), UploadOptions::default());
        assert_eq!(backend.used_bytes(), 100);
        assert_eq!(backend.resident_count(), 1);
    }

    #[test]
    fn test_reupload_moves_between_pinned_and_lru() {
        let mut backend = HeadlessBackend::new(10_000);
        let pinned = UploadOptions {
            use_mipmaps: false,
            pinned: true,
        };
        backend.upload(&key(0), data(300), UploadOptions::default());
        backend.upload(&key(0), data(200), pinned);
        assert_eq!(backend.used_bytes(), 200);
        assert_eq!(backend.resident_count(), 1);

        backend.upload(&key(0), data(100), UploadOptions::default());
        assert_eq!(backend.used_bytes(), 100);
        assert_eq!(backend.resident_count(), 1);
    }
}
