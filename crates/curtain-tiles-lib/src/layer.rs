//! Per-frame tile assembly
//!
//! Each frame the layer walks the pyramid from the coarsest tiles down. A visible tile is drawn
//! when it is on the final level or fine enough for its distance to the eye, otherwise its
//! children are visited. Tiles without a texture are queued for loading and drawn with the
//! texture of their nearest resident ancestor in the meantime.

use crate::services::{FileStore, GraphicsBackend, Retriever, TileDraw, UploadOptions};
use crate::view::{Extent, ViewProvider};
use crate::{
    CurtainShape, LayerConfig, LevelSet, LevelSetConfig, Path, RequestQueue, Result,
    TexCoordTransform, TextureTile, TileKey, TileLoader, TileRuntime,
};
use glam::DVec3;
use std::sync::Arc;
use std::time::SystemTime;

/// Base of the detail factor, the level set's detail hint is added to it
const BASE_DETAIL_FACTOR: f64 = 2.8;

/// A tile selected for drawing this frame
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub tile: Arc<TextureTile>,
    /// Resident ancestor whose texture stands in for the tile's own
    pub fallback: Option<TileKey>,
}

impl DrawItem {
    /// Level of the texture actually drawn
    pub fn render_level(&self) -> usize {
        self.fallback
            .as_ref()
            .map_or(self.tile.key().level, |key| key.level)
    }

    pub fn texture_key(&self) -> &TileKey {
        self.fallback.as_ref().unwrap_or(self.tile.key())
    }
}

/// Counters of one rendered frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub tiles_visited: usize,
    pub tiles_culled: usize,
    pub tiles_drawn: usize,
    pub fallback_draws: usize,
    /// Selected tiles with neither a texture nor a usable fallback
    pub tiles_missing: usize,
    pub requests_queued: usize,
    pub loads_started: usize,
    pub forced_loads: usize,
    pub uploads: usize,
    pub max_depth: usize,
}

/// A curtain draped along a path, textured from one tiled dataset
pub struct CurtainLayer {
    path: Arc<Path>,
    level_set: Arc<LevelSet>,
    runtime: Arc<TileRuntime>,
    loader: TileLoader,
    config: LayerConfig,
    shape: CurtainShape,
    detail_factor: f64,
    queue: RequestQueue,
    retained_top_tiles: Vec<Arc<TextureTile>>,
    draw_list: Vec<DrawItem>,
}

impl std::fmt::Debug for CurtainLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurtainLayer")
            .field("path", &self.path.id())
            .field("level_set", &self.level_set.cache_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl CurtainLayer {
    /// Layer over a new level set built for `path`
    pub fn new(
        path: Arc<Path>,
        level_set_config: LevelSetConfig,
        config: LayerConfig,
        runtime: Arc<TileRuntime>,
        store: Arc<dyn FileStore>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self> {
        let level_set = Arc::new(LevelSet::new(level_set_config, path.length())?);
        Self::with_level_set(path, level_set, config, runtime, store, retriever)
    }

    /// Layer over an existing level set, sharing its absent-resource tracking
    pub fn with_level_set(
        path: Arc<Path>,
        level_set: Arc<LevelSet>,
        config: LayerConfig,
        runtime: Arc<TileRuntime>,
        store: Arc<dyn FileStore>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self> {
        config.validate()?;
        let loader = TileLoader::new(level_set.clone(), runtime.clone(), store, retriever);
        Ok(Self::from_parts(path, loader, config))
    }

    /// Layer using a preconfigured loader
    pub fn with_loader(path: Arc<Path>, loader: TileLoader, config: LayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(path, loader, config))
    }

    fn from_parts(path: Arc<Path>, loader: TileLoader, config: LayerConfig) -> Self {
        let level_set = loader.level_set().clone();
        let runtime = loader.runtime().clone();
        tracing::info!(
            cache = %level_set.cache_name(),
            levels = level_set.num_levels(),
            path_km = path.length_meters() / 1000.0,
            "Created curtain layer"
        );
        Self {
            detail_factor: BASE_DETAIL_FACTOR + level_set.config().detail_hint,
            shape: CurtainShape::from_config(&config),
            queue: RequestQueue::new(config.request_queue_capacity, config.stale_request_limit()),
            path,
            level_set,
            runtime,
            loader,
            config,
            retained_top_tiles: Vec::new(),
            draw_list: Vec::new(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Arc<Path> {
        &self.path
    }

    #[inline]
    pub fn level_set(&self) -> &Arc<LevelSet> {
        &self.level_set
    }

    #[inline]
    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    #[inline]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    #[inline]
    pub fn shape(&self) -> &CurtainShape {
        &self.shape
    }

    /// Select, draw and request the tiles of one frame
    pub fn render(
        &mut self,
        view: &dyn ViewProvider,
        backend: &mut dyn GraphicsBackend,
    ) -> FrameStats {
        #[cfg(feature = "profiling")]
        profiling::scope!("CurtainLayer::render");
        let mut stats = FrameStats::default();
        self.draw_list.clear();

        for tile in self.top_level_tiles() {
            self.add_tile_or_descendants(tile, None, 1, view, backend, &mut stats);
        }

        // Coarse textures first so finer tiles are drawn over them
        self.draw_list.sort_by_key(DrawItem::render_level);
        self.draw(view, backend, &mut stats);

        stats.loads_started = self.loader.flush(&mut self.queue);
        self.draw_list.clear();

        tracing::debug!(
            drawn = stats.tiles_drawn,
            fallback = stats.fallback_draws,
            queued = stats.requests_queued,
            started = stats.loads_started,
            "Rendered curtain frame"
        );
        stats
    }

    fn top_level_tiles(&mut self) -> Vec<Arc<TextureTile>> {
        if !self.retained_top_tiles.is_empty() {
            return self.retained_top_tiles.clone();
        }
        let cache = self.runtime.memory_cache();
        let tiles: Vec<_> = self
            .level_set
            .top_level_tiles()
            .into_iter()
            .map(|tile| cache.get_or_insert_with(tile.key(), || TextureTile::new(tile.clone())))
            .collect();
        if self.level_set.config().retain_level_zero_tiles {
            self.retained_top_tiles = tiles.clone();
        }
        tiles
    }

    fn add_tile_or_descendants(
        &mut self,
        tile: Arc<TextureTile>,
        ancestor: Option<Arc<TextureTile>>,
        depth: usize,
        view: &dyn ViewProvider,
        backend: &mut dyn GraphicsBackend,
        stats: &mut FrameStats,
    ) {
        stats.tiles_visited += 1;
        stats.max_depth = stats.max_depth.max(depth);

        let points = self
            .path
            .points_in_segment(tile.tile().segment(), &self.shape, view);
        let Some(extent) = Extent::from_points(&points) else {
            return;
        };
        if !view.frustum().intersects(&extent) {
            stats.tiles_culled += 1;
            return;
        }

        let level = tile.tile().level().clone();
        let meets_render_criteria = self.level_set.is_final_level(level.level_number())
            || (level.is_active() && !self.need_to_split(&points, level.texel_size(), view));

        let children = if meets_render_criteria {
            Default::default()
        } else {
            self.level_set.child_tiles(tile.tile())
        };
        if children.is_empty() {
            self.add_tile(tile, ancestor, view, backend, stats);
            return;
        }

        let ancestor = if level.level_number() == 0 || self.ensure_resident(&tile, backend, stats) {
            Some(tile)
        } else {
            ancestor
        };

        let cache = self.runtime.memory_cache();
        let children: Vec<_> = children
            .into_iter()
            .map(|child| cache.get_or_insert_with(child.key(), || TextureTile::new(child.clone())))
            .collect();
        for child in children {
            self.add_tile_or_descendants(child, ancestor.clone(), depth + 1, view, backend, stats);
        }
    }

    /// Whether the texels of a tile are too coarse for its distance to the eye
    fn need_to_split(&self, points: &[DVec3], texel_size: f64, view: &dyn ViewProvider) -> bool {
        let eye = view.eye_point();
        let Some(nearest) = points
            .iter()
            .min_by(|a, b| a.distance_squared(eye).total_cmp(&b.distance_squared(eye)))
        else {
            return false;
        };
        let cell_height = texel_size * nearest.length();
        cell_height > nearest.distance(eye) * 10f64.powf(-self.detail_factor)
    }

    fn add_tile(
        &mut self,
        tile: Arc<TextureTile>,
        ancestor: Option<Arc<TextureTile>>,
        view: &dyn ViewProvider,
        backend: &mut dyn GraphicsBackend,
        stats: &mut FrameStats,
    ) {
        let level = tile.tile().level().clone();

        let requestable = !level.is_empty()
            && level.is_active()
            && !self.level_set.is_resource_absent(tile.key());

        if self.ensure_resident(&tile, backend, stats) {
            if requestable && tile.is_expired_at(level.expiry_time(), SystemTime::now()) {
                self.request(&tile, view, stats);
            }
            self.draw_list.push(DrawItem {
                tile,
                fallback: None,
            });
            return;
        }

        if level.level_number() == 0 && self.force_load(&tile, backend, stats) {
            self.draw_list.push(DrawItem {
                tile,
                fallback: None,
            });
            return;
        }

        if requestable {
            self.request(&tile, view, stats);
        }

        let fallback = ancestor.filter(|ancestor| {
            self.ensure_resident(ancestor, backend, stats)
                || (ancestor.key().level == 0 && self.force_load(ancestor, backend, stats))
        });

        match fallback {
            Some(ancestor) => self.draw_list.push(DrawItem {
                tile,
                fallback: Some(ancestor.key().clone()),
            }),
            None => stats.tiles_missing += 1,
        }
    }

    /// Synchronous disk load of a level-zero tile, when enabled
    fn force_load(
        &self,
        tile: &TextureTile,
        backend: &mut dyn GraphicsBackend,
        stats: &mut FrameStats,
    ) -> bool {
        if !self.level_set.config().force_level_zero_loads
            || self.level_set.is_resource_absent(tile.key())
        {
            return false;
        }
        if !self.loader.force_load(tile).is_loaded() {
            return false;
        }
        stats.forced_loads += 1;
        self.ensure_resident(tile, backend, stats)
    }

    /// Whether the backend holds the tile's texture, uploading a freshly loaded payload
    fn ensure_resident(
        &self,
        tile: &TextureTile,
        backend: &mut dyn GraphicsBackend,
        stats: &mut FrameStats,
    ) -> bool {
        if let Some(data) = tile.take_texture_data() {
            let config = self.level_set.config();
            let options = UploadOptions {
                use_mipmaps: config.use_mipmaps,
                pinned: config.retain_level_zero_tiles && tile.key().level == 0,
            };
            backend.upload(tile.key(), data, options);
            stats.uploads += 1;
            return true;
        }
        backend.is_resident(tile.key())
    }

    fn request(
        &mut self,
        tile: &Arc<TextureTile>,
        view: &dyn ViewProvider,
        stats: &mut FrameStats,
    ) {
        if self.runtime.is_loading(tile.key()) {
            return;
        }
        let center = self
            .path
            .segment_center_point(tile.tile().segment(), &self.shape, view);
        if self.queue.push(tile.clone(), center.distance(view.eye_point())) {
            stats.requests_queued += 1;
            tracing::trace!(tile = %tile.key(), "Queued tile request");
        }
    }

    fn draw(
        &self,
        view: &dyn ViewProvider,
        backend: &mut dyn GraphicsBackend,
        stats: &mut FrameStats,
    ) {
        let update_frequency = self.config.geometry_update_frequency();
        for item in &self.draw_list {
            let texture = item.texture_key();
            if !backend.bind(texture) {
                continue;
            }

            let segment = item.tile.tile().segment();
            let tex_transform = match &item.fallback {
                Some(key) => self
                    .level_set
                    .compute_segment_for_key(key)
                    .map(|ancestor| TexCoordTransform::for_fallback(segment, &ancestor))
                    .unwrap_or_default(),
                None => TexCoordTransform::IDENTITY,
            };
            let geometry = self.path.segment_geometry(
                item.tile.key(),
                segment,
                &self.shape,
                view,
                update_frequency,
            );

            backend.draw(&TileDraw {
                key: item.tile.key(),
                texture,
                tex_transform,
                geometry: &geometry,
            });
            stats.tiles_drawn += 1;
            if item.fallback.is_some() {
                stats.fallback_draws += 1;
            }
        }
    }
}
