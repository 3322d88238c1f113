//! The ordered pyramid of levels and tile URL construction

use crate::{CurtainError, Level, LevelParams, LevelSetConfig, Result, Segment, Tile, TileKey};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Builds the network URL of a tile
pub trait TileUrlBuilder: Send + Sync {
    fn url(&self, tile: &Tile) -> Result<String>;
}

/// `{service}{sep}T={dataset}&L={level}&X={column}&Y={row}[&F={format}]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultUrlBuilder {
    service_url: String,
    dataset_name: String,
    image_format: Option<String>,
}

impl DefaultUrlBuilder {
    pub fn new(
        service_url: impl Into<String>,
        dataset_name: impl Into<String>,
        image_format: Option<String>,
    ) -> Self {
        Self {
            service_url: service_url.into(),
            dataset_name: dataset_name.into(),
            image_format,
        }
    }

    fn separator(&self) -> &'static str {
        if !self.service_url.contains('?') {
            "?"
        } else if self.service_url.ends_with('?') || self.service_url.ends_with('&') {
            ""
        } else {
            "&"
        }
    }
}

impl TileUrlBuilder for DefaultUrlBuilder {
    fn url(&self, tile: &Tile) -> Result<String> {
        let mut url = format!(
            "{}{}T={}&L={}&X={}&Y={}",
            self.service_url,
            self.separator(),
            self.dataset_name,
            tile.level().level_name(),
            tile.column(),
            tile.row()
        );
        if let Some(format) = &self.image_format {
            url.push_str("&F=");
            url.push_str(format);
        }
        Ok(url)
    }
}

/// Ordered levels of one dataset, coarsest first
pub struct LevelSet {
    config: LevelSetConfig,
    levels: Vec<Arc<Level>>,
    cache_name: Arc<str>,
    final_level: usize,
    url_builder: Arc<dyn TileUrlBuilder>,
}

impl fmt::Debug for LevelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelSet")
            .field("cache_name", &self.cache_name)
            .field("levels", &self.levels)
            .field("final_level", &self.final_level)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl LevelSet {
    /// Build the level set, fetching tiles from the configured service URL
    ///
    /// `path_length` is the angular length of the curtain path in radians.
    pub fn new(config: LevelSetConfig, path_length: f64) -> Result<Self> {
        let service_url = config.service_url.clone().ok_or_else(|| {
            CurtainError::Config(format!(
                "dataset '{}' has no service URL and no URL builder",
                config.cache_name
            ))
        })?;
        let builder = DefaultUrlBuilder::new(
            service_url,
            config.dataset_name.clone(),
            config.image_format.clone(),
        );
        Self::with_url_builder(config, path_length, Arc::new(builder))
    }

    pub fn with_url_builder(
        config: LevelSetConfig,
        path_length: f64,
        url_builder: Arc<dyn TileUrlBuilder>,
    ) -> Result<Self> {
        config.validate()?;
        if !path_length.is_finite() || path_length <= 0.0 {
            return Err(CurtainError::InvalidGeometry(format!(
                "path length must be positive, got {path_length}"
            )));
        }

        let count = config.num_levels;
        let mut widths = vec![config.full_width; count];
        let mut heights = vec![config.full_height; count];
        for i in (0..count - 1).rev() {
            widths[i] = coarser_size(widths[i + 1], config.tile_width);
            heights[i] = coarser_size(heights[i + 1], config.tile_height);
        }

        let expiry = config.expiry();
        let mut levels = Vec::with_capacity(count);
        for i in 0..count {
            let empty = i < config.num_empty_levels;
            let level_name = if empty {
                String::new()
            } else {
                (i - config.num_empty_levels).to_string()
            };
            let level = Level::new(LevelParams {
                level_number: i,
                level_name,
                cache_name: config.cache_name.clone(),
                level_width: widths[i],
                level_height: heights[i],
                tile_width: config.tile_width,
                tile_height: config.tile_height,
                format_suffix: config.format_suffix.clone(),
                texel_size: path_length / widths[i] as f64,
                empty,
                active: !config.inactive_levels.contains(&i),
                expiry_time: expiry,
                max_absent_attempts: config.max_absent_attempts,
                min_absent_check_interval: config.min_absent_check_interval(),
            })?;
            levels.push(Arc::new(level));
        }

        // Level 0 is always active
        let final_level = levels
            .iter()
            .rposition(|level| level.is_active())
            .unwrap_or(0);

        tracing::debug!(
            cache = %config.cache_name,
            levels = count,
            final_level,
            "Built level set"
        );

        Ok(Self {
            cache_name: Arc::from(config.cache_name.as_str()),
            config,
            levels,
            final_level,
            url_builder,
        })
    }

    #[inline]
    pub fn config(&self) -> &LevelSetConfig {
        &self.config
    }

    #[inline]
    pub fn cache_name(&self) -> &Arc<str> {
        &self.cache_name
    }

    #[inline]
    pub fn levels(&self) -> &[Arc<Level>] {
        &self.levels
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level_for_number(&self, level_number: usize) -> Option<&Arc<Level>> {
        self.levels.get(level_number)
    }

    pub fn first_level(&self) -> &Arc<Level> {
        &self.levels[0]
    }

    /// The finest active level
    pub fn last_level(&self) -> &Arc<Level> {
        &self.levels[self.final_level]
    }

    pub fn is_final_level(&self, level_number: usize) -> bool {
        level_number == self.final_level
    }

    pub fn expiry_time(&self) -> Option<SystemTime> {
        self.config.expiry()
    }

    pub fn compute_segment_for_key(&self, key: &TileKey) -> Option<Segment> {
        let level = self.level_for_number(key.level)?;
        Some(level.compute_segment_for_row_column(key.row, key.column))
    }

    /// Create the tile at `(level, row, column)` if it lies inside the grid
    pub fn create_tile(&self, level_number: usize, row: u32, column: u32) -> Option<Tile> {
        let level = self.level_for_number(level_number)?;
        if row >= level.row_count() || column >= level.column_count() {
            return None;
        }
        Some(Tile::new(
            level.clone(),
            row,
            column,
            self.cache_name.clone(),
        ))
    }

    pub fn tile_for_key(&self, key: &TileKey) -> Option<Tile> {
        self.create_tile(key.level, key.row, key.column)
    }

    /// All tiles of the coarsest level, row by row
    pub fn top_level_tiles(&self) -> Vec<Tile> {
        let level = self.first_level();
        let mut tiles = Vec::with_capacity((level.row_count() * level.column_count()) as usize);
        for row in 0..level.row_count() {
            for column in 0..level.column_count() {
                tiles.push(Tile::new(
                    level.clone(),
                    row,
                    column,
                    self.cache_name.clone(),
                ));
            }
        }
        tiles
    }

    /// Tiles of the next level covering `tile`
    ///
    /// An axis is split in two when the next level is wider (or taller) along it. Children
    /// falling outside the next level's grid are skipped.
    pub fn child_tiles(&self, tile: &Tile) -> SmallVec<[Tile; 4]> {
        let mut children = SmallVec::new();
        let Some(next) = self.level_for_number(tile.level_number() + 1) else {
            return children;
        };

        let level = tile.level();
        let columns_per_tile = if next.level_width() > level.level_width() { 2 } else { 1 };
        let rows_per_tile = if next.level_height() > level.level_height() { 2 } else { 1 };

        for dr in 0..rows_per_tile {
            for dc in 0..columns_per_tile {
                let row = tile.row() * rows_per_tile + dr;
                let column = tile.column() * columns_per_tile + dc;
                if row < next.row_count() && column < next.column_count() {
                    children.push(Tile::new(
                        next.clone(),
                        row,
                        column,
                        self.cache_name.clone(),
                    ));
                }
            }
        }
        children
    }

    pub fn tile_url(&self, tile: &Tile) -> Result<String> {
        self.url_builder.url(tile)
    }

    fn tracked_tile(&self, key: &TileKey) -> Option<(&Arc<Level>, i64)> {
        let level = self.level_for_number(key.level)?;
        let number = level.tile_number(key.row, key.column);
        (number >= 0).then_some((level, number))
    }

    pub fn mark_resource_absent(&self, key: &TileKey) {
        if let Some((level, number)) = self.tracked_tile(key) {
            level.absent_resources().mark_resource_absent(number);
        }
    }

    pub fn mark_resource_absent_at(&self, key: &TileKey, now: Instant) {
        if let Some((level, number)) = self.tracked_tile(key) {
            level.absent_resources().mark_resource_absent_at(number, now);
        }
    }

    pub fn is_resource_absent(&self, key: &TileKey) -> bool {
        self.is_resource_absent_at(key, Instant::now())
    }

    pub fn is_resource_absent_at(&self, key: &TileKey, now: Instant) -> bool {
        self.tracked_tile(key).is_some_and(|(level, number)| {
            level.absent_resources().is_resource_absent_at(number, now)
        })
    }

    pub fn unmark_resource_absent(&self, key: &TileKey) {
        if let Some((level, number)) = self.tracked_tile(key) {
            level.absent_resources().unmark_resource_absent(number);
        }
    }
}

/// Size of the next coarser level along one axis
#[inline]
fn coarser_size(finer: u32, tile_size: u32) -> u32 {
    if finer > tile_size {
        finer.div_ceil(2)
    } else {
        finer
    }
}
