//! Tile addressing and loaded texture state

use crate::{Level, Segment};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Identity of a tile: `(level, row, column, cache name)`
///
/// Used for equality, hashing, the memory cache and the in-flight set. Two layers showing the
/// same dataset produce equal keys and therefore share tiles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: usize,
    pub row: u32,
    pub column: u32,
    pub cache_name: Arc<str>,
}

impl TileKey {
    pub fn new(level: usize, row: u32, column: u32, cache_name: Arc<str>) -> Self {
        Self {
            level,
            row,
            column,
            cache_name,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cache_name, self.level, self.row, self.column
        )
    }
}

/// One addressable unit of the pyramid
#[derive(Clone, Debug)]
pub struct Tile {
    level: Arc<Level>,
    segment: Segment,
    row: u32,
    column: u32,
    key: TileKey,
}

impl Tile {
    pub fn new(level: Arc<Level>, row: u32, column: u32, cache_name: Arc<str>) -> Self {
        let segment = level.compute_segment_for_row_column(row, column);
        let key = TileKey::new(level.level_number(), row, column, cache_name);
        Self {
            level,
            segment,
            row,
            column,
            key,
        }
    }

    #[inline]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    #[inline]
    pub fn level(&self) -> &Arc<Level> {
        &self.level
    }

    #[inline]
    pub fn level_number(&self) -> usize {
        self.level.level_number()
    }

    #[inline]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    #[inline]
    pub fn row(&self) -> u32 {
        self.row
    }

    #[inline]
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Linear tile number inside the level, -1 when outside the grid
    pub fn tile_number(&self) -> i64 {
        self.level.tile_number(self.row, self.column)
    }

    /// Disk cache path `{cache}/{level_name}/{row}/{row}_{column}{suffix}`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}_{}{}",
            self.level.path(),
            self.row,
            self.row,
            self.column,
            self.level.format_suffix()
        )
    }
}

/// Pixel layout of a decoded texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    /// Uncompressed 8-bit RGBA
    Rgba8,
    /// DirectDraw Surface container, passed to the backend untouched
    Dds,
}

/// Decoded image data ready for upload
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bytes: Vec<u8>,
}

impl TextureData {
    pub fn size_in_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// A tile plus its load state
///
/// The payload is written by the loader task that owns the key in the in-flight set and taken
/// by the render thread when it uploads the texture.
#[derive(Debug)]
pub struct TextureTile {
    tile: Tile,
    payload: Mutex<Option<TextureData>>,
    last_update: Mutex<Option<SystemTime>>,
}

impl TextureTile {
    pub fn new(tile: Tile) -> Self {
        Self {
            tile,
            payload: Mutex::new(None),
            last_update: Mutex::new(None),
        }
    }

    #[inline]
    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    #[inline]
    pub fn key(&self) -> &TileKey {
        self.tile.key()
    }

    /// Install decoded data and stamp the update time
    pub fn set_texture_data(&self, data: TextureData) {
        self.set_texture_data_at(data, SystemTime::now());
    }

    pub fn set_texture_data_at(&self, data: TextureData, updated: SystemTime) {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(updated);
    }

    /// Take the payload for upload, leaving the tile empty
    pub fn take_texture_data(&self) -> Option<TextureData> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_texture_data(&self) -> bool {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn last_update(&self) -> Option<SystemTime> {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the texture predates an expiry time that has already passed
    pub fn is_expired_at(&self, expiry: Option<SystemTime>, now: SystemTime) -> bool {
        match (self.last_update(), expiry) {
            (Some(updated), Some(expiry)) => expiry <= now && updated < expiry,
            _ => false,
        }
    }
}
