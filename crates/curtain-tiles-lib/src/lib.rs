//! Curtain Tiles Library - Streaming Tile Pyramid for Path-Following Curtains
//!
//! This library streams and renders a multi-resolution image draped onto a vertical "curtain"
//! that follows an arbitrary geographic path (geological cross-sections and similar profile
//! imagery). The dataset is too large to hold in memory, so every frame a quadtree descent
//! picks the tiles to draw, missing tiles are loaded asynchronously and coarser ancestors stand
//! in for them until the finer data arrives.
//!
//! # Architecture
//!
//! - **[`Path`]**: Waypoints with cumulative arc-length parameterization and a geometry cache
//! - **[`Segment`]**: Normalized (percent-along-path, percent-depth) rectangle of the curtain
//! - **[`Level`] / [`LevelSet`]**: The resolution tiers and absent-resource tracking
//! - **[`TextureTile`]**: An addressable tile with its loaded texture payload
//! - **[`RequestQueue`] / [`TileLoader`]**: Priority ordered async loading (disk, then network)
//! - **[`CurtainLayer`]**: Per-frame tile assembly with fallback substitution
//! - **[`TileRuntime`]**: Process-wide registry shared by all layers (memory cache, worker pool)
//!
//! Drawing, GPU textures, network transport and the disk store are external collaborators
//! reached through the traits in [`services`] and [`view`].

mod config;
mod geometry;
mod layer;
mod level;
mod level_set;
mod loader;
mod memory_cache;
mod path;
mod request;
mod runtime;
mod segment;
pub mod services;
mod tile;
pub mod utils;
pub mod view;

// Public API exports
pub use config::{LayerConfig, LevelSetConfig, RuntimeConfig};
pub use geometry::{CurtainShape, SegmentGeometry};
pub use layer::{CurtainLayer, DrawItem, FrameStats};
pub use level::{AbsentResourceList, Level, LevelParams};
pub use level_set::{DefaultUrlBuilder, LevelSet, TileUrlBuilder};
pub use loader::{LoadOutcome, TileLoader};
pub use memory_cache::TileMemoryCache;
pub use path::{Path, PathId};
pub use request::{RequestQueue, RequestTask};
pub use runtime::{LoadClaim, TileRuntime};
pub use segment::{Segment, TexCoordTransform};
pub use tile::{TextureData, TextureFormat, TextureTile, Tile, TileKey};

/// Error types for the curtain tiles library
#[derive(Debug, thiserror::Error)]
pub enum CurtainError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty path")]
    EmptyPath,
}

pub type Result<T> = std::result::Result<T, CurtainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that the configuration entry points are accessible
        let _: fn() -> LevelSetConfig = LevelSetConfig::default;
        let _: fn() -> LayerConfig = LayerConfig::default;
        let _: fn() -> RuntimeConfig = RuntimeConfig::default;
        assert_eq!(Segment::FULL, Segment::new(0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn test_error_display() {
        let err = CurtainError::Config("tile width must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: tile width must be positive"
        );
    }
}
