//! Configuration for level sets, layers and the shared runtime
//!
//! All structs implement `Default` and, with the `serde` feature, can be deserialized from a
//! dataset description file.

use crate::{CurtainError, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Description of a tiled curtain dataset, consumed when building a [`crate::LevelSet`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LevelSetConfig {
    /// Name of the dataset, sent to the tile service as `T=`
    pub dataset_name: String,
    /// Root directory name of the dataset inside the disk cache
    pub cache_name: String,
    /// Base URL of the tile service. Required unless a custom URL builder is supplied.
    pub service_url: Option<String>,
    /// Total number of levels, including empty ones
    pub num_levels: usize,
    /// Number of coarse levels that have no data
    pub num_empty_levels: usize,
    /// Level numbers that are never requested or descended into
    pub inactive_levels: Vec<usize>,
    /// Width of the final level in pixels
    pub full_width: u32,
    /// Height of the final level in pixels
    pub full_height: u32,
    /// Tile width in pixels (default 512)
    pub tile_width: u32,
    /// Tile height in pixels (default 512)
    pub tile_height: u32,
    /// Image format requested from the service (`F=`), e.g. `image/dds`
    pub image_format: Option<String>,
    /// Suffix (with the dot) of cached tile files
    pub format_suffix: String,
    /// Tiles stored before this time (milliseconds since the Unix epoch) are stale
    pub expiry_time: Option<u64>,
    /// Attempts after which a failing tile is considered absent (default 2)
    pub max_absent_attempts: u32,
    /// Interval after which an absent tile may be tried again (default 10 s)
    pub min_absent_check_interval_ms: u64,
    /// Load level zero tiles synchronously from the disk cache when missing
    pub force_level_zero_loads: bool,
    /// Pin level zero textures in the graphics backend
    pub retain_level_zero_tiles: bool,
    /// Detail knob added to the base detail factor, roughly in [-0.5, 0.5]
    pub detail_hint: f64,
    /// Ask the backend to build mipmaps for uploaded textures
    pub use_mipmaps: bool,
    /// When false, tiles missing from the disk cache are marked absent instead of fetched
    pub network_retrieval_enabled: bool,
}

impl Default for LevelSetConfig {
    fn default() -> Self {
        Self {
            dataset_name: String::new(),
            cache_name: String::new(),
            service_url: None,
            num_levels: 0,
            num_empty_levels: 0,
            inactive_levels: Vec::new(),
            full_width: 0,
            full_height: 0,
            tile_width: 512,
            tile_height: 512,
            image_format: None,
            format_suffix: ".dds".to_string(),
            expiry_time: None,
            max_absent_attempts: 2,
            min_absent_check_interval_ms: 10_000,
            force_level_zero_loads: false,
            retain_level_zero_tiles: false,
            detail_hint: 0.0,
            use_mipmaps: true,
            network_retrieval_enabled: true,
        }
    }
}

impl LevelSetConfig {
    /// Check the configuration, failing fast with a descriptive error
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(CurtainError::Config("cache name must not be empty".to_string()));
        }
        if self.num_levels == 0 {
            return Err(CurtainError::Config(
                "number of levels must be positive".to_string(),
            ));
        }
        if self.num_empty_levels >= self.num_levels {
            return Err(CurtainError::Config(format!(
                "{} empty levels leave no data in a {}-level set",
                self.num_empty_levels, self.num_levels
            )));
        }
        if self.full_width == 0 || self.full_height == 0 {
            return Err(CurtainError::Config(format!(
                "full size must be positive, got {}x{}",
                self.full_width, self.full_height
            )));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(CurtainError::Config(format!(
                "tile size must be positive, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if self.max_absent_attempts == 0 {
            return Err(CurtainError::Config(
                "max absent attempts must be positive".to_string(),
            ));
        }
        if let Some(level) = self.inactive_levels.iter().find(|&&l| l >= self.num_levels) {
            return Err(CurtainError::Config(format!(
                "inactive level {} is out of range (0..{})",
                level, self.num_levels
            )));
        }
        if self.inactive_levels.contains(&0) {
            return Err(CurtainError::Config(
                "level 0 cannot be inactive".to_string(),
            ));
        }
        Ok(())
    }

    /// Expiry time as a `SystemTime`
    pub fn expiry(&self) -> Option<SystemTime> {
        self.expiry_time
            .map(|millis| UNIX_EPOCH + Duration::from_millis(millis))
    }

    pub fn min_absent_check_interval(&self) -> Duration {
        Duration::from_millis(self.min_absent_check_interval_ms)
    }
}

/// Shape and behavior of one curtain layer
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LayerConfig {
    /// Elevation of the curtain's top edge in meters
    pub curtain_top: f64,
    /// Elevation of the curtain's bottom edge in meters
    pub curtain_bottom: f64,
    /// Treat top/bottom as offsets from the terrain surface
    pub follow_terrain: bool,
    /// Great-circle subdivisions between consecutive samples of a segment
    pub subsegments: usize,
    /// Maximum age of cached segment geometry
    pub geometry_update_frequency_ms: u64,
    /// Maximum number of load requests queued per frame
    pub request_queue_capacity: usize,
    /// Queued requests older than this are dropped at flush
    ///
    /// The queue is flushed at the end of every frame, so this only drops requests when a
    /// single frame takes longer than the limit.
    pub stale_request_limit_ms: u64,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            curtain_top: 0.0,
            curtain_bottom: -10_000.0,
            follow_terrain: false,
            subsegments: 1,
            geometry_update_frequency_ms: 2_000,
            request_queue_capacity: 128,
            stale_request_limit_ms: 5_000,
        }
    }
}

impl LayerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.curtain_top.is_finite() || !self.curtain_bottom.is_finite() {
            return Err(CurtainError::Config(
                "curtain elevations must be finite".to_string(),
            ));
        }
        if self.request_queue_capacity == 0 {
            return Err(CurtainError::Config(
                "request queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn geometry_update_frequency(&self) -> Duration {
        Duration::from_millis(self.geometry_update_frequency_ms)
    }

    pub fn stale_request_limit(&self) -> Duration {
        Duration::from_millis(self.stale_request_limit_ms)
    }
}

/// Settings of the process-wide [`crate::TileRuntime`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Number of tile loads that may run at the same time
    pub max_concurrent_loads: usize,
    /// Number of texture tiles kept in the memory cache
    pub memory_cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 8,
            memory_cache_capacity: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> LevelSetConfig {
        LevelSetConfig {
            dataset_name: "section".to_string(),
            cache_name: "curtains/section".to_string(),
            service_url: Some("http://localhost/tiles".to_string()),
            num_levels: 3,
            full_width: 1000,
            full_height: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = LevelSetConfig::default();
        assert_eq!(config.tile_width, 512);
        assert_eq!(config.tile_height, 512);
        assert_eq!(config.format_suffix, ".dds");
        assert_eq!(config.max_absent_attempts, 2);
        assert_eq!(config.min_absent_check_interval(), Duration::from_secs(10));
        assert_eq!(config.detail_hint, 0.0);
        assert!(config.network_retrieval_enabled);
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_non_positive_dimensions_fail() {
        let config = LevelSetConfig {
            tile_width: 0,
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(CurtainError::Config(_))));

        let config = LevelSetConfig {
            full_height: 0,
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(CurtainError::Config(_))));
    }

    #[test]
    fn test_too_many_empty_levels_fail() {
        let config = LevelSetConfig {
            num_empty_levels: 3,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inactive_level_out_of_range_fails() {
        let config = LevelSetConfig {
            inactive_levels: vec![5],
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expiry_conversion() {
        let config = LevelSetConfig {
            expiry_time: Some(1_000),
            ..valid_config()
        };
        assert_eq!(config.expiry(), Some(UNIX_EPOCH + Duration::from_secs(1)));
    }

    #[test]
    fn test_layer_config_defaults_valid() {
        let config = LayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.geometry_update_frequency(), Duration::from_secs(2));
    }
}
