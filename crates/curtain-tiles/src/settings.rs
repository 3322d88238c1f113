use crate::error::{AppError, AppResult};
use clap::Parser;
use curtain_tiles_lib::{LayerConfig, LevelSetConfig, Path, RuntimeConfig};
use geo::Point;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Curtain Tiles - Fly a headless camera along a path while streaming curtain imagery
pub struct Settings {
    /// Dataset description (JSON level set configuration)
    #[clap(short, long, value_name = "FILE")]
    pub dataset: PathBuf,

    /// Layer configuration (JSON), defaults are used when omitted
    #[clap(long, value_name = "FILE")]
    pub layer: Option<PathBuf>,

    /// GPX file whose track points define the curtain path
    #[clap(short, long, value_name = "FILE")]
    pub gpx: Option<PathBuf>,

    /// Path waypoint as "lon,lat", repeat for each point (used without --gpx)
    #[clap(
        short,
        long = "waypoint",
        value_name = "LON,LAT",
        value_parser = parse_waypoint,
        allow_hyphen_values = true
    )]
    pub waypoints: Vec<Point<f64>>,

    /// Root directory of the disk tile cache
    #[clap(long, value_name = "DIR", default_value = "tile-cache")]
    pub cache_root: PathBuf,

    /// Number of frames to render
    #[clap(short, long, default_value = "120")]
    pub frames: usize,

    /// Camera altitude above the path in meters
    #[clap(long, default_value = "20000")]
    pub altitude: f64,

    /// Horizontal distance between the camera and the looked-at path point, as a path fraction
    #[clap(long, default_value = "0.02")]
    pub look_ahead: f64,

    /// Vertical exaggeration applied to the curtain
    #[clap(long, default_value = "1.0")]
    pub exaggeration: f64,

    /// Viewport width in pixels
    #[clap(long, default_value = "1920")]
    pub viewport_width: u32,

    /// Viewport height in pixels
    #[clap(long, default_value = "1080")]
    pub viewport_height: u32,

    /// Delay between frames in milliseconds
    #[clap(long, default_value = "50")]
    pub frame_interval_ms: u64,

    /// Only use the disk cache, never fetch tiles
    #[clap(long, default_value = "false")]
    pub offline: bool,

    /// Tile loads running at the same time
    #[clap(long, default_value = "8")]
    pub max_concurrent_loads: usize,

    /// Texture tiles kept in memory
    #[clap(long, default_value = "2000")]
    pub memory_cache_capacity: usize,

    /// Memory budget of the headless texture store in MiB
    #[clap(long, default_value = "512")]
    pub texture_budget_mb: usize,

    /// HTTP request timeout in seconds
    #[clap(long, default_value = "20")]
    pub http_timeout_secs: u64,

    /// Seconds a host is skipped after a connection failure
    #[clap(long, default_value = "30")]
    pub host_backoff_secs: u64,

    /// Write a JSON summary of the run to this file
    #[clap(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_concurrent_loads: self.max_concurrent_loads,
            memory_cache_capacity: self.memory_cache_capacity,
        }
    }

    /// Dataset configuration with command line overrides applied
    pub fn level_set_config(&self) -> AppResult<LevelSetConfig> {
        let mut config: LevelSetConfig = read_json(&self.dataset)?;
        if self.offline {
            config.network_retrieval_enabled = false;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn layer_config(&self) -> AppResult<LayerConfig> {
        let config = match &self.layer {
            Some(path) => read_json(path)?,
            None => LayerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_path(&self) -> AppResult<Path> {
        if let Some(gpx_path) = &self.gpx {
            let file = std::fs::File::open(gpx_path).map_err(|source| AppError::Read {
                path: gpx_path.clone(),
                source,
            })?;
            let gpx = gpx::read(std::io::BufReader::new(file)).map_err(|e| AppError::Gpx {
                path: gpx_path.clone(),
                message: e.to_string(),
            })?;
            return Ok(Path::from_gpx(&gpx)?);
        }

        if self.waypoints.len() < 2 {
            return Err(AppError::NoPath);
        }
        Ok(Path::new(self.waypoints.iter().copied())?)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn texture_budget_bytes(&self) -> usize {
        self.texture_budget_mb.saturating_mul(1024 * 1024)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn host_backoff(&self) -> Duration {
        Duration::from_secs(self.host_backoff_secs)
    }
}

fn read_json<T: DeserializeOwned>(path: &std::path::Path) -> AppResult<T> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| AppError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse "lon,lat" in degrees
fn parse_waypoint(value: &str) -> Result<Point<f64>, String> {
    let (lon, lat) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LON,LAT, got {value:?}"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("coordinates out of range: {lon},{lat}"));
    }
    Ok(Point::new(lon, lat))
}
