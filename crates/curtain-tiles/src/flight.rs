//! Camera flight along the curtain path and run statistics

use crate::backend::BackendStats;
use crate::settings::Settings;
use curtain_tiles_lib::view::{CameraView, Viewport};
use curtain_tiles_lib::{FrameStats, LayerConfig, Path};
use serde::Serialize;

/// Camera moving at constant altitude from the start to the end of the path
#[derive(Debug, Clone)]
pub struct Flight {
    frames: usize,
    altitude: f64,
    look_ahead: f64,
    target_elevation: f64,
    exaggeration: f64,
    viewport: Viewport,
}

impl Flight {
    pub fn from_settings(settings: &Settings, layer: &LayerConfig) -> Self {
        Self {
            frames: settings.frames,
            altitude: settings.altitude,
            look_ahead: settings.look_ahead.clamp(0.0, 1.0),
            // Aim at the middle of the curtain
            target_elevation: (layer.curtain_top + layer.curtain_bottom)
                * 0.5
                * settings.exaggeration,
            exaggeration: settings.exaggeration,
            viewport: Viewport::new(settings.viewport_width, settings.viewport_height),
        }
    }

    /// Fraction of the path under the camera at `frame`
    pub fn progress(&self, frame: usize) -> f64 {
        if self.frames <= 1 {
            return 0.0;
        }
        (frame as f64 / (self.frames - 1) as f64).clamp(0.0, 1.0)
    }

    pub fn camera_for_frame(&self, path: &Path, frame: usize) -> CameraView {
        let progress = self.progress(frame);
        let eye = path.location_at_percent(progress);
        // Look back along the path once the end is near
        let target_percent = if progress + self.look_ahead <= 1.0 {
            progress + self.look_ahead
        } else {
            (progress - self.look_ahead).max(0.0)
        };
        let target = path.location_at_percent(target_percent);

        CameraView::from_geodetic(eye, self.altitude, target, self.target_elevation, self.viewport)
            .with_vertical_exaggeration(self.exaggeration)
    }
}

/// Totals over a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: usize,
    pub tiles_drawn: usize,
    pub fallback_draws: usize,
    pub tiles_missing: usize,
    pub requests_queued: usize,
    pub loads_started: usize,
    pub forced_loads: usize,
    pub uploads: usize,
    pub uploaded_bytes: usize,
    pub evictions: usize,
    pub backend_draws: usize,
    pub vertices: usize,
    pub max_depth: usize,
    pub resident_textures: usize,
    pub resident_bytes: usize,
    pub cached_tiles: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn record(&mut self, frame: &FrameStats, backend: &BackendStats) {
        self.frames += 1;
        self.tiles_drawn += frame.tiles_drawn;
        self.fallback_draws += frame.fallback_draws;
        self.tiles_missing += frame.tiles_missing;
        self.requests_queued += frame.requests_queued;
        self.loads_started += frame.loads_started;
        self.forced_loads += frame.forced_loads;
        self.uploads += frame.uploads;
        self.uploaded_bytes += backend.uploaded_bytes;
        self.evictions += backend.evictions;
        self.backend_draws += backend.draws;
        self.vertices += backend.vertices;
        self.max_depth = self.max_depth.max(frame.max_depth);
    }

    /// Share of draws that used an ancestor's texture
    pub fn fallback_ratio(&self) -> f64 {
        if self.tiles_drawn == 0 {
            0.0
        } else {
            self.fallback_draws as f64 / self.tiles_drawn as f64
        }
    }
}
