//! Curtain patch geometry and the rules for when it must be rebuilt

use crate::utils::geodetic_to_cartesian;
use crate::view::{Extent, ViewProvider};
use crate::{LayerConfig, Path, Segment};
use geo::Point;
use glam::DVec3;
use std::time::{Duration, Instant};

/// Vertical placement of a curtain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurtainShape {
    /// Elevation of the top edge in meters
    pub top: f64,
    /// Elevation of the bottom edge in meters
    pub bottom: f64,
    /// Measure `top`/`bottom` from the terrain surface instead of sea level
    pub follow_terrain: bool,
    /// Great-circle subdivisions between consecutive samples
    pub subsegments: usize,
}

impl CurtainShape {
    pub fn from_config(config: &LayerConfig) -> Self {
        Self {
            top: config.curtain_top,
            bottom: config.curtain_bottom,
            follow_terrain: config.follow_terrain,
            subsegments: config.subsegments.max(1),
        }
    }

    /// Exaggerated elevation of `depth_percent` (0 = top, 1 = bottom) over `terrain`
    ///
    /// With an exaggeration of zero the curtain keeps a height of at least one meter.
    pub fn elevation_at(&self, depth_percent: f64, terrain: f64, exaggeration: f64) -> f64 {
        let base = if self.follow_terrain { terrain } else { 0.0 };
        let top = (self.top + base) * exaggeration;
        let mut bottom = (self.bottom + base) * exaggeration;
        if exaggeration == 0.0 && top - bottom < 1.0 {
            bottom = top - 1.0;
        }
        top + (bottom - top) * depth_percent
    }

    /// Cartesian point of the curtain at a location and depth
    pub fn point_at(
        &self,
        location: Point<f64>,
        depth_percent: f64,
        view: &dyn ViewProvider,
    ) -> DVec3 {
        let terrain = if self.follow_terrain {
            view.elevation(location)
        } else {
            0.0
        };
        let elevation = self.elevation_at(depth_percent, terrain, view.vertical_exaggeration());
        geodetic_to_cartesian(location, elevation)
    }
}

impl Default for CurtainShape {
    fn default() -> Self {
        Self::from_config(&LayerConfig::default())
    }
}

/// Vertex and texture coordinate buffers of one tile's curtain patch
///
/// Vertices form a triangle strip alternating top and bottom edge, stored as `f32` offsets from
/// `reference_center` to keep precision at globe scale.
#[derive(Debug, Clone)]
pub struct SegmentGeometry {
    reference_center: DVec3,
    vertices: Vec<f32>,
    tex_coords: Vec<f32>,
    extent: Extent,
    shape: CurtainShape,
    exaggeration: f64,
    created: Instant,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SegmentGeometry {
    pub fn build(
        path: &Path,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
        created: Instant,
    ) -> Self {
        let samples = path.locations_in_segment(segment.start, segment.end, shape.subsegments);
        let horizontal = segment.horizontal_delta();

        let mut points = Vec::with_capacity(samples.len() * 2);
        let mut tex_coords = Vec::with_capacity(samples.len() * 4);
        for (percent, location) in &samples {
            let u = if horizontal > 0.0 {
                ((percent - segment.start) / horizontal) as f32
            } else {
                0.0
            };
            points.push(shape.point_at(*location, segment.top, view));
            tex_coords.extend_from_slice(&[u, 0.0]);
            points.push(shape.point_at(*location, segment.bottom, view));
            tex_coords.extend_from_slice(&[u, 1.0]);
        }

        let extent = Extent::from_points(&points).unwrap_or(Extent {
            center: DVec3::ZERO,
            radius: 0.0,
        });
        let reference_center = extent.center;
        let vertices = points
            .iter()
            .flat_map(|p| {
                let local = *p - reference_center;
                [local.x as f32, local.y as f32, local.z as f32]
            })
            .collect();

        Self {
            reference_center,
            vertices,
            tex_coords,
            extent,
            shape: *shape,
            exaggeration: view.vertical_exaggeration(),
            created,
        }
    }

    /// Whether the geometry must be rebuilt for the current frame
    pub fn is_stale(
        &self,
        now: Instant,
        update_frequency: Duration,
        exaggeration: f64,
        shape: &CurtainShape,
    ) -> bool {
        now.saturating_duration_since(self.created) > update_frequency
            || self.exaggeration != exaggeration
            || self.shape != *shape
    }

    #[inline]
    pub fn reference_center(&self) -> DVec3 {
        self.reference_center
    }

    /// Interleaved `x, y, z` relative to the reference center
    #[inline]
    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    /// Interleaved `u, v`
    #[inline]
    pub fn tex_coords(&self) -> &[f32] {
        &self.tex_coords
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    #[inline]
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    #[inline]
    pub fn exaggeration(&self) -> f64 {
        self.exaggeration
    }

    #[inline]
    pub fn created(&self) -> Instant {
        self.created
    }
}
