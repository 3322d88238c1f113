//! View state consumed by the layer: eye, frustum, viewport, exaggeration and terrain

use crate::utils::geodetic_to_cartesian;
use geo::Point;
use glam::{DMat4, DVec3, DVec4};
use std::fmt;
use std::sync::Arc;

/// Everything the tile assembly needs to know about the current view
pub trait ViewProvider {
    /// Eye position in Earth-centered Cartesian coordinates (meters)
    fn eye_point(&self) -> DVec3;

    fn frustum(&self) -> &Frustum;

    fn viewport(&self) -> Viewport;

    fn vertical_exaggeration(&self) -> f64;

    /// Terrain elevation at a location in meters, before exaggeration
    fn elevation(&self, location: Point<f64>) -> f64;
}

/// Terrain elevation lookup
pub trait ElevationModel: Send + Sync {
    fn elevation(&self, location: Point<f64>) -> f64;
}

impl<F> ElevationModel for F
where
    F: Fn(Point<f64>) -> f64 + Send + Sync,
{
    fn elevation(&self, location: Point<f64>) -> f64 {
        self(location)
    }
}

/// Sea-level globe
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatElevation;

impl ElevationModel for FlatElevation {
    fn elevation(&self, _location: Point<f64>) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

/// Bounding sphere of a curtain patch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub center: DVec3,
    pub radius: f64,
}

impl Extent {
    /// Sphere centered on the points' centroid enclosing all of them
    pub fn from_points(points: &[DVec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let center = points.iter().copied().sum::<DVec3>() / points.len() as f64;
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0_f64, f64::max);
        Some(Self { center, radius })
    }

    pub fn distance_to(&self, point: DVec3) -> f64 {
        (self.center.distance(point) - self.radius).max(0.0)
    }
}

/// View frustum as inward-facing planes `(normal, d)` with `dot(normal, p) + d >= 0` inside
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    planes: Vec<DVec4>,
}

impl Frustum {
    /// Extract the planes of a view-projection matrix with a `[0, 1]` depth range
    pub fn from_view_projection(view_projection: DMat4) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2]
            .into_iter()
            .filter_map(|plane| {
                let length = plane.truncate().length();
                (length > f64::EPSILON).then(|| plane / length)
            })
            .collect();
        Self { planes }
    }

    /// A frustum containing everything
    pub fn unbounded() -> Self {
        Self { planes: Vec::new() }
    }

    pub fn intersects(&self, extent: &Extent) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(extent.center) + plane.w >= -extent.radius)
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

/// Perspective camera over the spherical globe
#[derive(Clone)]
pub struct CameraView {
    eye: DVec3,
    view_projection: DMat4,
    frustum: Frustum,
    viewport: Viewport,
    vertical_exaggeration: f64,
    elevation_model: Arc<dyn ElevationModel>,
}

impl fmt::Debug for CameraView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraView")
            .field("eye", &self.eye)
            .field("viewport", &self.viewport)
            .field("vertical_exaggeration", &self.vertical_exaggeration)
            .finish_non_exhaustive()
    }
}

impl CameraView {
    const NEAR_PLANE: f64 = 1.0;
    const FAR_PLANE: f64 = 4.0e7;

    /// Camera at `eye` looking at `target`, both in Cartesian coordinates
    pub fn looking_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y_radians: f64,
        viewport: Viewport,
    ) -> Self {
        let view = DMat4::look_at_rh(eye, target, up);
        let projection = DMat4::perspective_rh(
            fov_y_radians,
            viewport.aspect_ratio(),
            Self::NEAR_PLANE,
            Self::FAR_PLANE,
        );
        let view_projection = projection * view;
        Self {
            eye,
            view_projection,
            frustum: Frustum::from_view_projection(view_projection),
            viewport,
            vertical_exaggeration: 1.0,
            elevation_model: Arc::new(FlatElevation),
        }
    }

    /// Camera above `eye_location` looking at a point of the globe
    pub fn from_geodetic(
        eye_location: Point<f64>,
        eye_elevation: f64,
        target_location: Point<f64>,
        target_elevation: f64,
        viewport: Viewport,
    ) -> Self {
        let eye = geodetic_to_cartesian(eye_location, eye_elevation);
        let target = geodetic_to_cartesian(target_location, target_elevation);
        // Local vertical is up unless it is parallel to the view direction
        let mut up = eye.normalize_or_zero();
        if (target - eye).normalize_or_zero().cross(up).length_squared() < 1e-12 {
            up = DVec3::Z.cross(up).normalize_or(DVec3::X);
        }
        Self::looking_at(eye, target, up, 45f64.to_radians(), viewport)
    }

    pub fn with_vertical_exaggeration(mut self, exaggeration: f64) -> Self {
        self.vertical_exaggeration = exaggeration;
        self
    }

    pub fn with_elevation_model(mut self, model: Arc<dyn ElevationModel>) -> Self {
        self.elevation_model = model;
        self
    }

    /// Disable frustum culling
    pub fn with_unbounded_frustum(mut self) -> Self {
        self.frustum = Frustum::unbounded();
        self
    }

    pub fn view_projection(&self) -> DMat4 {
        self.view_projection
    }
}

impl ViewProvider for CameraView {
    fn eye_point(&self) -> DVec3 {
        self.eye
    }

    fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn vertical_exaggeration(&self) -> f64 {
        self.vertical_exaggeration
    }

    fn elevation(&self, location: Point<f64>) -> f64 {
        self.elevation_model.elevation(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_encloses_points() {
        let points = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(1.0, 3.0, 0.0),
        ];
        let extent = Extent::from_points(&points).unwrap();
        for p in points {
            assert!(p.distance(extent.center) <= extent.radius + 1e-9);
        }
        assert!(Extent::from_points(&[]).is_none());
    }

    #[test]
    fn test_frustum_culls_behind_camera() {
        let view = CameraView::looking_at(
            DVec3::ZERO,
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::Y,
            60f64.to_radians(),
            Viewport::new(800, 600),
        );
        let frustum = view.frustum();

        let ahead = Extent {
            center: DVec3::new(0.0, 0.0, -100.0),
            radius: 1.0,
        };
        let behind = Extent {
            center: DVec3::new(0.0, 0.0, 100.0),
            radius: 1.0,
        };
        let far_left = Extent {
            center: DVec3::new(-1000.0, 0.0, -10.0),
            radius: 1.0,
        };
        assert!(frustum.intersects(&ahead));
        assert!(!frustum.intersects(&behind));
        assert!(!frustum.intersects(&far_left));
        assert!(frustum.contains_point(DVec3::new(0.0, 0.0, -50.0)));
    }

    #[test]
    fn test_sphere_straddling_plane_intersects() {
        let view = CameraView::looking_at(
            DVec3::ZERO,
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::Y,
            60f64.to_radians(),
            Viewport::new(800, 600),
        );
        let straddling = Extent {
            center: DVec3::new(0.0, 0.0, 5.0),
            radius: 10.0,
        };
        assert!(view.frustum().intersects(&straddling));
    }

    #[test]
    fn test_unbounded_frustum() {
        let frustum = Frustum::unbounded();
        assert!(frustum.intersects(&Extent {
            center: DVec3::splat(1e9),
            radius: 0.0,
        }));
    }

    #[test]
    fn test_geodetic_camera_sees_target() {
        let target = Point::new(133.0, -24.0);
        let view = CameraView::from_geodetic(
            Point::new(133.0, -24.5),
            20_000.0,
            target,
            0.0,
            Viewport::new(1024, 768),
        );
        let point = geodetic_to_cartesian(target, 0.0);
        assert!(view.frustum().contains_point(point));
        assert_eq!(view.elevation(target), 0.0);
    }

    #[test]
    fn test_closure_elevation_model() {
        let view = CameraView::from_geodetic(
            Point::new(0.0, 0.0),
            1000.0,
            Point::new(0.1, 0.0),
            0.0,
            Viewport::new(100, 100),
        )
        .with_elevation_model(Arc::new(|location: Point<f64>| location.x() * 100.0));
        assert!((view.elevation(Point::new(2.0, 0.0)) - 200.0).abs() < 1e-12);
    }
}
