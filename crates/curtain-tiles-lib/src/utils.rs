//! Utility functions for great-circle math and coordinate conversions

use geo::Point;
use glam::DVec3;

/// Mean Earth radius in meters (spherical globe model)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Angles below this are treated as coincident points
const ANGLE_EPSILON: f64 = 1e-12;

/// Great-circle angle between two locations in radians (haversine formula)
///
/// Locations are `geo::Point`s with x = longitude and y = latitude, in degrees.
#[inline]
pub fn great_circle_angle(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let delta_lat = (b.y() - a.y()).to_radians();
    let delta_lon = (b.x() - a.x()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt())
}

/// Great-circle distance between two locations in meters
#[inline]
pub fn great_circle_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    great_circle_angle(a, b) * EARTH_RADIUS_M
}

/// Interpolate along the great circle from `a` to `b`
///
/// `t` is the fraction of the arc, 0 returns `a` and 1 returns `b`.
pub fn great_circle_interpolate(a: Point<f64>, b: Point<f64>, t: f64) -> Point<f64> {
    if t <= 0.0 {
        return a;
    }
    if t >= 1.0 {
        return b;
    }

    let angle = great_circle_angle(a, b);
    if angle < ANGLE_EPSILON {
        return a;
    }

    // Spherical linear interpolation of the unit vectors
    let va = unit_vector(a);
    let vb = unit_vector(b);
    let sin_angle = angle.sin();
    let wa = ((1.0 - t) * angle).sin() / sin_angle;
    let wb = (t * angle).sin() / sin_angle;
    let v = va * wa + vb * wb;

    let lat = v.z.clamp(-1.0, 1.0).asin().to_degrees();
    let lon = v.y.atan2(v.x).to_degrees();
    Point::new(lon, lat)
}

/// Convert a location and an elevation in meters to a Cartesian point on the spherical globe
///
/// The frame is Earth-centered: +Z through the north pole, +X through (0°, 0°).
#[inline]
pub fn geodetic_to_cartesian(location: Point<f64>, elevation: f64) -> DVec3 {
    unit_vector(location) * (EARTH_RADIUS_M + elevation)
}

/// Convert a Cartesian point back to (location, elevation in meters)
pub fn cartesian_to_geodetic(point: DVec3) -> (Point<f64>, f64) {
    let radius = point.length();
    if radius < ANGLE_EPSILON {
        return (Point::new(0.0, 0.0), -EARTH_RADIUS_M);
    }
    let lat = (point.z / radius).clamp(-1.0, 1.0).asin().to_degrees();
    let lon = point.y.atan2(point.x).to_degrees();
    (Point::new(lon, lat), radius - EARTH_RADIUS_M)
}

#[inline]
fn unit_vector(location: Point<f64>) -> DVec3 {
    let lat = location.y().to_radians();
    let lon = location.x().to_radians();
    DVec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}
