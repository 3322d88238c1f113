//! Geographic path followed by the curtain

use crate::utils::{EARTH_RADIUS_M, great_circle_angle, great_circle_interpolate};
use crate::view::{Extent, ViewProvider};
use crate::{CurtainError, CurtainShape, Result, Segment, SegmentGeometry, TileKey};
use geo::{Point, Rect};
use glam::DVec3;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-unique identity of a [`Path`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(u64);

impl PathId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Waypoints parameterized by cumulative great-circle length
///
/// Percents strictly increase from 0 to 1. The geometry cache is shared by every layer holding
/// the same `Arc<Path>`.
#[derive(Debug)]
pub struct Path {
    id: PathId,
    /// `(percent, location)`, sorted by percent
    entries: Vec<(f64, Point<f64>)>,
    /// Total length in radians
    length: f64,
    geometry_cache: Mutex<LruCache<TileKey, Arc<SegmentGeometry>>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Path {
    pub const DEFAULT_GEOMETRY_CACHE_CAPACITY: usize = 4096;

    /// Build a path from locations (x = longitude, y = latitude, degrees)
    ///
    /// Consecutive duplicate locations are dropped.
    pub fn new(waypoints: impl IntoIterator<Item = Point<f64>>) -> Result<Self> {
        Self::with_geometry_cache_capacity(waypoints, Self::DEFAULT_GEOMETRY_CACHE_CAPACITY)
    }

    pub fn with_geometry_cache_capacity(
        waypoints: impl IntoIterator<Item = Point<f64>>,
        capacity: usize,
    ) -> Result<Self> {
        let mut locations: Vec<Point<f64>> = Vec::new();
        let mut cumulative: Vec<f64> = Vec::new();
        let mut length = 0.0;

        for location in waypoints {
            if !location.x().is_finite() || !location.y().is_finite() {
                tracing::warn!("Skipping non-finite waypoint ({}, {})", location.y(), location.x());
                continue;
            }
            if let Some(&previous) = locations.last() {
                let angle = great_circle_angle(previous, location);
                if angle <= 0.0 {
                    continue;
                }
                length += angle;
            }
            locations.push(location);
            cumulative.push(length);
        }

        if locations.len() < 2 {
            return Err(CurtainError::InvalidGeometry(format!(
                "path needs at least two distinct waypoints, got {}",
                locations.len()
            )));
        }
        if length <= 0.0 {
            return Err(CurtainError::InvalidGeometry(
                "path has zero length".to_string(),
            ));
        }

        let last = locations.len() - 1;
        let entries = locations
            .into_iter()
            .zip(cumulative)
            .enumerate()
            .map(|(i, (location, distance))| {
                let percent = if i == last { 1.0 } else { distance / length };
                (percent, location)
            })
            .collect();

        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            id: PathId::next(),
            entries,
            length,
            geometry_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Concatenate the points of every track segment of a GPX file
    pub fn from_gpx(gpx: &gpx::Gpx) -> Result<Self> {
        let points: Vec<Point<f64>> = gpx
            .tracks
            .iter()
            .flat_map(|track| track.segments.iter())
            .flat_map(|segment| segment.points.iter())
            .map(|waypoint| waypoint.point())
            .collect();
        if points.is_empty() {
            return Err(CurtainError::EmptyPath);
        }
        Self::new(points)
    }

    #[inline]
    pub fn id(&self) -> PathId {
        self.id
    }

    /// Total length in radians
    #[inline]
    pub fn length(&self) -> f64 {
        self.length
    }

    #[inline]
    pub fn length_meters(&self) -> f64 {
        self.length * EARTH_RADIUS_M
    }

    /// Number of stored waypoints
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn waypoints(&self) -> impl Iterator<Item = (f64, Point<f64>)> + '_ {
        self.entries.iter().copied()
    }

    pub fn first_location(&self) -> Point<f64> {
        self.entries[0].1
    }

    pub fn last_location(&self) -> Point<f64> {
        self.entries[self.entries.len() - 1].1
    }

    /// Location at `percent` of the path length, clamped to `[0, 1]`
    pub fn location_at_percent(&self, percent: f64) -> Point<f64> {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 1.0)
        };

        let upper = self.entries.partition_point(|(p, _)| *p < percent);
        if upper >= self.entries.len() {
            return self.last_location();
        }
        let (upper_percent, upper_location) = self.entries[upper];
        if upper_percent == percent || upper == 0 {
            return upper_location;
        }

        let (lower_percent, lower_location) = self.entries[upper - 1];
        let t = (percent - lower_percent) / (upper_percent - lower_percent);
        great_circle_interpolate(lower_location, upper_location, t)
    }

    /// Sample locations between two percents
    ///
    /// Includes both ends and every stored waypoint in between. Each gap between consecutive
    /// samples is split into `subsegments` great-circle pieces.
    pub fn locations_in_segment(
        &self,
        start: f64,
        end: f64,
        subsegments: usize,
    ) -> Vec<(f64, Point<f64>)> {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        let subsegments = subsegments.max(1);

        let mut percents = vec![start];
        let first_inside = self.entries.partition_point(|(p, _)| *p <= start);
        percents.extend(
            self.entries[first_inside..]
                .iter()
                .map(|(p, _)| *p)
                .take_while(|p| *p < end),
        );
        if end > start {
            percents.push(end);
        }

        let mut samples = Vec::with_capacity((percents.len() - 1) * subsegments + 1);
        for pair in percents.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            for k in 0..subsegments {
                let percent = a + (b - a) * k as f64 / subsegments as f64;
                samples.push((percent, self.location_at_percent(percent)));
            }
        }
        let last = percents[percents.len() - 1];
        samples.push((last, self.location_at_percent(last)));
        samples
    }

    /// Cartesian center of a segment of the curtain
    pub fn segment_center_point(
        &self,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
    ) -> DVec3 {
        let location = self.location_at_percent(segment.horizontal_center());
        shape.point_at(location, segment.vertical_center(), view)
    }

    /// Cartesian sample points covering a segment: top, middle and bottom at every location
    pub fn points_in_segment(
        &self,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
    ) -> Vec<DVec3> {
        let locations = self.locations_in_segment(segment.start, segment.end, shape.subsegments);
        let depths = [segment.top, segment.vertical_center(), segment.bottom];
        let mut points = Vec::with_capacity(locations.len() * depths.len());
        for (_, location) in locations {
            for depth in depths {
                points.push(shape.point_at(location, depth, view));
            }
        }
        points
    }

    /// Bounding sphere of a segment of the curtain
    pub fn segment_extent(
        &self,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
    ) -> Extent {
        let points = self.points_in_segment(segment, shape, view);
        Extent::from_points(&points).unwrap_or(Extent {
            center: self.segment_center_point(segment, shape, view),
            radius: 0.0,
        })
    }

    /// Longitude/latitude bounds of the waypoints
    pub fn bounding_rect(&self) -> Rect<f64> {
        let mut min = self.entries[0].1.0;
        let mut max = min;
        for (_, location) in &self.entries[1..] {
            min.x = min.x.min(location.x());
            min.y = min.y.min(location.y());
            max.x = max.x.max(location.x());
            max.y = max.y.max(location.y());
        }
        Rect::new(min, max)
    }

    /// Cached geometry of a tile, rebuilt when too old or built for another exaggeration
    pub fn segment_geometry(
        &self,
        key: &TileKey,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
        update_frequency: Duration,
    ) -> Arc<SegmentGeometry> {
        self.segment_geometry_at(key, segment, shape, view, update_frequency, Instant::now())
    }

    pub fn segment_geometry_at(
        &self,
        key: &TileKey,
        segment: &Segment,
        shape: &CurtainShape,
        view: &dyn ViewProvider,
        update_frequency: Duration,
        now: Instant,
    ) -> Arc<SegmentGeometry> {
        let exaggeration = view.vertical_exaggeration();
        {
            let mut cache = self
                .geometry_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(geometry) = cache.get(key) {
                if !geometry.is_stale(now, update_frequency, exaggeration, shape) {
                    return geometry.clone();
                }
            }
        }

        let geometry = Arc::new(SegmentGeometry::build(self, segment, shape, view, now));
        self.geometry_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key.clone(), geometry.clone());
        geometry
    }

    pub fn geometry_cache_len(&self) -> usize {
        self.geometry_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_geometry_cache(&self) {
        self.geometry_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
