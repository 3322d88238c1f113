//! Resolution tiers of the tile pyramid
//!
//! A [`Level`] is immutable once built except for its [`AbsentResourceList`], which throttles
//! requests for tiles that keep failing.

use crate::{CurtainError, Result, Segment};
use dashmap::DashMap;
use std::time::{Duration, Instant, SystemTime};

/// Construction parameters of a single level
#[derive(Debug, Clone, PartialEq)]
pub struct LevelParams {
    pub level_number: usize,
    /// Directory name of the level inside the dataset cache ("" for empty levels)
    pub level_name: String,
    pub cache_name: String,
    pub level_width: u32,
    pub level_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub format_suffix: String,
    /// Angular size of one texel along the path, in radians
    pub texel_size: f64,
    pub empty: bool,
    pub active: bool,
    pub expiry_time: Option<SystemTime>,
    pub max_absent_attempts: u32,
    pub min_absent_check_interval: Duration,
}

impl LevelParams {
    /// Parameters with the library defaults for everything but the dimensions
    pub fn new(
        level_number: usize,
        level_width: u32,
        level_height: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Self {
        Self {
            level_number,
            level_name: level_number.to_string(),
            cache_name: String::new(),
            level_width,
            level_height,
            tile_width,
            tile_height,
            format_suffix: ".dds".to_string(),
            texel_size: 0.0,
            empty: false,
            active: true,
            expiry_time: None,
            max_absent_attempts: 2,
            min_absent_check_interval: Duration::from_secs(10),
        }
    }
}

/// One resolution tier: pixel size, tile size and the derived tile grid
#[derive(Debug)]
pub struct Level {
    level_number: usize,
    level_name: String,
    cache_name: String,
    /// `{cache_name}/{level_name}`
    path: String,
    level_width: u32,
    level_height: u32,
    tile_width: u32,
    tile_height: u32,
    column_count: u32,
    row_count: u32,
    format_suffix: String,
    texel_size: f64,
    empty: bool,
    active: bool,
    expiry_time: Option<SystemTime>,
    absent_resources: AbsentResourceList,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Level {
    pub fn new(params: LevelParams) -> Result<Self> {
        if params.level_width == 0 || params.level_height == 0 {
            return Err(CurtainError::Config(format!(
                "level {} size must be positive, got {}x{}",
                params.level_number, params.level_width, params.level_height
            )));
        }
        if params.tile_width == 0 || params.tile_height == 0 {
            return Err(CurtainError::Config(format!(
                "level {} tile size must be positive, got {}x{}",
                params.level_number, params.tile_width, params.tile_height
            )));
        }

        let column_count = params.level_width.div_ceil(params.tile_width);
        let row_count = params.level_height.div_ceil(params.tile_height);
        let path = format!("{}/{}", params.cache_name, params.level_name);

        Ok(Self {
            level_number: params.level_number,
            level_name: params.level_name,
            cache_name: params.cache_name,
            path,
            level_width: params.level_width,
            level_height: params.level_height,
            tile_width: params.tile_width,
            tile_height: params.tile_height,
            column_count,
            row_count,
            format_suffix: params.format_suffix,
            texel_size: params.texel_size,
            empty: params.empty,
            active: params.active,
            expiry_time: params.expiry_time,
            absent_resources: AbsentResourceList::new(
                params.max_absent_attempts,
                params.min_absent_check_interval,
            ),
        })
    }

    #[inline]
    pub fn level_number(&self) -> usize {
        self.level_number
    }

    #[inline]
    pub fn level_name(&self) -> &str {
        &self.level_name
    }

    #[inline]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Cache path of the level, `{cache_name}/{level_name}`
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn level_width(&self) -> u32 {
        self.level_width
    }

    #[inline]
    pub fn level_height(&self) -> u32 {
        self.level_height
    }

    #[inline]
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    #[inline]
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    #[inline]
    pub fn column_count(&self) -> u32 {
        self.column_count
    }

    #[inline]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    #[inline]
    pub fn format_suffix(&self) -> &str {
        &self.format_suffix
    }

    #[inline]
    pub fn texel_size(&self) -> f64 {
        self.texel_size
    }

    /// Empty levels have no data and are never requested
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn expiry_time(&self) -> Option<SystemTime> {
        self.expiry_time
    }

    #[inline]
    pub fn absent_resources(&self) -> &AbsentResourceList {
        &self.absent_resources
    }

    /// Linear tile number `row * column_count + column`, or -1 when out of range
    pub fn tile_number(&self, row: u32, column: u32) -> i64 {
        if row >= self.row_count || column >= self.column_count {
            return -1;
        }
        row as i64 * self.column_count as i64 + column as i64
    }

    /// Percent along the path where `column` starts
    #[inline]
    pub fn start_x(&self, column: u32) -> f64 {
        (column as f64 * self.tile_width as f64 / self.level_width as f64).clamp(0.0, 1.0)
    }

    /// Percent of depth where `row` starts
    #[inline]
    pub fn start_y(&self, row: u32) -> f64 {
        (row as f64 * self.tile_height as f64 / self.level_height as f64).clamp(0.0, 1.0)
    }

    pub fn compute_segment_for_row_column(&self, row: u32, column: u32) -> Segment {
        Segment::new(
            self.start_x(column),
            self.start_x(column + 1),
            self.start_y(row),
            self.start_y(row + 1),
        )
    }
}

/// Retry-limiting tracker for tiles that failed to load
///
/// A tile is absent once it has been marked `max_tries` times and the last mark is younger
/// than `min_check_interval`. After that interval it may be tried again, although its attempt
/// count is kept until it is unmarked.
#[derive(Debug)]
pub struct AbsentResourceList {
    max_tries: u32,
    min_check_interval: Duration,
    entries: DashMap<i64, AbsentEntry>,
}

#[derive(Debug, Clone, Copy)]
struct AbsentEntry {
    attempts: u32,
    last_attempt: Instant,
}

impl AbsentResourceList {
    pub fn new(max_tries: u32, min_check_interval: Duration) -> Self {
        Self {
            max_tries,
            min_check_interval,
            entries: DashMap::new(),
        }
    }

    pub fn mark_resource_absent(&self, tile_number: i64) {
        self.mark_resource_absent_at(tile_number, Instant::now());
    }

    pub fn mark_resource_absent_at(&self, tile_number: i64, now: Instant) {
        if tile_number < 0 {
            return;
        }
        self.entries
            .entry(tile_number)
            .and_modify(|entry| {
                entry.attempts = entry.attempts.saturating_add(1);
                entry.last_attempt = now;
            })
            .or_insert(AbsentEntry {
                attempts: 1,
                last_attempt: now,
            });
    }

    pub fn is_resource_absent(&self, tile_number: i64) -> bool {
        self.is_resource_absent_at(tile_number, Instant::now())
    }

    pub fn is_resource_absent_at(&self, tile_number: i64, now: Instant) -> bool {
        if tile_number < 0 {
            return false;
        }
        match self.entries.get(&tile_number) {
            Some(entry) => {
                entry.attempts >= self.max_tries
                    && now.saturating_duration_since(entry.last_attempt) < self.min_check_interval
            }
            None => false,
        }
    }

    pub fn unmark_resource_absent(&self, tile_number: i64) {
        if tile_number < 0 {
            return;
        }
        self.entries.remove(&tile_number);
    }

    /// Number of failed attempts recorded for a tile
    pub fn attempts(&self, tile_number: i64) -> u32 {
        self.entries
            .get(&tile_number)
            .map(|entry| entry.attempts)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_level(width: u32, height: u32, tile: u32) -> Level {
        Level::new(LevelParams::new(0, width, height, tile, tile)).unwrap()
    }

    #[test]
    fn test_column_and_row_counts() {
        let level = create_level(1000, 600, 256);
        assert_eq!(level.column_count(), 4);
        assert_eq!(level.row_count(), 3);
    }

    #[test]
    fn test_first_segment_starts_at_zero() {
        let level = create_level(1000, 1000, 256);
        let segment = level.compute_segment_for_row_column(0, 0);
        assert_eq!(segment.start, 0.0);
        assert_eq!(segment.top, 0.0);
        assert!((segment.end - 0.256).abs() < 1e-12);
    }

    #[test]
    fn test_segments_tile_unit_square() {
        let level = create_level(1000, 700, 256);
        let mut area = 0.0;

        for row in 0..level.row_count() {
            for column in 0..level.column_count() {
                let segment = level.compute_segment_for_row_column(row, column);
                area += segment.horizontal_delta() * segment.vertical_delta();

                // Neighbours share their edges exactly
                if column + 1 < level.column_count() {
                    let right = level.compute_segment_for_row_column(row, column + 1);
                    assert_eq!(segment.end, right.start);
                }
                if row + 1 < level.row_count() {
                    let below = level.compute_segment_for_row_column(row + 1, column);
                    assert_eq!(segment.bottom, below.top);
                }
            }
        }

        // Last column and row are clamped to the boundary
        let last =
            level.compute_segment_for_row_column(level.row_count() - 1, level.column_count() - 1);
        assert_eq!(last.end, 1.0);
        assert_eq!(last.bottom, 1.0);
        assert!((area - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tile_number() {
        let level = create_level(1000, 1000, 256);
        assert_eq!(level.tile_number(0, 0), 0);
        assert_eq!(level.tile_number(1, 2), 6);
        assert_eq!(level.tile_number(4, 0), -1);
        assert_eq!(level.tile_number(0, 4), -1);
    }

    #[test]
    fn test_invalid_level_size_fails() {
        assert!(Level::new(LevelParams::new(0, 0, 100, 256, 256)).is_err());
        assert!(Level::new(LevelParams::new(0, 100, 100, 0, 256)).is_err());
    }

    #[test]
    fn test_level_path() {
        let mut params = LevelParams::new(0, 100, 100, 512, 512);
        params.cache_name = "cache".to_string();
        params.level_name = String::new();
        let level = Level::new(params).unwrap();
        assert_eq!(level.path(), "cache/");
    }

    #[test]
    fn test_absent_after_max_attempts() {
        let list = AbsentResourceList::new(2, Duration::from_millis(10_000));
        let now = Instant::now();

        list.mark_resource_absent_at(7, now);
        assert!(!list.is_resource_absent_at(7, now));

        list.mark_resource_absent_at(7, now);
        assert!(list.is_resource_absent_at(7, now));
        assert!(list.is_resource_absent_at(7, now + Duration::from_millis(9_999)));
    }

    #[test]
    fn test_absent_eligible_after_interval() {
        let list = AbsentResourceList::new(2, Duration::from_millis(10_000));
        let now = Instant::now();
        list.mark_resource_absent_at(3, now);
        list.mark_resource_absent_at(3, now);

        let later = now + Duration::from_millis(10_001);
        assert!(!list.is_resource_absent_at(3, later));
        assert_eq!(list.attempts(3), 2);
    }

    #[test]
    fn test_unmark_clears_attempts() {
        let list = AbsentResourceList::new(2, Duration::from_secs(10));
        list.mark_resource_absent(1);
        list.mark_resource_absent(1);
        assert!(list.is_resource_absent(1));

        list.unmark_resource_absent(1);
        assert!(!list.is_resource_absent(1));
        assert_eq!(list.attempts(1), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_negative_tile_number_ignored() {
        let list = AbsentResourceList::new(1, Duration::from_secs(10));
        list.mark_resource_absent(-1);
        assert!(!list.is_resource_absent(-1));
        assert_eq!(list.len(), 0);
    }
}
