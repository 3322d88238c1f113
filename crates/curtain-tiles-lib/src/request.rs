//! Per-frame priority queue of tile load requests

use crate::{TextureTile, TileKey};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pending load of one tile
#[derive(Debug, Clone)]
pub struct RequestTask {
    pub tile: Arc<TextureTile>,
    /// Distance from the tile centroid to the eye in meters
    pub distance: f64,
    pub created: Instant,
    sequence: u64,
}

impl RequestTask {
    pub fn key(&self) -> &TileKey {
        self.tile.key()
    }

    pub fn is_stale(&self, now: Instant, limit: Duration) -> bool {
        now.saturating_duration_since(self.created) > limit
    }
}

// Farther tasks compare greater, ties broken by insertion order
impl Ord for RequestTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for RequestTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RequestTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RequestTask {}

/// Bounded queue of load requests, nearest first
///
/// When full, a new request displaces the farthest queued one if it is nearer and is dropped
/// otherwise.
#[derive(Debug)]
pub struct RequestQueue {
    /// Max-heap: the farthest task is on top
    tasks: BinaryHeap<RequestTask>,
    queued: HashSet<TileKey>,
    capacity: usize,
    stale_limit: Duration,
    next_sequence: u64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl RequestQueue {
    pub fn new(capacity: usize, stale_limit: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            tasks: BinaryHeap::with_capacity(capacity),
            queued: HashSet::with_capacity(capacity),
            capacity,
            stale_limit,
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, tile: Arc<TextureTile>, distance: f64) -> bool {
        self.push_at(tile, distance, Instant::now())
    }

    /// Queue a load, returns false when the request was not accepted
    pub fn push_at(&mut self, tile: Arc<TextureTile>, distance: f64, now: Instant) -> bool {
        if self.queued.contains(tile.key()) {
            return false;
        }

        let task = RequestTask {
            tile,
            distance,
            created: now,
            sequence: self.next_sequence,
        };

        if self.tasks.len() >= self.capacity {
            match self.tasks.peek() {
                Some(farthest) if task < *farthest => {
                    if let Some(evicted) = self.tasks.pop() {
                        tracing::trace!(tile = %evicted.key(), "Displaced queued request");
                        self.queued.remove(evicted.key());
                    }
                }
                _ => return false,
            }
        }

        self.next_sequence += 1;
        self.queued.insert(task.key().clone());
        self.tasks.push(task);
        true
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.queued.contains(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empty the queue, returning fresh tasks nearest first
    pub fn drain_sorted(&mut self, now: Instant) -> Vec<RequestTask> {
        self.queued.clear();
        let limit = self.stale_limit;
        std::mem::take(&mut self.tasks)
            .into_sorted_vec()
            .into_iter()
            .filter(|task| !task.is_stale(now, limit))
            .collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.queued.clear();
    }
}
