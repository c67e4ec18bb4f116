// Bounded Bucket Ring
// Strict FIFO retention for one key and resolution

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{PlentraError, PlentraResult};
use crate::types::{Bucket, Resolution, TimeRange};

/// Fixed-capacity ring of buckets ordered by interval start.
///
/// Append-only from the newest side; inserting into a full ring evicts the
/// oldest bucket in O(1). Ordering and alignment are checked on every push;
/// a violation is the fatal store condition, not something to repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRing {
    resolution: Resolution,
    capacity: usize,
    buckets: VecDeque<Bucket>,
}

impl BucketRing {
    pub fn new(resolution: Resolution, capacity: usize) -> Self {
        Self {
            resolution,
            capacity: capacity.max(1),
            buckets: VecDeque::new(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn newest(&self) -> Option<&Bucket> {
        self.buckets.back()
    }

    pub fn oldest(&self) -> Option<&Bucket> {
        self.buckets.front()
    }

    /// Append a newer bucket, evicting the oldest when full.
    ///
    /// Returns the evicted bucket, if any. Fails when the bucket is
    /// misaligned or not strictly newer than the current newest.
    pub fn push(&mut self, bucket: Bucket) -> PlentraResult<Option<Bucket>> {
        if bucket.resolution != self.resolution {
            return Err(PlentraError::store_invariant(
                bucket.key.to_string(),
                format!(
                    "resolution mismatch: ring {} got {}",
                    self.resolution, bucket.resolution
                ),
            ));
        }
        if bucket.start != self.resolution.align(bucket.start) {
            return Err(PlentraError::store_invariant(
                bucket.key.to_string(),
                format!("misaligned bucket start {}", bucket.start),
            ));
        }
        if let Some(newest) = self.buckets.back() {
            if bucket.start <= newest.start {
                return Err(PlentraError::store_invariant(
                    bucket.key.to_string(),
                    format!(
                        "out-of-order bucket: start {} not after newest {}",
                        bucket.start, newest.start
                    ),
                ));
            }
        }

        self.buckets.push_back(bucket);
        if self.buckets.len() > self.capacity {
            return Ok(self.buckets.pop_front());
        }
        Ok(None)
    }

    /// Insert a bucket for an interval older than the newest, at its sorted
    /// position. Serves late arrivals whose interval never opened; the
    /// interval must be vacant. Returns false when the interval is older than
    /// everything a full ring retains.
    pub fn insert_backfill(&mut self, bucket: Bucket) -> PlentraResult<bool> {
        if bucket.resolution != self.resolution
            || bucket.start != self.resolution.align(bucket.start)
        {
            return Err(PlentraError::store_invariant(
                bucket.key.to_string(),
                format!("invalid backfill bucket at {}", bucket.start),
            ));
        }
        if self.buckets.len() >= self.capacity
            && self.buckets.front().map_or(false, |b| bucket.start < b.start)
        {
            return Ok(false);
        }
        let position = self.buckets.partition_point(|b| b.start < bucket.start);
        if self
            .buckets
            .get(position)
            .map_or(false, |b| b.start == bucket.start)
        {
            return Err(PlentraError::store_invariant(
                bucket.key.to_string(),
                format!("backfill into occupied interval {}", bucket.start),
            ));
        }
        self.buckets.insert(position, bucket);
        if self.buckets.len() > self.capacity {
            self.buckets.pop_front();
        }
        Ok(true)
    }

    /// Mutable access to the open bucket covering `timestamp`, searching from
    /// the newest side since late arrivals cluster near the head.
    pub fn open_bucket_covering(&mut self, timestamp: i64) -> Option<&mut Bucket> {
        let start = self.resolution.align(timestamp);
        self.buckets
            .iter_mut()
            .rev()
            .take_while(|b| b.start >= start)
            .find(|b| b.start == start)
            .filter(|b| !b.frozen)
    }

    /// True when a bucket for `timestamp`'s interval exists but is frozen.
    pub fn interval_is_frozen(&self, timestamp: i64) -> bool {
        let start = self.resolution.align(timestamp);
        self.buckets
            .iter()
            .rev()
            .take_while(|b| b.start >= start)
            .any(|b| b.start == start && b.frozen)
    }

    /// Freeze every open bucket whose interval elapsed before `cutoff_ms`.
    /// Returns clones of the newly frozen buckets.
    pub fn freeze_elapsed(&mut self, cutoff_ms: i64) -> Vec<Bucket> {
        let mut frozen = Vec::new();
        for bucket in self.buckets.iter_mut() {
            if !bucket.frozen && bucket.end <= cutoff_ms {
                bucket.frozen = true;
                frozen.push(bucket.clone());
            }
        }
        frozen
    }

    /// Ordered buckets intersecting the half-open range.
    pub fn query(&self, range: TimeRange) -> Vec<Bucket> {
        self.buckets
            .iter()
            .filter(|b| range.intersects(b.start, b.end))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Rebuild a ring from persisted buckets, re-checking the ordering
    /// invariant. Used on restart.
    pub fn restore(
        resolution: Resolution,
        capacity: usize,
        buckets: Vec<Bucket>,
    ) -> PlentraResult<Self> {
        let mut ring = Self::new(resolution, capacity);
        for bucket in buckets {
            ring.push(bucket)?;
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedId, MetricKey, Tick};

    fn bucket(start_minutes: i64, value: f64) -> Bucket {
        let key: MetricKey = "PL/CEN/spot-price".parse().unwrap();
        let tick = Tick {
            key: key.clone(),
            timestamp: start_minutes * 60_000,
            value,
            volume: Some(1.0),
            source: FeedId::new("test"),
        };
        Bucket::open_with(key, Resolution::Minute1, &tick)
    }

    #[test]
    fn test_fifo_eviction_keeps_contiguous_tail() {
        let mut ring = BucketRing::new(Resolution::Minute1, 3);
        for minute in 0..3 {
            assert!(ring.push(bucket(minute, 50.0)).unwrap().is_none());
        }
        assert_eq!(ring.len(), 3);

        // Fourth insert evicts exactly the oldest
        let evicted = ring.push(bucket(3, 50.0)).unwrap().unwrap();
        assert_eq!(evicted.start, 0);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest().unwrap().start, 60_000);
        assert_eq!(ring.newest().unwrap().start, 180_000);

        // Remaining buckets are strictly ordered and contiguous
        let starts: Vec<i64> = ring.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![60_000, 120_000, 180_000]);
    }

    #[test]
    fn test_push_rejects_out_of_order() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        ring.push(bucket(5, 50.0)).unwrap();
        let error = ring.push(bucket(5, 51.0)).unwrap_err();
        assert!(error.is_fatal());
        let error = ring.push(bucket(2, 51.0)).unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn test_push_rejects_misaligned_start() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        let mut misaligned = bucket(1, 50.0);
        misaligned.start += 500;
        assert!(ring.push(misaligned).unwrap_err().is_fatal());
    }

    #[test]
    fn test_freeze_elapsed() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        for minute in 0..3 {
            ring.push(bucket(minute, 50.0)).unwrap();
        }
        // Cutoff after the first two intervals
        let frozen = ring.freeze_elapsed(120_000);
        assert_eq!(frozen.len(), 2);
        assert!(frozen.iter().all(|b| b.frozen));
        // Second call is idempotent
        assert!(ring.freeze_elapsed(120_000).is_empty());
        assert!(!ring.newest().unwrap().frozen);
    }

    #[test]
    fn test_open_bucket_covering_skips_frozen() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        ring.push(bucket(0, 50.0)).unwrap();
        ring.push(bucket(1, 51.0)).unwrap();
        assert!(ring.open_bucket_covering(30_000).is_some());

        ring.freeze_elapsed(60_000);
        assert!(ring.open_bucket_covering(30_000).is_none());
        assert!(ring.interval_is_frozen(30_000));
        assert!(ring.open_bucket_covering(70_000).is_some());
    }

    #[test]
    fn test_insert_backfill_keeps_order() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        ring.push(bucket(0, 50.0)).unwrap();
        ring.push(bucket(3, 53.0)).unwrap();

        assert!(ring.insert_backfill(bucket(1, 51.0)).unwrap());
        let starts: Vec<i64> = ring.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 60_000, 180_000]);

        // Occupied interval is an invariant violation
        assert!(ring.insert_backfill(bucket(3, 99.0)).is_err());
    }

    #[test]
    fn test_insert_backfill_refuses_below_full_ring() {
        let mut ring = BucketRing::new(Resolution::Minute1, 2);
        ring.push(bucket(5, 50.0)).unwrap();
        ring.push(bucket(6, 51.0)).unwrap();
        assert!(!ring.insert_backfill(bucket(1, 49.0)).unwrap());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_query_returns_intersecting_ordered() {
        let mut ring = BucketRing::new(Resolution::Minute1, 8);
        for minute in 0..5 {
            ring.push(bucket(minute, 50.0)).unwrap();
        }
        let hits = ring.query(TimeRange::new(60_000, 180_001));
        let starts: Vec<i64> = hits.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![60_000, 120_000, 180_000]);

        assert!(ring.query(TimeRange::new(900_000, 960_000)).is_empty());
    }

    #[test]
    fn test_restore_recheckes_invariants() {
        let good = vec![bucket(0, 1.0), bucket(1, 2.0)];
        let ring = BucketRing::restore(Resolution::Minute1, 8, good).unwrap();
        assert_eq!(ring.len(), 2);

        let bad = vec![bucket(1, 1.0), bucket(0, 2.0)];
        assert!(BucketRing::restore(Resolution::Minute1, 8, bad).is_err());
    }
}
