// Time-Series Store
// Per-key partitions of multi-resolution bucket rings

pub mod ring;

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{IngestConfig, RetentionConfig};
use crate::error::{PlentraError, PlentraResult};
use crate::telemetry::{
    BUCKETS_CLOSED, BUCKETS_OPENED, PARTITIONS_POISONED, RING_EVICTIONS, TICKS_LATE_DROPPED,
};
use crate::types::{Bucket, MetricKey, Resolution, Tick, TimeRange};

pub use ring::BucketRing;

/// What one accepted tick did to the store.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Resolutions whose open bucket absorbed the tick.
    pub applied: usize,
    /// Buckets frozen as a side effect of this ingest.
    pub closed: Vec<Bucket>,
}

/// Serializable state of one partition, for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub key: MetricKey,
    pub rings: Vec<BucketRing>,
}

/// One key's bucket rings plus its recent-tick tail.
///
/// Guarded by the owning DashMap shard lock; writes to one key are serialized
/// while unrelated keys proceed in parallel. A partition that ever observes an
/// ordering violation is poisoned: reads keep working, writes are refused.
#[derive(Debug)]
struct Partition {
    rings: Vec<BucketRing>,
    recent: VecDeque<Tick>,
    recent_capacity: usize,
    epoch: u64,
    poisoned: bool,
}

impl Partition {
    fn new(retention: &RetentionConfig, recent_capacity: usize) -> Self {
        let rings = Resolution::all()
            .iter()
            .map(|&res| BucketRing::new(res, retention.ring_capacity(res)))
            .collect();
        Self {
            rings,
            recent: VecDeque::new(),
            recent_capacity,
            epoch: 0,
            poisoned: false,
        }
    }

    fn ring(&self, resolution: Resolution) -> &BucketRing {
        &self.rings[resolution_index(resolution)]
    }

    fn apply_tick(&mut self, tick: &Tick, freeze_cutoff_ms: i64) -> PlentraResult<IngestReport> {
        let mut report = IngestReport::default();

        for ring in self.rings.iter_mut() {
            let resolution = ring.resolution();
            let aligned = resolution.align(tick.timestamp);

            let newer = ring.newest().map_or(true, |b| aligned > b.start);
            if newer {
                let bucket = Bucket::open_with(tick.key.clone(), resolution, tick);
                if ring.push(bucket)?.is_some() {
                    RING_EVICTIONS.inc();
                }
                BUCKETS_OPENED.with_label_values(&[resolution.label()]).inc();
                report.applied += 1;
            } else if let Some(bucket) = ring.open_bucket_covering(tick.timestamp) {
                bucket.apply(tick);
                report.applied += 1;
            } else if !ring.interval_is_frozen(tick.timestamp) {
                // In-window arrival for an interval that never opened
                let bucket = Bucket::open_with(tick.key.clone(), resolution, tick);
                if ring.insert_backfill(bucket)? {
                    BUCKETS_OPENED.with_label_values(&[resolution.label()]).inc();
                    report.applied += 1;
                }
            }
            // A frozen interval never takes another tick, even in-window.

            for frozen in ring.freeze_elapsed(freeze_cutoff_ms) {
                BUCKETS_CLOSED.with_label_values(&[resolution.label()]).inc();
                report.closed.push(frozen);
            }
        }

        self.recent.push_back(tick.clone());
        while self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }
        self.epoch += 1;

        Ok(report)
    }

    fn freeze_elapsed(&mut self, cutoff_ms: i64) -> Vec<Bucket> {
        let mut closed = Vec::new();
        for ring in self.rings.iter_mut() {
            for frozen in ring.freeze_elapsed(cutoff_ms) {
                BUCKETS_CLOSED
                    .with_label_values(&[frozen.resolution.label()])
                    .inc();
                closed.push(frozen);
            }
        }
        if !closed.is_empty() {
            self.epoch += 1;
        }
        closed
    }
}

fn resolution_index(resolution: Resolution) -> usize {
    match resolution {
        Resolution::Seconds5 => 0,
        Resolution::Minute1 => 1,
        Resolution::Minutes15 => 2,
        Resolution::Hour1 => 3,
        Resolution::Day1 => 4,
    }
}

/// Concurrent multi-resolution time-series store.
///
/// Ingestion is synchronous on the caller's thread; readers take clones and
/// never observe a half-applied tick.
pub struct TimeSeriesStore {
    partitions: DashMap<MetricKey, Partition>,
    ingest: IngestConfig,
    retention: RetentionConfig,
}

impl TimeSeriesStore {
    pub fn new(ingest: IngestConfig, retention: RetentionConfig) -> Self {
        Self {
            partitions: DashMap::new(),
            ingest,
            retention,
        }
    }

    /// Fold one normalized tick into every resolution ring of its key.
    ///
    /// Ticks older than the lateness window are dropped with `LateTick`;
    /// frozen buckets are never touched. A store invariant violation poisons
    /// the partition and surfaces as a fatal error.
    pub fn ingest(&self, tick: &Tick, now_ms: i64) -> PlentraResult<IngestReport> {
        let age_ms = now_ms - tick.timestamp;
        if age_ms > self.ingest.lateness_window_ms {
            TICKS_LATE_DROPPED.inc();
            debug!(key = %tick.key, age_ms, "Late tick dropped");
            return Err(PlentraError::late_tick(
                tick.key.to_string(),
                age_ms - self.ingest.lateness_window_ms,
            ));
        }

        let mut partition = self
            .partitions
            .entry(tick.key.clone())
            .or_insert_with(|| Partition::new(&self.retention, self.ingest.recent_ticks_per_key));

        if partition.poisoned {
            return Err(PlentraError::partition_poisoned(tick.key.to_string()));
        }

        let cutoff = now_ms - self.ingest.lateness_window_ms;
        match partition.apply_tick(tick, cutoff) {
            Ok(report) => Ok(report),
            Err(e) if e.is_fatal() => {
                partition.poisoned = true;
                PARTITIONS_POISONED.inc();
                error!(key = %tick.key, error = %e, "Partition poisoned");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Freeze every bucket across all partitions whose interval elapsed past
    /// the lateness window. Runs on a timer so idle keys still close.
    pub fn close_elapsed(&self, now_ms: i64) -> Vec<Bucket> {
        let cutoff = now_ms - self.ingest.lateness_window_ms;
        let mut closed = Vec::new();
        for mut partition in self.partitions.iter_mut() {
            if partition.poisoned {
                continue;
            }
            closed.extend(partition.freeze_elapsed(cutoff));
        }
        if !closed.is_empty() {
            debug!(count = closed.len(), "Elapsed buckets frozen");
        }
        closed
    }

    /// Ordered buckets of one key and resolution intersecting the range.
    /// Unknown keys yield an empty series, not an error.
    pub fn query(&self, key: &MetricKey, resolution: Resolution, range: TimeRange) -> Vec<Bucket> {
        self.partitions
            .get(key)
            .map(|p| p.ring(resolution).query(range))
            .unwrap_or_default()
    }

    /// Newest bucket of one key and resolution.
    pub fn latest(&self, key: &MetricKey, resolution: Resolution) -> Option<Bucket> {
        self.partitions
            .get(key)
            .and_then(|p| p.ring(resolution).newest().cloned())
    }

    /// Newest bucket at the finest resolution that has data.
    pub fn latest_any(&self, key: &MetricKey) -> Option<Bucket> {
        let partition = self.partitions.get(key)?;
        partition
            .rings
            .iter()
            .find_map(|ring| ring.newest().cloned())
    }

    /// Tail of raw ticks for one key, oldest first.
    pub fn recent_ticks(&self, key: &MetricKey) -> Vec<Tick> {
        self.partitions
            .get(key)
            .map(|p| p.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every key with at least one partition, unordered.
    pub fn keys(&self) -> Vec<MetricKey> {
        self.partitions.iter().map(|e| e.key().clone()).collect()
    }

    /// Monotonic per-key change counter, used for derived-cache invalidation.
    /// Unknown keys report epoch zero.
    pub fn epoch(&self, key: &MetricKey) -> u64 {
        self.partitions.get(key).map_or(0, |p| p.epoch)
    }

    pub fn is_poisoned(&self, key: &MetricKey) -> bool {
        self.partitions.get(key).map_or(false, |p| p.poisoned)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Clone out every partition's rings for persistence.
    pub fn export(&self) -> Vec<PartitionRecord> {
        self.partitions
            .iter()
            .filter(|p| !p.poisoned)
            .map(|p| PartitionRecord {
                key: p.key().clone(),
                rings: p.rings.clone(),
            })
            .collect()
    }

    /// Rebuild partitions from persisted records, re-checking ring invariants
    /// and re-sizing rings to the current retention config.
    pub fn restore(&self, records: Vec<PartitionRecord>) -> PlentraResult<usize> {
        let mut restored = 0;
        for record in records {
            let mut partition =
                Partition::new(&self.retention, self.ingest.recent_ticks_per_key);
            for ring in record.rings {
                let resolution = ring.resolution();
                let capacity = self.retention.ring_capacity(resolution);
                let buckets: Vec<Bucket> = ring.iter().cloned().collect();
                let skip = buckets.len().saturating_sub(capacity);
                let rebuilt =
                    BucketRing::restore(resolution, capacity, buckets[skip..].to_vec())?;
                partition.rings[resolution_index(resolution)] = rebuilt;
            }
            if self.partitions.contains_key(&record.key) {
                warn!(key = %record.key, "Skipping restore over a live partition");
                continue;
            }
            self.partitions.insert(record.key, partition);
            restored += 1;
        }
        Ok(restored)
    }
}
