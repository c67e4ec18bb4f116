// Prometheus Telemetry
// Counters and gauges exported by every stage of the pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    // Normalizer
    pub static ref TICKS_NORMALIZED: IntCounterVec = register_int_counter_vec!(
        "plentra_ticks_normalized_total",
        "Ticks accepted by the feed normalizer",
        &["feed"]
    )
    .unwrap();
    pub static ref TICKS_MALFORMED: IntCounterVec = register_int_counter_vec!(
        "plentra_ticks_malformed_total",
        "Raw messages rejected as malformed",
        &["feed"]
    )
    .unwrap();

    // Time-series store
    pub static ref TICKS_LATE_DROPPED: IntCounter = register_int_counter!(
        "plentra_ticks_late_dropped_total",
        "Ticks dropped for arriving past the lateness window"
    )
    .unwrap();
    pub static ref BUCKETS_OPENED: IntCounterVec = register_int_counter_vec!(
        "plentra_buckets_opened_total",
        "Buckets opened per resolution",
        &["resolution"]
    )
    .unwrap();
    pub static ref BUCKETS_CLOSED: IntCounterVec = register_int_counter_vec!(
        "plentra_buckets_closed_total",
        "Buckets frozen per resolution",
        &["resolution"]
    )
    .unwrap();
    pub static ref RING_EVICTIONS: IntCounter = register_int_counter!(
        "plentra_ring_evictions_total",
        "Oldest buckets evicted from full rings"
    )
    .unwrap();
    pub static ref PARTITIONS_POISONED: IntGauge = register_int_gauge!(
        "plentra_partitions_poisoned",
        "Partitions refusing writes after an invariant violation"
    )
    .unwrap();

    // Derived metrics
    pub static ref DERIVED_CACHE_HITS: IntCounter = register_int_counter!(
        "plentra_derived_cache_hits_total",
        "Derived metric reads served from cache"
    )
    .unwrap();
    pub static ref DERIVED_CACHE_MISSES: IntCounter = register_int_counter!(
        "plentra_derived_cache_misses_total",
        "Derived metric reads that recomputed"
    )
    .unwrap();

    // Alerting
    pub static ref ALERTS_TRIGGERED: IntCounterVec = register_int_counter_vec!(
        "plentra_alerts_triggered_total",
        "Alert events emitted",
        &["rule"]
    )
    .unwrap();
    pub static ref RULE_EVAL_ERRORS: IntCounter = register_int_counter!(
        "plentra_rule_eval_errors_total",
        "Rules skipped for one cycle after an evaluation error"
    )
    .unwrap();

    // Snapshots and subscriptions
    pub static ref SNAPSHOTS_BUILT: IntCounter = register_int_counter!(
        "plentra_snapshots_built_total",
        "Snapshots constructed"
    )
    .unwrap();
    pub static ref SUBSCRIBERS_ACTIVE: IntGauge = register_int_gauge!(
        "plentra_subscribers_active",
        "Live snapshot subscriptions"
    )
    .unwrap();
    pub static ref SUBSCRIBER_GAPS: IntCounter = register_int_counter!(
        "plentra_subscriber_gaps_total",
        "Deltas dropped on lagging subscriber queues"
    )
    .unwrap();

    // Latency accounting
    pub static ref SLOW_TICKS: IntCounter = register_int_counter!(
        "plentra_slow_ticks_total",
        "Ticks accepted past the processing latency budget"
    )
    .unwrap();
    pub static ref FEEDS_STALE: IntGauge = register_int_gauge!(
        "plentra_feeds_stale",
        "Feeds currently past their staleness bound"
    )
    .unwrap();
}
