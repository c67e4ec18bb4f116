// Analytics Engine
// Wires normalizer, store, derived metrics, alerting and snapshots together

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertEngine, AlertEvent, AlertRule, RuleSpec};
use crate::config::EngineConfig;
use crate::derived::{DerivedEngine, DerivedKind, DerivedValue, GenerationUnit, MeritOrder};
use crate::error::{PlentraError, PlentraResult};
use crate::normalizer::{FeedConnector, FeedNormalizer, RawFeedMessage};
use crate::persist::{self, EngineState};
use crate::snapshot::{
    FeedHealth, FeedHealthTracker, Snapshot, SnapshotService, SnapshotSubscription,
};
use crate::store::TimeSeriesStore;
use crate::telemetry::SLOW_TICKS;
use crate::types::{Bucket, FeedId, KeyPattern, MetricKey, Resolution, Tick, TimeRange};

/// The streaming analytics engine behind the trading dashboard.
///
/// One instance owns the whole pipeline: feed messages enter through
/// [`submit`](Self::submit), queries and subscriptions read out the other
/// side. Ingestion runs synchronously on the caller's task; the only
/// background work is the periodic bucket sweep and snapshot build started
/// by [`start`](Self::start).
pub struct AnalyticsEngine {
    config: EngineConfig,
    normalizer: FeedNormalizer,
    store: Arc<TimeSeriesStore>,
    derived: Arc<DerivedEngine>,
    alerts: Arc<AlertEngine>,
    health: Arc<FeedHealthTracker>,
    snapshots: Arc<SnapshotService>,
    /// Alert events waiting to ride the next snapshot delta.
    pending_events: Mutex<Vec<AlertEvent>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnalyticsEngine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(TimeSeriesStore::new(
            config.ingest.clone(),
            config.retention.clone(),
        ));
        let derived = Arc::new(DerivedEngine::new(store.clone()));
        let alerts = Arc::new(AlertEngine::new(config.alerting.clone()));
        let health = Arc::new(FeedHealthTracker::new(config.snapshot.staleness_bound_ms));
        let snapshots = Arc::new(SnapshotService::new(
            store.clone(),
            derived.clone(),
            health.clone(),
            config.snapshot.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            normalizer: FeedNormalizer::new(config.ingest.clone()),
            config,
            store,
            derived,
            alerts,
            health,
            snapshots,
            pending_events: Mutex::new(Vec::new()),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Feed one raw connector message through the pipeline.
    ///
    /// Normalizes, stores and evaluates alerts before returning; the data is
    /// visible to queries the moment this returns. Malformed and late
    /// messages are dropped, counted and reported as `Ok(None)`; only a
    /// fatal store condition surfaces as an error.
    pub fn submit(&self, feed: &FeedId, raw: &RawFeedMessage) -> PlentraResult<Option<Tick>> {
        self.submit_at(feed, raw, Self::now_ms())
    }

    /// [`submit`](Self::submit) with an explicit clock, for replay and tests.
    pub fn submit_at(
        &self,
        feed: &FeedId,
        raw: &RawFeedMessage,
        now_ms: i64,
    ) -> PlentraResult<Option<Tick>> {
        let started = Instant::now();
        // Even a malformed message proves the feed is alive
        self.health.heartbeat(feed, now_ms);

        let tick = match self.normalizer.normalize(feed, raw, now_ms) {
            Ok(tick) => tick,
            Err(e) => {
                debug!(feed = %feed, error = %e, "Message dropped");
                return Ok(None);
            }
        };
        match self.store.ingest(&tick, now_ms) {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(key = %tick.key, error = %e, "Tick dropped");
                return Ok(None);
            }
        }

        let events = self.alerts.evaluate(&tick.key, tick.value, tick.timestamp);
        if !events.is_empty() {
            if let Ok(mut pending) = self.pending_events.lock() {
                pending.extend(events);
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.ingest.slow_tick_budget_ms {
            SLOW_TICKS.inc();
            warn!(key = %tick.key, elapsed_ms, "Slow tick processing");
        }
        Ok(Some(tick))
    }

    /// Stored buckets for one key and resolution over a half-open range.
    pub fn get_series(
        &self,
        key: &MetricKey,
        resolution: Resolution,
        range: TimeRange,
    ) -> Vec<Bucket> {
        self.store.query(key, resolution, range)
    }

    /// One derived metric over a window, served from cache when fresh.
    pub fn get_derived(
        &self,
        key: &MetricKey,
        kind: DerivedKind,
        range: TimeRange,
    ) -> PlentraResult<DerivedValue> {
        self.derived.compute(key, kind, range)
    }

    /// Clear a generation stack against a demand level.
    pub fn merit_order(&self, units: &[GenerationUnit], demand_mw: f64) -> MeritOrder {
        crate::derived::merit_order(units, demand_mw)
    }

    /// Raw tick tail for one key, oldest first.
    pub fn recent_ticks(&self, key: &MetricKey) -> Vec<Tick> {
        self.store.recent_ticks(key)
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.current()
    }

    /// Current full snapshot plus a live delta stream.
    pub fn subscribe(&self) -> (Arc<Snapshot>, SnapshotSubscription) {
        self.snapshots.subscribe()
    }

    /// [`subscribe`](Self::subscribe) narrowed to keys matching `filter`.
    pub fn subscribe_with(&self, filter: KeyPattern) -> (Arc<Snapshot>, SnapshotSubscription) {
        self.snapshots.subscribe_with(filter)
    }

    pub fn create_rule(&self, spec: RuleSpec) -> PlentraResult<AlertRule> {
        self.alerts.create_rule(spec, Self::now_ms())
    }

    pub fn delete_rule(&self, rule_id: Uuid) -> PlentraResult<AlertRule> {
        self.alerts.delete_rule(rule_id)
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.alerts.list_rules()
    }

    /// Retained alert events, optionally filtered by rule and trigger time.
    pub fn list_events(
        &self,
        rule_id: Option<Uuid>,
        range: Option<TimeRange>,
    ) -> Vec<AlertEvent> {
        self.alerts.list_events(rule_id, range)
    }

    /// Record connector liveness without data, e.g. protocol keepalives.
    pub fn heartbeat(&self, feed: &FeedId) {
        self.health.heartbeat(feed, Self::now_ms());
    }

    pub fn feed_health(&self, feed: &FeedId) -> FeedHealth {
        self.health.health(feed, Self::now_ms())
    }

    /// Sweep elapsed buckets and build a snapshot right now. The periodic
    /// worker does exactly this; exposed for replay and tests.
    pub fn run_cycle_at(&self, now_ms: i64) -> Arc<Snapshot> {
        self.store.close_elapsed(now_ms);
        let events = match self.pending_events.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        };
        self.snapshots.build(now_ms, events)
    }

    /// Drive a connector until engine shutdown.
    ///
    /// Every successful poll heartbeats the feed; per-message failures are
    /// logged and skipped, a failing poll backs off briefly. Only a fatal
    /// store condition stops the loop early.
    pub fn attach_connector(
        self: Arc<Self>,
        mut connector: Box<dyn FeedConnector>,
    ) -> JoinHandle<()> {
        let engine = self;
        let mut shutdown = engine.shutdown.subscribe();
        tokio::spawn(async move {
            let feed = connector.id();
            info!(feed = %feed, "Connector attached");
            loop {
                tokio::select! {
                    batch = connector.poll() => match batch {
                        Ok(messages) => {
                            engine.heartbeat(&feed);
                            for message in &messages {
                                // Dropped messages come back Ok(None), already counted
                                if let Err(e) = engine.submit(&feed, message) {
                                    error!(feed = %feed, error = %e, "Connector stopped on fatal error");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(feed = %feed, error = %e, "Connector poll failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(feed = %feed, "Connector detached");
        })
    }

    /// Start the periodic sweep-and-snapshot worker.
    pub fn start(self: Arc<Self>) -> PlentraResult<()> {
        let mut guard = self
            .worker
            .lock()
            .map_err(|_| PlentraError::internal("engine worker lock poisoned"))?;
        if guard.is_some() {
            return Err(PlentraError::internal("engine already started"));
        }

        let engine = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_millis(self.config.snapshot.interval_ms);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(period_ms = period.as_millis() as u64, "Snapshot worker started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.run_cycle_at(AnalyticsEngine::now_ms());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Snapshot worker stopped");
        });
        *guard = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for it to finish. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Snapshot worker did not stop cleanly");
            }
        }
        info!("Engine shut down");
    }

    /// Persist bucket rings and alert rules to `path`.
    pub fn save_state(&self, path: impl AsRef<Path>) -> PlentraResult<()> {
        let state = EngineState::new(
            Self::now_ms(),
            self.store.export(),
            self.alerts.export_rules(),
        );
        persist::save(path, &state)
    }

    /// Restore previously saved state. A missing file is a clean start.
    pub fn load_state(&self, path: impl AsRef<Path>) -> PlentraResult<()> {
        if let Some(state) = persist::load(path)? {
            let partitions = self.store.restore(state.partitions)?;
            let rules = self.alerts.restore_rules(state.rules);
            info!(partitions, rules, "Engine state restored");
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
