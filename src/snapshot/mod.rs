// Snapshot and Subscription Service
// Periodic consistent views of the engine, fanned out over broadcast

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::alerts::AlertEvent;
use crate::config::SnapshotConfig;
use crate::derived::{spread, vwap, DerivedEngine};
use crate::store::TimeSeriesStore;
use crate::telemetry::{FEEDS_STALE, SNAPSHOTS_BUILT, SUBSCRIBERS_ACTIVE, SUBSCRIBER_GAPS};
use crate::types::{Bucket, FeedId, KeyPattern, MetricKey, Resolution, TimeRange};

/// Liveness of one upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedHealth {
    Healthy,
    Stale,
    Down,
}

/// One feed's health as of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub feed: FeedId,
    pub health: FeedHealth,
    pub last_seen_ms: i64,
    pub silent_ms: i64,
}

/// Latest state of one key inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub key: MetricKey,
    /// Newest bucket at the finest resolution holding data.
    pub latest: Bucket,
    /// VWAP over the snapshot's trailing derived window.
    pub vwap: Option<f64>,
    /// High-low spread over the same window.
    pub spread: Option<f64>,
    /// Timestamp of the newest raw tick for this key.
    pub last_tick_ms: i64,
    /// True when the key has gone silent past the staleness bound.
    pub stale: bool,
}

/// A consistent view of every key, feed and recent alert at one instant.
///
/// Sequence numbers are strictly monotonic; a subscriber holding snapshot
/// `n` knows it has seen every delta up to `n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub built_at: i64,
    pub keys: Vec<KeySnapshot>,
    pub feeds: Vec<FeedStatus>,
    pub recent_events: Vec<AlertEvent>,
    /// True when any key or feed is stale; the dashboard's top indicator.
    pub any_stale: bool,
}

/// Incremental update between consecutive snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDelta {
    pub sequence: u64,
    pub built_at: i64,
    /// Keys whose partition changed since the previous build.
    pub updated: Vec<KeySnapshot>,
    /// Alert events emitted since the previous build.
    pub events: Vec<AlertEvent>,
    pub feeds: Vec<FeedStatus>,
    pub any_stale: bool,
}

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Delta(SnapshotDelta),
    /// The subscriber lagged and `missed` deltas were dropped; it should
    /// resynchronize from the current full snapshot.
    Gap { missed: u64 },
}

/// Tracks when each feed was last heard from.
///
/// Connectors call `heartbeat` on every delivery; a feed silent past the
/// bound degrades to Stale, and past three bounds to Down.
#[derive(Debug)]
pub struct FeedHealthTracker {
    staleness_bound_ms: i64,
    last_seen: DashMap<FeedId, i64>,
}

impl FeedHealthTracker {
    pub fn new(staleness_bound_ms: i64) -> Self {
        Self {
            staleness_bound_ms,
            last_seen: DashMap::new(),
        }
    }

    pub fn heartbeat(&self, feed: &FeedId, now_ms: i64) {
        self.last_seen
            .entry(feed.clone())
            .and_modify(|seen| *seen = (*seen).max(now_ms))
            .or_insert(now_ms);
    }

    pub fn health(&self, feed: &FeedId, now_ms: i64) -> FeedHealth {
        match self.last_seen.get(feed) {
            Some(seen) => classify(now_ms - *seen, self.staleness_bound_ms),
            None => FeedHealth::Down,
        }
    }

    /// Status of every known feed, sorted by feed id.
    pub fn statuses(&self, now_ms: i64) -> Vec<FeedStatus> {
        let mut statuses: Vec<FeedStatus> = self
            .last_seen
            .iter()
            .map(|entry| {
                let silent_ms = (now_ms - *entry.value()).max(0);
                FeedStatus {
                    feed: entry.key().clone(),
                    health: classify(silent_ms, self.staleness_bound_ms),
                    last_seen_ms: *entry.value(),
                    silent_ms,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.feed.as_str().cmp(b.feed.as_str()));

        let stale = statuses
            .iter()
            .filter(|s| s.health != FeedHealth::Healthy)
            .count();
        FEEDS_STALE.set(stale as i64);
        statuses
    }
}

fn classify(silent_ms: i64, bound_ms: i64) -> FeedHealth {
    if silent_ms <= bound_ms {
        FeedHealth::Healthy
    } else if silent_ms <= 3 * bound_ms {
        FeedHealth::Stale
    } else {
        FeedHealth::Down
    }
}

/// Builds snapshots on demand and fans deltas out to subscribers.
///
/// Producers never block on consumers: the broadcast channel drops the
/// oldest delta for a lagging subscriber, which then sees an explicit gap.
pub struct SnapshotService {
    store: Arc<TimeSeriesStore>,
    derived: Arc<DerivedEngine>,
    health: Arc<FeedHealthTracker>,
    config: SnapshotConfig,
    current: RwLock<Arc<Snapshot>>,
    sender: broadcast::Sender<StreamMessage>,
    sequence: AtomicU64,
    /// Store epochs as of the previous build, for delta detection.
    built_epochs: Mutex<HashMap<MetricKey, u64>>,
}

impl SnapshotService {
    pub fn new(
        store: Arc<TimeSeriesStore>,
        derived: Arc<DerivedEngine>,
        health: Arc<FeedHealthTracker>,
        config: SnapshotConfig,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.subscriber_channel_capacity);
        let empty = Snapshot {
            sequence: 0,
            built_at: 0,
            keys: Vec::new(),
            feeds: Vec::new(),
            recent_events: Vec::new(),
            any_stale: false,
        };
        Self {
            store,
            derived,
            health,
            config,
            current: RwLock::new(Arc::new(empty)),
            sender,
            sequence: AtomicU64::new(0),
            built_epochs: Mutex::new(HashMap::new()),
        }
    }

    /// The most recently built snapshot. Cheap, lock-held only for the clone.
    pub fn current(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe to every delta. Returns the current full snapshot so the
    /// subscriber starts from a consistent base.
    pub fn subscribe(&self) -> (Arc<Snapshot>, SnapshotSubscription) {
        self.subscribe_with(KeyPattern::any())
    }

    /// Subscribe narrowed to keys matching `filter`. Deltas are trimmed to
    /// the matching keys and events; deltas left empty are skipped.
    pub fn subscribe_with(&self, filter: KeyPattern) -> (Arc<Snapshot>, SnapshotSubscription) {
        SUBSCRIBERS_ACTIVE.inc();
        let receiver = self.sender.subscribe();
        (self.current(), SnapshotSubscription { receiver, filter })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Build the next snapshot and broadcast its delta.
    ///
    /// `events` are the alert events emitted since the previous build; they
    /// ride along in the delta and in the snapshot's recent list.
    pub fn build(&self, now_ms: i64, events: Vec<AlertEvent>) -> Arc<Snapshot> {
        let started = Instant::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut keys = self.store.keys();
        keys.sort_by_key(|k| k.to_string());

        let window = TimeRange::new(now_ms - self.config.derived_window_ms, now_ms);
        let mut key_snapshots = Vec::with_capacity(keys.len());
        let mut epochs = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(latest) = self.store.latest_any(&key) else {
                continue;
            };
            epochs.insert(key.clone(), self.store.epoch(&key));

            let minute = self.store.query(&key, Resolution::Minute1, window);
            let last_tick_ms = self
                .store
                .recent_ticks(&key)
                .last()
                .map(|t| t.timestamp)
                .unwrap_or(latest.start);
            key_snapshots.push(KeySnapshot {
                stale: now_ms - last_tick_ms > self.config.staleness_bound_ms,
                vwap: vwap(&minute),
                spread: spread(&minute),
                key,
                latest,
                last_tick_ms,
            });
        }

        let feeds = self.health.statuses(now_ms);
        let any_stale = key_snapshots.iter().any(|k| k.stale)
            || feeds.iter().any(|f| f.health != FeedHealth::Healthy);

        let updated: Vec<KeySnapshot> = {
            let mut previous = match self.built_epochs.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let updated = key_snapshots
                .iter()
                .filter(|k| previous.get(&k.key) != epochs.get(&k.key))
                .cloned()
                .collect();
            *previous = epochs;
            updated
        };

        let mut recent_events = self.current().recent_events.clone();
        recent_events.extend(events.iter().cloned());
        let overflow = recent_events.len().saturating_sub(RECENT_EVENTS_KEPT);
        recent_events.drain(..overflow);

        let snapshot = Arc::new(Snapshot {
            sequence,
            built_at: now_ms,
            keys: key_snapshots,
            feeds: feeds.clone(),
            recent_events,
            any_stale,
        });

        match self.current.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        SNAPSHOTS_BUILT.inc();

        let delta = SnapshotDelta {
            sequence,
            built_at: now_ms,
            updated,
            events,
            feeds,
            any_stale,
        };
        // No subscribers is not an error
        let _ = self.sender.send(StreamMessage::Delta(delta));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.build_budget_ms {
            warn!(sequence, elapsed_ms, "Slow snapshot build");
        } else {
            debug!(sequence, keys = snapshot.keys.len(), "Snapshot built");
        }
        snapshot
    }

    /// Derived engine backing this service, for ad-hoc queries.
    pub fn derived(&self) -> &Arc<DerivedEngine> {
        &self.derived
    }
}

/// How many recent alert events a full snapshot carries.
const RECENT_EVENTS_KEPT: usize = 100;

/// A live delta stream. Dropping it releases the slot.
pub struct SnapshotSubscription {
    receiver: broadcast::Receiver<StreamMessage>,
    filter: KeyPattern,
}

impl SnapshotSubscription {
    /// Next message; `None` when the service shut down. Lag surfaces as
    /// `Gap` rather than an error, the subscriber re-bases and continues.
    pub async fn next(&mut self) -> Option<StreamMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if let Some(message) = self.narrow(message) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    SUBSCRIBER_GAPS.inc();
                    return Some(StreamMessage::Gap { missed });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt to a `Stream` for `StreamExt` consumers. The subscription
    /// lives inside the stream, so dropping the stream releases the slot.
    /// Pinned so `next()` works on the adapter without further ceremony.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = StreamMessage> + Unpin {
        Box::pin(futures_util::stream::unfold(self, |mut subscription| {
            async move {
                subscription
                    .next()
                    .await
                    .map(|message| (message, subscription))
            }
        }))
    }

    /// Non-blocking poll, mainly for tests and drain loops.
    pub fn try_next(&mut self) -> Option<StreamMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if let Some(message) = self.narrow(message) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    SUBSCRIBER_GAPS.inc();
                    return Some(StreamMessage::Gap { missed });
                }
                Err(_) => return None,
            }
        }
    }

    /// Apply the key filter to one message; `None` when nothing remains
    /// for this subscriber. Gaps always pass through.
    fn narrow(&self, message: StreamMessage) -> Option<StreamMessage> {
        if self.filter.is_any() {
            return Some(message);
        }
        match message {
            StreamMessage::Delta(mut delta) => {
                delta.updated.retain(|k| self.filter.matches(&k.key));
                delta.events.retain(|e| self.filter.matches(&e.key));
                if delta.updated.is_empty() && delta.events.is_empty() {
                    None
                } else {
                    Some(StreamMessage::Delta(delta))
                }
            }
            gap => Some(gap),
        }
    }
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        SUBSCRIBERS_ACTIVE.dec();
    }
}
