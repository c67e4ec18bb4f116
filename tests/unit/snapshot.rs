// Snapshot construction and fan-out scenarios

use std::sync::Arc;

use futures_util::StreamExt;
use plentra::config::{IngestConfig, RetentionConfig, SnapshotConfig};
use plentra::derived::DerivedEngine;
use plentra::snapshot::{FeedHealthTracker, SnapshotService};
use plentra::store::TimeSeriesStore;
use plentra::{FeedHealth, FeedId, StreamMessage, Tick};

const BASE: i64 = 1_700_000_000_000 - (1_700_000_000_000 % 86_400_000);

fn service() -> (Arc<TimeSeriesStore>, Arc<FeedHealthTracker>, SnapshotService) {
    let store = Arc::new(TimeSeriesStore::new(
        IngestConfig::default(),
        RetentionConfig::default(),
    ));
    let derived = Arc::new(DerivedEngine::new(store.clone()));
    let health = Arc::new(FeedHealthTracker::new(
        SnapshotConfig::default().staleness_bound_ms,
    ));
    let service = SnapshotService::new(
        store.clone(),
        derived,
        health.clone(),
        SnapshotConfig::default(),
    );
    (store, health, service)
}

fn ingest(store: &TimeSeriesStore, key: &str, timestamp: i64, value: f64) {
    let tick = Tick {
        key: key.parse().unwrap(),
        timestamp,
        value,
        volume: Some(10.0),
        source: FeedId::new("entsoe"),
    };
    store.ingest(&tick, timestamp).unwrap();
}

#[test]
fn test_stale_feed_surfaces_in_snapshot() {
    let (store, health, service) = service();
    ingest(&store, "PL/CEN/spot-price", BASE, 50.0);
    health.heartbeat(&FeedId::new("entsoe"), BASE);

    let fresh = service.build(BASE + 1_000, Vec::new());
    assert_eq!(fresh.feeds.len(), 1);
    assert_eq!(fresh.feeds[0].health, FeedHealth::Healthy);
    assert!(!fresh.any_stale);

    // A minute of silence: feed stale, key stale, top indicator on
    let stale = service.build(BASE + 60_000, Vec::new());
    assert_eq!(stale.feeds[0].health, FeedHealth::Stale);
    assert!(stale.keys[0].stale);
    assert!(stale.any_stale);

    // The feed recovers and the indicator clears
    health.heartbeat(&FeedId::new("entsoe"), BASE + 70_000);
    ingest(&store, "PL/CEN/spot-price", BASE + 70_000, 51.0);
    let recovered = service.build(BASE + 71_000, Vec::new());
    assert_eq!(recovered.feeds[0].health, FeedHealth::Healthy);
    assert!(!recovered.any_stale);
}

#[tokio::test]
async fn test_delta_stream_adapter() {
    let (store, _, service) = service();
    let (_, subscription) = service.subscribe();
    let mut stream = subscription.into_stream();

    ingest(&store, "PL/CEN/spot-price", BASE, 50.0);
    service.build(BASE + 1_000, Vec::new());
    ingest(&store, "PL/CEN/spot-price", BASE + 2_000, 55.0);
    service.build(BASE + 3_000, Vec::new());

    let Some(StreamMessage::Delta(first)) = stream.next().await else {
        panic!("expected first delta");
    };
    let Some(StreamMessage::Delta(second)) = stream.next().await else {
        panic!("expected second delta");
    };
    assert_eq!(first.sequence + 1, second.sequence);
    assert_eq!(second.updated[0].latest.close, 55.0);
}

#[test]
fn test_snapshot_vwap_window_tracks_recent_trades() {
    let (store, _, service) = service();
    // Two trades inside the derived window, one far outside it
    ingest(&store, "PL/CEN/spot-price", BASE - 7_200_000, 500.0);
    ingest(&store, "PL/CEN/spot-price", BASE, 40.0);
    ingest(&store, "PL/CEN/spot-price", BASE + 1_000, 60.0);

    let snapshot = service.build(BASE + 2_000, Vec::new());
    let key = &snapshot.keys[0];
    // The hour-long window only sees the 40 and 60 trades
    assert_eq!(key.vwap, Some(50.0));
    assert_eq!(key.spread, Some(20.0));
}
