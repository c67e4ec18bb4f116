// Derived metrics over realistic series

use std::sync::Arc;

use plentra::config::{IngestConfig, RetentionConfig};
use plentra::derived::{DerivedEngine, DerivedKind, DerivedValue};
use plentra::store::TimeSeriesStore;
use plentra::{FeedId, MetricKey, Tick, TimeRange};

// 2022-01-03 00:00 UTC, a Monday
const MONDAY: i64 = 1_641_168_000_000;
const HOUR: i64 = 3_600_000;
const DAY: i64 = 86_400_000;

fn setup() -> (Arc<TimeSeriesStore>, DerivedEngine) {
    let store = Arc::new(TimeSeriesStore::new(
        IngestConfig::default(),
        RetentionConfig::default(),
    ));
    let engine = DerivedEngine::new(store.clone());
    (store, engine)
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
fn test_heatmap_over_two_days_of_hourly_prices() {
    let (store, engine) = setup();
    let key = "DE/TEN/spot-price";

    // Morning ramp pattern repeated across two days
    for day in 0..2 {
        for hour in 0..6 {
            let price = 30.0 + 10.0 * hour as f64;
            ingest(&store, key, MONDAY + day * DAY + hour * HOUR, price);
        }
    }

    let key: MetricKey = key.parse().unwrap();
    let range = TimeRange::new(MONDAY, MONDAY + 2 * DAY);
    let DerivedValue::Heatmap { cells } = engine
        .compute(&key, DerivedKind::Heatmap, range)
        .unwrap()
    else {
        panic!("expected heatmap");
    };

    assert_eq!(cells.len(), 12);
    // Cells are ordered by day then hour, mean follows the ramp
    assert_eq!(cells[0].day_start, MONDAY);
    assert_eq!(cells[0].hour, 0);
    assert_eq!(cells[0].mean, 30.0);
    assert_eq!(cells[5].mean, 80.0);
    assert_eq!(cells[6].day_start, MONDAY + DAY);
}

#[test]
fn test_seasonality_is_robust_to_one_spike() {
    let (store, engine) = setup();
    let key = "PL/CEN/spot-price";

    // Five Mondays at 08:00; one of them a spike
    for week in 0..5 {
        let price = if week == 2 { 500.0 } else { 60.0 + week as f64 };
        ingest(&store, key, MONDAY + week * 7 * DAY + 8 * HOUR, price);
    }

    let key: MetricKey = key.parse().unwrap();
    let range = TimeRange::new(MONDAY, MONDAY + 5 * 7 * DAY);
    let DerivedValue::Seasonality { cells } = engine
        .compute(&key, DerivedKind::Seasonality, range)
        .unwrap()
    else {
        panic!("expected seasonality");
    };

    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].weekday, 0);
    assert_eq!(cells[0].hour, 8);
    assert_eq!(cells[0].samples, 5);
    // Median shrugs off the 500 spike
    assert!(cells[0].median < 70.0);
}

#[test]
fn test_forward_envelope_brackets_history() {
    let (store, engine) = setup();
    let key = "PL/CEN/forward-2027-01";

    // A year of daily closes oscillating around 55
    for day in 0..365 {
        let price = 55.0 + 10.0 * ((day % 20) as f64 / 20.0 - 0.5);
        ingest(&store, key, MONDAY + day * DAY, price);
    }

    let key: MetricKey = key.parse().unwrap();
    let range = TimeRange::new(MONDAY, MONDAY + 365 * DAY);
    let DerivedValue::Envelope { envelope } = engine
        .compute(&key, DerivedKind::ForwardEnvelope, range)
        .unwrap()
    else {
        panic!("expected envelope");
    };

    assert_eq!(envelope.samples, 365);
    assert!(envelope.low < envelope.high);
    assert!(envelope.low >= 50.0 && envelope.high <= 60.0);
}

#[test]
fn test_imbalance_direction_follows_latest_sign() {
    let (store, engine) = setup();
    let key = "CZ/CEN/imbalance-volume";

    ingest(&store, key, MONDAY, 150.0);
    let metric_key: MetricKey = key.parse().unwrap();
    let range = TimeRange::new(MONDAY, MONDAY + HOUR);

    use plentra::derived::ImbalanceDirection;
    assert_eq!(
        engine
            .compute(&metric_key, DerivedKind::ImbalanceDirection, range)
            .unwrap(),
        DerivedValue::Direction {
            direction: ImbalanceDirection::Long
        }
    );

    // System flips short
    ingest(&store, key, MONDAY + 5_000, -200.0);
    assert_eq!(
        engine
            .compute(&metric_key, DerivedKind::ImbalanceDirection, range)
            .unwrap(),
        DerivedValue::Direction {
            direction: ImbalanceDirection::Short
        }
    );
}
