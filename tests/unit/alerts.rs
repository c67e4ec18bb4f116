// Alert rule lifecycle scenarios

use plentra::config::AlertingConfig;
use plentra::{AlertEngine, CompareOp, KeyPattern, MetricKey, RuleSpec, RuleState, TimeRange};

fn key() -> MetricKey {
    "PL/CEN/spot-price".parse().unwrap()
}

fn engine_with_rule(threshold: f64, hysteresis: f64, cooldown_ms: i64) -> AlertEngine {
    let engine = AlertEngine::new(AlertingConfig::default());
    engine
        .create_rule(
            RuleSpec {
                name: "spike".to_string(),
                pattern: KeyPattern::exact(&key()),
                op: CompareOp::Gt,
                threshold,
                hysteresis: Some(hysteresis),
                cooldown_ms: Some(cooldown_ms),
                enabled: true,
            },
            0,
        )
        .unwrap();
    engine
}

#[test]
fn test_full_lifecycle_armed_triggered_cooldown_armed() {
    let engine = engine_with_rule(100.0, 5.0, 10_000);
    let rule = engine.list_rules().remove(0);
    let key = key();

    assert_eq!(engine.rule_state(rule.id, &key), RuleState::Armed);

    assert_eq!(engine.evaluate(&key, 105.0, 1_000).len(), 1);
    assert_eq!(engine.rule_state(rule.id, &key), RuleState::Triggered);

    engine.evaluate(&key, 94.0, 2_000);
    assert!(matches!(
        engine.rule_state(rule.id, &key),
        RuleState::Cooldown { .. }
    ));

    // A quiet observation after expiry re-arms
    engine.evaluate(&key, 90.0, 13_000);
    assert_eq!(engine.rule_state(rule.id, &key), RuleState::Armed);
}

#[test]
fn test_two_excursions_two_events() {
    let engine = engine_with_rule(100.0, 5.0, 1_000);
    let key = key();

    let mut total = 0;
    // Excursion, full clear, cooldown expiry, second excursion
    for (value, ts) in [
        (110.0, 1_000),
        (80.0, 2_000),
        (80.0, 4_000),
        (120.0, 5_000),
    ] {
        total += engine.evaluate(&key, value, ts).len();
    }
    assert_eq!(total, 2);
    assert_eq!(engine.event_count(), 2);
}

#[test]
fn test_list_events_filters_by_rule_and_range() {
    let engine = AlertEngine::new(AlertingConfig::default());
    let spike = engine
        .create_rule(
            RuleSpec {
                name: "spike".to_string(),
                pattern: KeyPattern::any(),
                op: CompareOp::Gt,
                threshold: 100.0,
                hysteresis: None,
                cooldown_ms: None,
                enabled: true,
            },
            0,
        )
        .unwrap();
    engine
        .create_rule(
            RuleSpec {
                name: "droop".to_string(),
                pattern: KeyPattern::any(),
                op: CompareOp::Lt,
                threshold: 0.0,
                hysteresis: None,
                cooldown_ms: None,
                enabled: true,
            },
            0,
        )
        .unwrap();

    let key = key();
    engine.evaluate(&key, 150.0, 1_000);
    engine.evaluate(&key, -10.0, 2_000);

    assert_eq!(engine.list_events(None, None).len(), 2);
    let spikes = engine.list_events(Some(spike.id), None);
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].value, 150.0);

    // Half-open range keeps the event at 1_000 and drops the one at 2_000
    let early = engine.list_events(None, Some(TimeRange::new(0, 2_000)));
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].triggered_at, 1_000);
}

#[test]
fn test_defaults_come_from_config() {
    let config = AlertingConfig {
        default_cooldown_ms: 7_000,
        default_hysteresis: 3.5,
        ..Default::default()
    };
    let engine = AlertEngine::new(config);
    let rule = engine
        .create_rule(
            RuleSpec {
                name: "defaulted".to_string(),
                pattern: KeyPattern::any(),
                op: CompareOp::Lt,
                threshold: 0.0,
                hysteresis: None,
                cooldown_ms: None,
                enabled: true,
            },
            42,
        )
        .unwrap();

    assert_eq!(rule.cooldown_ms, 7_000);
    assert_eq!(rule.hysteresis, 3.5);
    assert_eq!(rule.created_at, 42);
}

#[test]
fn test_events_record_the_breaching_observation() {
    let engine = engine_with_rule(100.0, 0.0, 0);
    let key = key();

    let events = engine.evaluate(&key, 123.4, 9_000);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.value, 123.4);
    assert_eq!(event.threshold, 100.0);
    assert_eq!(event.op, CompareOp::Gt);
    assert_eq!(event.triggered_at, 9_000);
    assert_eq!(event.key, key);
    assert_eq!(event.rule_name, "spike");
}
