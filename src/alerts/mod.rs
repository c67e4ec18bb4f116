// Alert Rule Engine
// Threshold rules with hysteresis and cooldown over live metric updates

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AlertingConfig;
use crate::error::{PlentraError, PlentraResult};
use crate::telemetry::{ALERTS_TRIGGERED, RULE_EVAL_ERRORS};
use crate::types::{KeyPattern, MetricKey, TimeRange};

/// Comparison a rule applies to each observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
}

impl CompareOp {
    fn breached(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Eq => (value - threshold).abs() < 1e-9,
        }
    }

    /// True once the value has backed off far enough to re-arm.
    fn cleared(&self, value: f64, threshold: f64, hysteresis: f64) -> bool {
        match self {
            CompareOp::Gt => value <= threshold - hysteresis,
            CompareOp::Lt => value >= threshold + hysteresis,
            CompareOp::Eq => (value - threshold).abs() > hysteresis.max(1e-9),
        }
    }
}

/// User-supplied rule definition; unset tuning falls back to config defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub pattern: KeyPattern,
    pub op: CompareOp,
    pub threshold: f64,
    #[serde(default)]
    pub hysteresis: Option<f64>,
    #[serde(default)]
    pub cooldown_ms: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A validated, registered rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub pattern: KeyPattern,
    pub op: CompareOp,
    pub threshold: f64,
    pub hysteresis: f64,
    pub cooldown_ms: i64,
    pub enabled: bool,
    pub created_at: i64,
}

/// One emission of a rule firing on a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub key: MetricKey,
    pub value: f64,
    pub threshold: f64,
    pub op: CompareOp,
    pub triggered_at: i64,
}

/// Lifecycle of one (rule, key) pair.
///
/// Armed fires on a breach. Triggered holds while the breach persists.
/// Cooldown runs from the trigger; re-arming needs the cooldown elapsed AND
/// the value solidly back on the safe side of `threshold ∓ hysteresis`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RuleState {
    Armed,
    Triggered,
    Cooldown { until: i64 },
}

#[derive(Debug, Clone)]
struct Machine {
    state: RuleState,
    triggered_at: i64,
    /// Newest observation seen, for idempotent re-delivery.
    last_seen: i64,
    last_value: f64,
}

/// Evaluates every registered rule against live observations.
///
/// Rules match keys by pattern; each matched key runs its own state
/// machine, so `PL/*/spot-price` firing on one zone leaves the others armed.
pub struct AlertEngine {
    config: AlertingConfig,
    rules: DashMap<Uuid, AlertRule>,
    machines: DashMap<(Uuid, MetricKey), Machine>,
    events: Mutex<VecDeque<AlertEvent>>,
}

impl AlertEngine {
    pub fn new(config: AlertingConfig) -> Self {
        Self {
            config,
            rules: DashMap::new(),
            machines: DashMap::new(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Validate and register a rule. Matched keys start Armed.
    pub fn create_rule(&self, spec: RuleSpec, now_ms: i64) -> PlentraResult<AlertRule> {
        if spec.name.trim().is_empty() {
            return Err(PlentraError::invalid_rule("rule name must not be empty"));
        }
        if !spec.threshold.is_finite() {
            return Err(PlentraError::invalid_rule(format!(
                "threshold must be finite, got {}",
                spec.threshold
            )));
        }
        let hysteresis = spec.hysteresis.unwrap_or(self.config.default_hysteresis);
        if !hysteresis.is_finite() || hysteresis < 0.0 {
            return Err(PlentraError::invalid_rule(format!(
                "hysteresis must be non-negative, got {hysteresis}"
            )));
        }
        let cooldown_ms = spec.cooldown_ms.unwrap_or(self.config.default_cooldown_ms);
        if cooldown_ms < 0 {
            return Err(PlentraError::invalid_rule(format!(
                "cooldown must be non-negative, got {cooldown_ms}ms"
            )));
        }

        let rule = AlertRule {
            id: Uuid::new_v4(),
            name: spec.name,
            pattern: spec.pattern,
            op: spec.op,
            threshold: spec.threshold,
            hysteresis,
            cooldown_ms,
            enabled: spec.enabled,
            created_at: now_ms,
        };
        info!(rule = %rule.name, id = %rule.id, pattern = %rule.pattern, "Alert rule created");
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Remove a rule and every state machine it spawned.
    pub fn delete_rule(&self, rule_id: Uuid) -> PlentraResult<AlertRule> {
        let (_, rule) = self
            .rules
            .remove(&rule_id)
            .ok_or_else(|| PlentraError::rule_not_found(rule_id.to_string()))?;
        self.machines.retain(|(id, _), _| *id != rule_id);
        info!(rule = %rule.name, id = %rule_id, "Alert rule deleted");
        Ok(rule)
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by_key(|r| r.created_at);
        rules
    }

    pub fn get_rule(&self, rule_id: Uuid) -> PlentraResult<AlertRule> {
        self.rules
            .get(&rule_id)
            .map(|r| r.clone())
            .ok_or_else(|| PlentraError::rule_not_found(rule_id.to_string()))
    }

    /// Current state of one (rule, key) machine; Armed if it never ran.
    pub fn rule_state(&self, rule_id: Uuid, key: &MetricKey) -> RuleState {
        self.machines
            .get(&(rule_id, key.clone()))
            .map_or(RuleState::Armed, |m| m.state)
    }

    /// Evaluate every matching rule against one observation.
    ///
    /// A rule that cannot be evaluated is skipped for this observation and
    /// counted; one bad rule never blocks the rest. Emitted events are
    /// returned and appended to the bounded event log.
    pub fn evaluate(&self, key: &MetricKey, value: f64, timestamp_ms: i64) -> Vec<AlertEvent> {
        let mut emitted = Vec::new();
        for rule in self.rules.iter() {
            if !rule.enabled || !rule.pattern.matches(key) {
                continue;
            }
            match self.step(&rule, key, value, timestamp_ms) {
                Ok(Some(event)) => emitted.push(event),
                Ok(None) => {}
                Err(e) => {
                    RULE_EVAL_ERRORS.inc();
                    warn!(rule = %rule.name, error = %e, "Rule evaluation skipped");
                }
            }
        }
        if !emitted.is_empty() {
            self.append_events(&emitted);
        }
        emitted
    }

    fn step(
        &self,
        rule: &AlertRule,
        key: &MetricKey,
        value: f64,
        timestamp_ms: i64,
    ) -> PlentraResult<Option<AlertEvent>> {
        if !value.is_finite() {
            return Err(PlentraError::rule_eval(
                rule.id.to_string(),
                format!("non-finite observation {value}"),
            ));
        }

        let mut machine = self
            .machines
            .entry((rule.id, key.clone()))
            .or_insert_with(|| Machine {
                state: RuleState::Armed,
                triggered_at: i64::MIN,
                last_seen: i64::MIN,
                last_value: f64::NAN,
            });

        // Re-delivery of an already-seen observation is a no-op; a fresh
        // reading in the same millisecond still counts
        if timestamp_ms < machine.last_seen
            || (timestamp_ms == machine.last_seen && value == machine.last_value)
        {
            return Ok(None);
        }
        machine.last_seen = timestamp_ms;
        machine.last_value = value;

        match machine.state {
            RuleState::Armed => {
                if rule.op.breached(value, rule.threshold) {
                    machine.state = RuleState::Triggered;
                    machine.triggered_at = timestamp_ms;
                    ALERTS_TRIGGERED.with_label_values(&[rule.name.as_str()]).inc();
                    let event = AlertEvent {
                        id: Uuid::new_v4(),
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        key: key.clone(),
                        value,
                        threshold: rule.threshold,
                        op: rule.op,
                        triggered_at: timestamp_ms,
                    };
                    info!(
                        rule = %rule.name,
                        key = %key,
                        value,
                        threshold = rule.threshold,
                        "Alert triggered"
                    );
                    return Ok(Some(event));
                }
            }
            RuleState::Triggered => {
                if rule.op.cleared(value, rule.threshold, rule.hysteresis) {
                    let until = machine.triggered_at.saturating_add(rule.cooldown_ms);
                    machine.state = if timestamp_ms >= until {
                        RuleState::Armed
                    } else {
                        RuleState::Cooldown { until }
                    };
                }
            }
            RuleState::Cooldown { until } => {
                // Re-arming needs both the cooldown elapsed and a clear reading
                if timestamp_ms >= until
                    && rule.op.cleared(value, rule.threshold, rule.hysteresis)
                {
                    machine.state = RuleState::Armed;
                }
            }
        }
        Ok(None)
    }

    fn append_events(&self, events: &[AlertEvent]) {
        if let Ok(mut log) = self.events.lock() {
            for event in events {
                log.push_back(event.clone());
            }
            while log.len() > self.config.max_events_retained {
                log.pop_front();
            }
        }
    }

    /// Retained events, oldest first, optionally narrowed to one rule
    /// and/or a trigger-time range.
    pub fn list_events(
        &self,
        rule_id: Option<Uuid>,
        range: Option<TimeRange>,
    ) -> Vec<AlertEvent> {
        match self.events.lock() {
            Ok(log) => log
                .iter()
                .filter(|e| rule_id.map_or(true, |id| e.rule_id == id))
                .filter(|e| range.map_or(true, |r| r.contains(e.triggered_at)))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// Registered rules for persistence.
    pub fn export_rules(&self) -> Vec<AlertRule> {
        self.list_rules()
    }

    /// Re-register persisted rules. Machines restart Armed; alert state is
    /// deliberately not carried across restarts.
    pub fn restore_rules(&self, rules: Vec<AlertRule>) -> usize {
        let mut restored = 0;
        for rule in rules {
            if self.rules.contains_key(&rule.id) {
                continue;
            }
            self.rules.insert(rule.id, rule);
            restored += 1;
        }
        restored
    }
}
