// Core Types and Data Structures
// The canonical records every component of the engine speaks in

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PlentraError;

/// Markets the platform currently covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "PL")]
    Pl,
    #[serde(rename = "DE")]
    De,
    #[serde(rename = "CZ")]
    Cz,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Pl => "PL",
            Market::De => "DE",
            Market::Cz => "CZ",
        }
    }

    pub fn all() -> &'static [Market] {
        &[Market::Pl, Market::De, Market::Cz]
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = PlentraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PL" | "POLAND" | "PSE" => Ok(Market::Pl),
            "DE" | "GERMANY" | "DE-LU" => Ok(Market::De),
            "CZ" | "CZECHIA" | "CEPS" => Ok(Market::Cz),
            other => Err(PlentraError::malformed_tick(format!(
                "unknown market code: {other}"
            ))),
        }
    }
}

/// Immutable identity of one time series, e.g. `PL/CEN/spot-price`.
///
/// Uniquely addresses one store partition. Zone and metric are canonicalized
/// by the feed normalizer before a key is ever constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub market: Market,
    pub zone: String,
    pub metric: String,
}

impl MetricKey {
    pub fn new(market: Market, zone: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            market,
            zone: zone.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.market, self.zone, self.metric)
    }
}

impl FromStr for MetricKey {
    type Err = PlentraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(market), Some(zone), Some(metric), None)
                if !zone.is_empty() && !metric.is_empty() =>
            {
                Ok(MetricKey::new(market.parse()?, zone, metric))
            }
            _ => Err(PlentraError::malformed_tick(format!(
                "metric key must be market/zone/metric, got: {s}"
            ))),
        }
    }
}

/// Key pattern used by alert rules and subscription filters.
///
/// Each segment is either a literal or `*`. `PL/*/spot-price` matches the
/// spot price of every Polish zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPattern {
    pub market: Option<Market>,
    pub zone: Option<String>,
    pub metric: Option<String>,
}

impl KeyPattern {
    /// Pattern matching exactly one key.
    pub fn exact(key: &MetricKey) -> Self {
        Self {
            market: Some(key.market),
            zone: Some(key.zone.clone()),
            metric: Some(key.metric.clone()),
        }
    }

    /// Pattern matching every key.
    pub fn any() -> Self {
        Self {
            market: None,
            zone: None,
            metric: None,
        }
    }

    pub fn matches(&self, key: &MetricKey) -> bool {
        self.market.map_or(true, |m| m == key.market)
            && self.zone.as_ref().map_or(true, |z| *z == key.zone)
            && self.metric.as_ref().map_or(true, |m| *m == key.metric)
    }

    /// True when the pattern can only ever match a single key.
    pub fn is_exact(&self) -> bool {
        self.market.is_some() && self.zone.is_some() && self.metric.is_some()
    }

    /// True when the pattern matches every key.
    pub fn is_any(&self) -> bool {
        self.market.is_none() && self.zone.is_none() && self.metric.is_none()
    }
}

impl FromStr for KeyPattern {
    type Err = PlentraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(PlentraError::invalid_rule(format!(
                "key pattern must be market/zone/metric, got: {s}"
            )));
        }
        let market = match parts[0] {
            "*" => None,
            m => Some(m.parse()?),
        };
        let segment = |p: &str| {
            if p == "*" {
                None
            } else {
                Some(p.to_string())
            }
        };
        Ok(KeyPattern {
            market,
            zone: segment(parts[1]),
            metric: segment(parts[2]),
        })
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let star = "*".to_string();
        write!(
            f,
            "{}/{}/{}",
            self.market.map_or("*", |m| m.as_str()),
            self.zone.as_ref().unwrap_or(&star),
            self.metric.as_ref().unwrap_or(&star),
        )
    }
}

/// Identifier of an upstream feed connector (e.g. `entsoe`, `xbid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId(pub String);

impl FeedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One normalized observation. Immutable once created.
///
/// Timestamps are Unix milliseconds, values are in canonical units
/// (EUR/MWh for prices, MW for power).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub key: MetricKey,
    pub timestamp: i64,
    pub value: f64,
    pub volume: Option<f64>,
    pub source: FeedId,
}

/// Supported bucket resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "5s")]
    Seconds5,
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "15m")]
    Minutes15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Resolution {
    pub fn all() -> &'static [Resolution] {
        &[
            Resolution::Seconds5,
            Resolution::Minute1,
            Resolution::Minutes15,
            Resolution::Hour1,
            Resolution::Day1,
        ]
    }

    /// Interval length in milliseconds.
    pub fn interval_ms(&self) -> i64 {
        match self {
            Resolution::Seconds5 => 5_000,
            Resolution::Minute1 => 60_000,
            Resolution::Minutes15 => 900_000,
            Resolution::Hour1 => 3_600_000,
            Resolution::Day1 => 86_400_000,
        }
    }

    /// Align a timestamp down to the start of its interval.
    pub fn align(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.interval_ms())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Seconds5 => "5s",
            Resolution::Minute1 => "1m",
            Resolution::Minutes15 => "15m",
            Resolution::Hour1 => "1h",
            Resolution::Day1 => "1d",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate of ticks over one resolution interval.
///
/// Mutable only while open; the store freezes a bucket once its interval has
/// elapsed past the lateness window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: MetricKey,
    pub resolution: Resolution,
    pub start: i64,
    pub end: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_sum: f64,
    pub value_weighted_sum: f64,
    pub count: u64,
    pub frozen: bool,
}

impl Bucket {
    /// Open a new bucket seeded from the first tick of the interval.
    pub fn open_with(key: MetricKey, resolution: Resolution, tick: &Tick) -> Self {
        let start = resolution.align(tick.timestamp);
        let volume = tick.volume.unwrap_or(0.0);
        Self {
            key,
            resolution,
            start,
            end: start + resolution.interval_ms(),
            open: tick.value,
            high: tick.value,
            low: tick.value,
            close: tick.value,
            volume_sum: volume,
            value_weighted_sum: tick.value * volume,
            count: 1,
            frozen: false,
        }
    }

    /// Fold a subsequent tick of the same interval into the aggregate.
    pub fn apply(&mut self, tick: &Tick) {
        debug_assert!(!self.frozen, "apply on frozen bucket");
        let volume = tick.volume.unwrap_or(0.0);
        self.close = tick.value;
        self.high = f64::max(self.high, tick.value);
        self.low = f64::min(self.low, tick.value);
        self.volume_sum += volume;
        self.value_weighted_sum += tick.value * volume;
        self.count += 1;
    }

    /// True when `timestamp` falls inside this bucket's interval.
    pub fn covers(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Volume-weighted average price of this bucket alone.
    pub fn vwap(&self) -> Option<f64> {
        if self.volume_sum > 0.0 {
            Some(self.value_weighted_sum / self.volume_sum)
        } else {
            None
        }
    }
}

/// Half-open time range `[start, end)` in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).max(0)
    }
}
