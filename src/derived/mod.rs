// Derived Metrics Engine
// Analytics computed over stored buckets, cached per store epoch

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PlentraResult;
use crate::store::TimeSeriesStore;
use crate::telemetry::{DERIVED_CACHE_HITS, DERIVED_CACHE_MISSES};
use crate::types::{Bucket, MetricKey, Resolution, TimeRange};

/// Derived metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivedKind {
    Vwap,
    Spread,
    ImbalanceDirection,
    Heatmap,
    Seasonality,
    ForwardEnvelope,
}

/// Which way the system imbalance points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImbalanceDirection {
    /// Positive net imbalance volume, system is long.
    Long,
    /// Negative net imbalance volume, system is short.
    Short,
    Balanced,
}

/// One (day, hour) cell of the intraday price heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    /// Start of the UTC day, Unix milliseconds.
    pub day_start: i64,
    pub hour: u32,
    pub mean: f64,
    pub samples: u64,
}

/// Median price for one (weekday, hour) slot over the trailing weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityCell {
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u32,
    pub hour: u32,
    pub median: f64,
    pub samples: u64,
}

/// Historical band around the latest forward quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    /// 10th percentile of historical closes.
    pub low: f64,
    /// 90th percentile of historical closes.
    pub high: f64,
    pub latest: f64,
    pub samples: u64,
}

/// Result of a derived computation. `NoData` is a value, not an error:
/// an empty window is a normal state for a young or idle key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DerivedValue {
    NoData,
    Scalar { value: f64 },
    Direction { direction: ImbalanceDirection },
    Heatmap { cells: Vec<HeatmapCell> },
    Seasonality { cells: Vec<SeasonalityCell> },
    Envelope { envelope: ForwardEnvelope },
}

/// One dispatchable generation unit offered into the merit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationUnit {
    pub name: String,
    pub capacity_mw: f64,
    /// Short-run marginal cost, EUR/MWh.
    pub marginal_cost: f64,
}

/// One step of the sorted supply stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeritOrderPoint {
    pub name: String,
    pub capacity_mw: f64,
    pub marginal_cost: f64,
    /// Total capacity up to and including this unit.
    pub cumulative_mw: f64,
    /// True for the unit that clears demand.
    pub marginal: bool,
}

/// Supply stack cleared against a demand level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeritOrder {
    pub stack: Vec<MeritOrderPoint>,
    pub demand_mw: f64,
    /// Marginal cost of the clearing unit; `None` under scarcity.
    pub clearing_price: Option<f64>,
}

/// Sort units by marginal cost and clear against demand.
///
/// Ties sort by name so the stack is deterministic. Demand beyond total
/// capacity leaves `clearing_price` empty; pricing scarcity is a market
/// rule, not an engine fact.
pub fn merit_order(units: &[GenerationUnit], demand_mw: f64) -> MeritOrder {
    let mut sorted: Vec<&GenerationUnit> = units.iter().filter(|u| u.capacity_mw > 0.0).collect();
    sorted.sort_by(|a, b| {
        a.marginal_cost
            .partial_cmp(&b.marginal_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut stack = Vec::with_capacity(sorted.len());
    let mut cumulative = 0.0;
    let mut clearing_price = None;
    for unit in sorted {
        cumulative += unit.capacity_mw;
        let marginal = clearing_price.is_none() && demand_mw > 0.0 && cumulative >= demand_mw;
        if marginal {
            clearing_price = Some(unit.marginal_cost);
        }
        stack.push(MeritOrderPoint {
            name: unit.name.clone(),
            capacity_mw: unit.capacity_mw,
            marginal_cost: unit.marginal_cost,
            cumulative_mw: cumulative,
            marginal,
        });
    }

    MeritOrder {
        stack,
        demand_mw,
        clearing_price,
    }
}

/// Volume-weighted average price over a bucket window. `None` when the
/// window carries no volume.
pub fn vwap(buckets: &[Bucket]) -> Option<f64> {
    let volume: f64 = buckets.iter().map(|b| b.volume_sum).sum();
    if volume > 0.0 {
        let weighted: f64 = buckets.iter().map(|b| b.value_weighted_sum).sum();
        Some(weighted / volume)
    } else {
        None
    }
}

/// Highest high minus lowest low over a bucket window.
pub fn spread(buckets: &[Bucket]) -> Option<f64> {
    let high = buckets.iter().map(|b| b.high).fold(f64::NAN, f64::max);
    let low = buckets.iter().map(|b| b.low).fold(f64::NAN, f64::min);
    if high.is_finite() && low.is_finite() {
        Some(high - low)
    } else {
        None
    }
}

/// Linear-interpolated percentile of an ascending slice.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = rank - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}

fn median(values: &mut Vec<f64>) -> Option<f64> {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile(values, 50.0)
}

/// Sign of the latest imbalance observation. The dead band keeps a
/// numerically balanced system from flapping between long and short.
pub fn imbalance_direction(value: f64, dead_band: f64) -> ImbalanceDirection {
    if value > dead_band {
        ImbalanceDirection::Long
    } else if value < -dead_band {
        ImbalanceDirection::Short
    } else {
        ImbalanceDirection::Balanced
    }
}

fn utc(timestamp_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp_ms)
}

/// Mean price per (UTC day, hour) cell, ordered by day then hour.
pub fn heatmap(buckets: &[Bucket]) -> Vec<HeatmapCell> {
    const DAY_MS: i64 = 86_400_000;
    let mut cells: Vec<HeatmapCell> = Vec::new();
    for bucket in buckets {
        let Some(when) = utc(bucket.start) else {
            continue;
        };
        let day_start = bucket.start - bucket.start.rem_euclid(DAY_MS);
        let hour = when.hour();
        match cells
            .iter_mut()
            .find(|c| c.day_start == day_start && c.hour == hour)
        {
            Some(cell) => {
                let total = cell.mean * cell.samples as f64 + bucket.close;
                cell.samples += 1;
                cell.mean = total / cell.samples as f64;
            }
            None => cells.push(HeatmapCell {
                day_start,
                hour,
                mean: bucket.close,
                samples: 1,
            }),
        }
    }
    cells.sort_by_key(|c| (c.day_start, c.hour));
    cells
}

/// Median close per (weekday, hour) slot. Slots without data are omitted.
pub fn seasonality(buckets: &[Bucket]) -> Vec<SeasonalityCell> {
    let mut slots: Vec<((u32, u32), Vec<f64>)> = Vec::new();
    for bucket in buckets {
        let Some(when) = utc(bucket.start) else {
            continue;
        };
        let slot = (when.weekday().num_days_from_monday(), when.hour());
        match slots.iter_mut().find(|(s, _)| *s == slot) {
            Some((_, values)) => values.push(bucket.close),
            None => slots.push((slot, vec![bucket.close])),
        }
    }

    let mut cells: Vec<SeasonalityCell> = slots
        .into_iter()
        .filter_map(|((weekday, hour), mut values)| {
            let samples = values.len() as u64;
            median(&mut values).map(|median| SeasonalityCell {
                weekday,
                hour,
                median,
                samples,
            })
        })
        .collect();
    cells.sort_by_key(|c| (c.weekday, c.hour));
    cells
}

/// 10th/90th percentile band of historical closes around the latest quote.
pub fn forward_envelope(buckets: &[Bucket]) -> Option<ForwardEnvelope> {
    let latest = buckets.last()?.close;
    let mut closes: Vec<f64> = buckets.iter().map(|b| b.close).collect();
    closes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(ForwardEnvelope {
        low: percentile(&closes, 10.0)?,
        high: percentile(&closes, 90.0)?,
        latest,
        samples: closes.len() as u64,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    key: MetricKey,
    kind: DerivedKind,
    range: TimeRange,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    epoch: u64,
    value: DerivedValue,
}

/// Computes derived metrics over the store, memoizing per key epoch.
///
/// A cached value is valid exactly until its key's partition changes; the
/// store bumps the epoch on every applied tick, freeze and eviction.
pub struct DerivedEngine {
    store: Arc<TimeSeriesStore>,
    cache: DashMap<CacheKey, CacheEntry>,
    /// Dead band for the imbalance direction signal, in canonical units.
    dead_band: f64,
}

impl DerivedEngine {
    pub fn new(store: Arc<TimeSeriesStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            dead_band: 1e-9,
        }
    }

    /// Compute (or serve from cache) one derived metric over a window.
    pub fn compute(
        &self,
        key: &MetricKey,
        kind: DerivedKind,
        range: TimeRange,
    ) -> PlentraResult<DerivedValue> {
        let epoch = self.store.epoch(key);
        let cache_key = CacheKey {
            key: key.clone(),
            kind,
            range,
        };

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.epoch == epoch {
                DERIVED_CACHE_HITS.inc();
                return Ok(entry.value.clone());
            }
        }
        DERIVED_CACHE_MISSES.inc();

        let value = self.compute_uncached(key, kind, range)?;
        debug!(key = %key, ?kind, "Derived metric recomputed");
        self.cache.insert(
            cache_key,
            CacheEntry {
                epoch,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    fn compute_uncached(
        &self,
        key: &MetricKey,
        kind: DerivedKind,
        range: TimeRange,
    ) -> PlentraResult<DerivedValue> {
        let value = match kind {
            DerivedKind::Vwap => {
                let buckets = self.window(key, range, window_resolution(range));
                match vwap(&buckets) {
                    Some(value) => DerivedValue::Scalar { value },
                    None => DerivedValue::NoData,
                }
            }
            DerivedKind::Spread => {
                let buckets = self.window(key, range, window_resolution(range));
                match spread(&buckets) {
                    Some(value) => DerivedValue::Scalar { value },
                    None => DerivedValue::NoData,
                }
            }
            DerivedKind::ImbalanceDirection => {
                match self.store.latest_any(key) {
                    Some(bucket) => DerivedValue::Direction {
                        direction: imbalance_direction(bucket.close, self.dead_band),
                    },
                    None => DerivedValue::NoData,
                }
            }
            DerivedKind::Heatmap => {
                let buckets = self.window(key, range, Resolution::Hour1);
                if buckets.is_empty() {
                    DerivedValue::NoData
                } else {
                    DerivedValue::Heatmap {
                        cells: heatmap(&buckets),
                    }
                }
            }
            DerivedKind::Seasonality => {
                let buckets = self.window(key, range, Resolution::Hour1);
                if buckets.is_empty() {
                    DerivedValue::NoData
                } else {
                    DerivedValue::Seasonality {
                        cells: seasonality(&buckets),
                    }
                }
            }
            DerivedKind::ForwardEnvelope => {
                let buckets = self.window(key, range, Resolution::Day1);
                match forward_envelope(&buckets) {
                    Some(envelope) => DerivedValue::Envelope { envelope },
                    None => DerivedValue::NoData,
                }
            }
        };
        Ok(value)
    }

    fn window(&self, key: &MetricKey, range: TimeRange, resolution: Resolution) -> Vec<Bucket> {
        self.store.query(key, resolution, range)
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Coarsest resolution that still gives a usefully dense series for the
/// window length.
fn window_resolution(range: TimeRange) -> Resolution {
    const HOUR_MS: i64 = 3_600_000;
    const DAY_MS: i64 = 86_400_000;
    match range.duration_ms() {
        d if d <= 2 * HOUR_MS => Resolution::Minute1,
        d if d <= 2 * DAY_MS => Resolution::Minutes15,
        d if d <= 60 * DAY_MS => Resolution::Hour1,
        _ => Resolution::Day1,
    }
}
