// Feed Normalizer
// Heterogeneous connector payloads in, canonical ticks out

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IngestConfig;
use crate::error::{PlentraError, PlentraResult};
use crate::telemetry::{TICKS_MALFORMED, TICKS_NORMALIZED};
use crate::types::{FeedId, Market, MetricKey, Tick};

/// Raw message as delivered by a feed connector, before canonicalization.
///
/// Connectors only promise the shape; market/zone/metric codes and units
/// arrive in whatever dialect the upstream speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeedMessage {
    pub market: String,
    pub zone: String,
    pub metric: String,
    pub timestamp: i64,
    pub value: f64,
    pub unit: String,
    pub volume: Option<f64>,
}

/// A pull-based upstream feed connector.
///
/// Implementations wrap whatever protocol the upstream speaks and hand raw
/// messages to the engine. An empty batch is a valid keepalive.
#[async_trait]
pub trait FeedConnector: Send {
    fn id(&self) -> FeedId;

    /// Await the next batch of raw messages.
    async fn poll(&mut self) -> PlentraResult<Vec<RawFeedMessage>>;
}

/// Stateless normalizer; safe to call concurrently from every connector.
///
/// Lookup tables are static, the only state is the immutable ingest config.
#[derive(Debug, Clone)]
pub struct FeedNormalizer {
    config: IngestConfig,
}

impl FeedNormalizer {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Normalize one raw message into a canonical tick.
    ///
    /// Fails with `MalformedTick` on unknown codes, non-finite numbers or a
    /// timestamp further than `max_future_skew_ms` ahead of `now_ms`. The
    /// caller logs and drops; the error never propagates to the feed.
    pub fn normalize(&self, source: &FeedId, raw: &RawFeedMessage, now_ms: i64) -> PlentraResult<Tick> {
        let result = self.normalize_inner(source, raw, now_ms);
        match &result {
            Ok(tick) => {
                TICKS_NORMALIZED.with_label_values(&[source.as_str()]).inc();
                debug!(key = %tick.key, value = tick.value, "Tick normalized");
            }
            Err(error) => {
                TICKS_MALFORMED.with_label_values(&[source.as_str()]).inc();
                debug!(feed = %source, error = %error, "Raw message dropped");
            }
        }
        result
    }

    fn normalize_inner(
        &self,
        source: &FeedId,
        raw: &RawFeedMessage,
        now_ms: i64,
    ) -> PlentraResult<Tick> {
        if raw.timestamp <= 0 {
            return Err(PlentraError::malformed_tick(format!(
                "non-positive timestamp: {}",
                raw.timestamp
            )));
        }
        if raw.timestamp > now_ms + self.config.max_future_skew_ms {
            return Err(PlentraError::malformed_tick(format!(
                "timestamp {}ms ahead of local clock",
                raw.timestamp - now_ms
            )));
        }
        if !raw.value.is_finite() {
            return Err(PlentraError::malformed_tick("non-finite value"));
        }
        if let Some(volume) = raw.volume {
            if !volume.is_finite() || volume < 0.0 {
                return Err(PlentraError::malformed_tick(format!(
                    "invalid volume: {volume}"
                )));
            }
        }

        let market: Market = raw.market.parse()?;
        let zone = canonical_zone(market, &raw.zone)?;
        let metric = canonical_metric(&raw.metric)?;
        let value = raw.value * unit_factor(&raw.unit)?;

        Ok(Tick {
            key: MetricKey::new(market, zone, metric),
            timestamp: raw.timestamp,
            value,
            volume: raw.volume,
            source: source.clone(),
        })
    }
}

/// Canonical zone code: known TSO aliases are mapped, anything else must
/// already be a short uppercase code.
fn canonical_zone(market: Market, raw: &str) -> PlentraResult<String> {
    let upper = raw.trim().to_uppercase();
    let canonical = match (market, upper.as_str()) {
        (Market::Pl, "PL-CEN" | "CENTRAL" | "PSE") => "CEN",
        (Market::De, "TENNET") => "TEN",
        (Market::De, "AMPRION") => "AMP",
        (Market::De, "50HERTZ" | "50HZ") => "HER",
        (Market::De, "TRANSNETBW") => "TRA",
        (Market::Cz, "CEPS") => "CEN",
        _ => {
            if upper.is_empty()
                || upper.len() > 8
                || !upper.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(PlentraError::malformed_tick(format!(
                    "unrecognized zone code: {raw}"
                )));
            }
            return Ok(upper);
        }
    };
    Ok(canonical.to_string())
}

/// Canonical metric name: dialect aliases first, then a lowercase-dashed
/// fallback for names already in the canonical family.
fn canonical_metric(raw: &str) -> PlentraResult<String> {
    let upper = raw.trim().to_uppercase();
    let canonical = match upper.as_str() {
        "SPOT" | "SPOT_PRICE" | "SPOT-PRICE" => "spot-price",
        "DA" | "DAY_AHEAD" | "DAY-AHEAD-PRICE" | "DAYAHEAD" => "day-ahead-price",
        "NIV" | "IMBALANCE" | "IMBALANCE_PRICE" | "IMBALANCE-PRICE" => "imbalance-price",
        "IMBALANCE_VOLUME" | "IMBALANCE-VOLUME" => "imbalance-volume",
        "FCR" | "FCR_PRICE" | "FCR-PRICE" => "fcr-price",
        "AFRR" | "AFRR_PRICE" | "AFRR-PRICE" => "afrr-price",
        "MFRR" | "MFRR_PRICE" | "MFRR-PRICE" => "mfrr-price",
        "DEMAND" | "LOAD" => "demand-mw",
        "WIND" => "gen-wind-mw",
        "SOLAR" => "gen-solar-mw",
        "GAS" => "gen-gas-mw",
        "COAL" => "gen-coal-mw",
        "NUCLEAR" => "gen-nuclear-mw",
        "HYDRO" => "gen-hydro-mw",
        _ => {
            let lowered = raw.trim().to_lowercase().replace('_', "-");
            if lowered.is_empty()
                || !lowered
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(PlentraError::malformed_tick(format!(
                    "unrecognized metric name: {raw}"
                )));
            }
            return Ok(lowered);
        }
    };
    Ok(canonical.to_string())
}

/// Multiplier into canonical units (EUR/MWh for prices, MW for power).
fn unit_factor(raw: &str) -> PlentraResult<f64> {
    let normalized = raw.trim().to_uppercase().replace(' ', "");
    match normalized.as_str() {
        "EUR/MWH" | "EURMWH" | "" => Ok(1.0),
        "CT/KWH" | "CTKWH" => Ok(10.0),
        "EUR/KWH" => Ok(1_000.0),
        "MW" => Ok(1.0),
        "GW" => Ok(1_000.0),
        "KW" => Ok(0.001),
        other => Err(PlentraError::malformed_tick(format!(
            "unrecognized unit: {other}"
        ))),
    }
}
