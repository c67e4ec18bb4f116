use serde::{Deserialize, Serialize};

use crate::config::ConfigSection;
use crate::error::PlentraResult;

/// Ingestion-path settings shared by the normalizer and the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Reject ticks whose timestamp is further ahead of the local clock.
    pub max_future_skew_ms: i64,
    /// Out-of-order ticks older than this are dropped as late.
    pub lateness_window_ms: i64,
    /// Ticks processed slower than this are accepted but logged as slow.
    pub slow_tick_budget_ms: u64,
    /// Tail of raw ticks kept per key for the recent-trades view.
    pub recent_ticks_per_key: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_future_skew_ms: 5_000,
            lateness_window_ms: 60_000,
            slow_tick_budget_ms: 50,
            recent_ticks_per_key: 50,
        }
    }
}

impl ConfigSection for IngestConfig {
    const KEY: &'static str = "ingest";

    fn validate(&self) -> PlentraResult<()> {
        if self.max_future_skew_ms < 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "ingest.max_future_skew_ms",
                self.max_future_skew_ms.to_string(),
            ));
        }
        if self.lateness_window_ms <= 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "ingest.lateness_window_ms",
                self.lateness_window_ms.to_string(),
            ));
        }
        if self.recent_ticks_per_key == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "ingest.recent_ticks_per_key",
                "0",
            ));
        }
        Ok(())
    }
}
