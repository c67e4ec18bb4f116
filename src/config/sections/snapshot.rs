use serde::{Deserialize, Serialize};

use crate::config::ConfigSection;
use crate::error::PlentraResult;

/// Snapshot construction and subscription fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Interval between snapshot builds.
    pub interval_ms: u64,
    /// Bounded per-subscriber queue; laggards observe a gap, never backpressure.
    pub subscriber_channel_capacity: usize,
    /// A feed silent beyond this marks its keys stale.
    pub staleness_bound_ms: i64,
    /// Trailing window used for the per-key derived values embedded in snapshots.
    pub derived_window_ms: i64,
    /// Budget for a single snapshot build before it is logged slow.
    pub build_budget_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            subscriber_channel_capacity: 64,
            staleness_bound_ms: 45_000,
            derived_window_ms: 3_600_000,
            build_budget_ms: 250,
        }
    }
}

impl ConfigSection for SnapshotConfig {
    const KEY: &'static str = "snapshot";

    fn validate(&self) -> PlentraResult<()> {
        if self.interval_ms == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "snapshot.interval_ms",
                "0",
            ));
        }
        if self.subscriber_channel_capacity == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "snapshot.subscriber_channel_capacity",
                "0",
            ));
        }
        if self.staleness_bound_ms <= 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "snapshot.staleness_bound_ms",
                self.staleness_bound_ms.to_string(),
            ));
        }
        if self.derived_window_ms <= 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "snapshot.derived_window_ms",
                self.derived_window_ms.to_string(),
            ));
        }
        Ok(())
    }
}
