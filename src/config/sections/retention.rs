use serde::{Deserialize, Serialize};

use crate::config::ConfigSection;
use crate::error::PlentraResult;
use crate::types::Resolution;

/// Rolling retention per bucket resolution.
///
/// Ring capacity for a resolution is its retention divided by its interval,
/// so eviction keeps exactly the trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Retention for 5s and 1m rings, in hours.
    pub high_resolution_hours: u32,
    /// Retention for 15m and 1h rings, in days.
    pub mid_resolution_days: u32,
    /// Retention for daily rings, in years.
    pub daily_years: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            high_resolution_hours: 24,
            mid_resolution_days: 30,
            daily_years: 5,
        }
    }
}

impl RetentionConfig {
    /// Retention window for a resolution, in milliseconds.
    pub fn retention_ms(&self, resolution: Resolution) -> i64 {
        const HOUR_MS: i64 = 3_600_000;
        const DAY_MS: i64 = 86_400_000;
        match resolution {
            Resolution::Seconds5 | Resolution::Minute1 => {
                i64::from(self.high_resolution_hours) * HOUR_MS
            }
            Resolution::Minutes15 | Resolution::Hour1 => {
                i64::from(self.mid_resolution_days) * DAY_MS
            }
            Resolution::Day1 => i64::from(self.daily_years) * 365 * DAY_MS,
        }
    }

    /// Number of buckets a ring holds for a resolution.
    pub fn ring_capacity(&self, resolution: Resolution) -> usize {
        (self.retention_ms(resolution) / resolution.interval_ms()).max(1) as usize
    }
}

impl ConfigSection for RetentionConfig {
    const KEY: &'static str = "retention";

    fn validate(&self) -> PlentraResult<()> {
        if self.high_resolution_hours == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "retention.high_resolution_hours",
                "0",
            ));
        }
        if self.mid_resolution_days == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "retention.mid_resolution_days",
                "0",
            ));
        }
        if self.daily_years == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "retention.daily_years",
                "0",
            ));
        }
        Ok(())
    }
}
