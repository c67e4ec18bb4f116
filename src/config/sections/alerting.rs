use serde::{Deserialize, Serialize};

use crate::config::ConfigSection;
use crate::error::PlentraResult;

/// Defaults and bounds for the alert rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Cooldown applied when a rule does not specify one.
    pub default_cooldown_ms: i64,
    /// Hysteresis band applied when a rule does not specify one.
    pub default_hysteresis: f64,
    /// Oldest events are discarded past this bound.
    pub max_events_retained: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            default_cooldown_ms: 300_000,
            default_hysteresis: 0.0,
            max_events_retained: 10_000,
        }
    }
}

impl ConfigSection for AlertingConfig {
    const KEY: &'static str = "alerting";

    fn validate(&self) -> PlentraResult<()> {
        if self.default_cooldown_ms < 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "alerting.default_cooldown_ms",
                self.default_cooldown_ms.to_string(),
            ));
        }
        if self.default_hysteresis < 0.0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "alerting.default_hysteresis",
                self.default_hysteresis.to_string(),
            ));
        }
        if self.max_events_retained == 0 {
            crate::plentra_bail!(crate::plentra_error!(
                invalid_config_value,
                "alerting.max_events_retained",
                "0",
            ));
        }
        Ok(())
    }
}
