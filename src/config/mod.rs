// Engine Configuration
// One immutable object threaded through component constructors

pub mod sections;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PlentraError, PlentraResult};
use crate::logging::LoggingConfig;
pub use sections::{AlertingConfig, IngestConfig, RetentionConfig, SnapshotConfig};

/// A validatable configuration section.
pub trait ConfigSection {
    const KEY: &'static str;

    fn validate(&self) -> PlentraResult<()>;
}

/// Complete engine configuration.
///
/// Loaded once at startup from TOML plus `PLENTRA_*` environment overrides
/// and passed to constructors; nothing here mutates at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub retention: RetentionConfig,
    pub alerting: AlertingConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Parse a TOML document and validate every section.
    pub fn from_toml_str(raw: &str) -> PlentraResult<Self> {
        let config: EngineConfig = toml::from_str(raw)
            .map_err(|e| PlentraError::configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> PlentraResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PlentraError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> PlentraResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> PlentraResult<()> {
        if let Ok(level) = std::env::var("PLENTRA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = env_i64("PLENTRA_LATENESS_WINDOW_MS")? {
            self.ingest.lateness_window_ms = value;
        }
        if let Some(value) = env_i64("PLENTRA_MAX_FUTURE_SKEW_MS")? {
            self.ingest.max_future_skew_ms = value;
        }
        if let Some(value) = env_i64("PLENTRA_SNAPSHOT_INTERVAL_MS")? {
            self.snapshot.interval_ms = value as u64;
        }
        if let Some(value) = env_i64("PLENTRA_STALENESS_BOUND_MS")? {
            self.snapshot.staleness_bound_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> PlentraResult<()> {
        self.ingest.validate()?;
        self.retention.validate()?;
        self.alerting.validate()?;
        self.snapshot.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn env_i64(name: &str) -> PlentraResult<Option<i64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| PlentraError::invalid_config_value(name, raw)),
        Err(_) => Ok(None),
    }
}
