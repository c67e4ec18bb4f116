// Structured Logging Configuration
// tracing-subscriber setup shared by services and tests

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{PlentraError, PlentraResult};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: String,
    /// Whether to include target module names
    pub include_targets: bool,
    /// Whether to enable ANSI colors in output
    pub enable_colors: bool,
    /// Environment filter override (takes precedence over `level`)
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_targets: false,
            enable_colors: true,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> PlentraResult<()> {
        self.level.parse::<tracing::Level>().map_err(|_| {
            PlentraError::invalid_config_value("logging.level", self.level.clone())
        })?;
        self.format.parse::<LogFormat>()?;
        Ok(())
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => EnvFilter::new(filter),
            None => EnvFilter::new(format!("plentra={}", self.level)),
        }
    }

    /// Initialize the global subscriber. Safe to call once per process;
    /// re-initialization errors are swallowed so tests can share a runtime.
    pub fn init(&self) -> PlentraResult<()> {
        let builder = fmt()
            .with_env_filter(self.filter())
            .with_target(self.include_targets)
            .with_ansi(self.enable_colors);

        let result = match self.format.parse::<LogFormat>()? {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
        };
        // A second init in the same process is not an error worth surfacing.
        let _ = result;
        Ok(())
    }
}

/// Logging format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = PlentraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(PlentraError::configuration(format!(
                "Invalid log format: {s}. Valid options: json, pretty, compact"
            ))),
        }
    }
}
