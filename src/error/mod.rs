// Error Handling Module
// Ingestion errors are contained at the tick, store invariants are fatal

use thiserror::Error;

/// Error taxonomy of the analytics engine.
///
/// Ingestion-path errors (`MalformedTick`, `LateTick`) never abort a feed
/// stream; they are logged, counted and dropped at the tick. Only
/// `StoreInvariantViolation` is fatal to a partition.
#[derive(Error, Debug, Clone)]
pub enum PlentraError {
    // Ingestion errors
    #[error("Malformed tick: {message}")]
    MalformedTick { message: String },

    #[error("Late tick for {key}: {age_ms}ms past the lateness window")]
    LateTick { key: String, age_ms: i64 },

    // Store errors
    #[error("Store invariant violated for {partition}: {message}")]
    StoreInvariantViolation { partition: String, message: String },

    #[error("Partition {partition} is poisoned and refuses writes")]
    PartitionPoisoned { partition: String },

    // Alerting errors
    #[error("Invalid alert rule: {message}")]
    InvalidRule { message: String },

    #[error("Rule {rule_id} not found")]
    RuleNotFound { rule_id: String },

    #[error("Rule {rule_id} evaluation failed: {message}")]
    RuleEval { rule_id: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidConfigValue { key: String, value: String },

    // System errors
    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlentraError {
    /// Create a malformed tick error
    pub fn malformed_tick<S: Into<String>>(message: S) -> Self {
        Self::MalformedTick {
            message: message.into(),
        }
    }

    /// Create a late tick error
    pub fn late_tick<S: Into<String>>(key: S, age_ms: i64) -> Self {
        Self::LateTick {
            key: key.into(),
            age_ms,
        }
    }

    /// Create a store invariant violation (fatal to the partition)
    pub fn store_invariant<P: Into<String>, M: Into<String>>(partition: P, message: M) -> Self {
        Self::StoreInvariantViolation {
            partition: partition.into(),
            message: message.into(),
        }
    }

    /// Create a poisoned partition error
    pub fn partition_poisoned<S: Into<String>>(partition: S) -> Self {
        Self::PartitionPoisoned {
            partition: partition.into(),
        }
    }

    /// Create an invalid rule error
    pub fn invalid_rule<S: Into<String>>(message: S) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Create a rule not found error
    pub fn rule_not_found<S: Into<String>>(rule_id: S) -> Self {
        Self::RuleNotFound {
            rule_id: rule_id.into(),
        }
    }

    /// Create a rule evaluation error
    pub fn rule_eval<R: Into<String>, M: Into<String>>(rule_id: R, message: M) -> Self {
        Self::RuleEval {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_config_value<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self::InvalidConfigValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedTick { .. } | Self::LateTick { .. } => "ingest",
            Self::StoreInvariantViolation { .. } | Self::PartitionPoisoned { .. } => "store",
            Self::InvalidRule { .. } | Self::RuleNotFound { .. } | Self::RuleEval { .. } => {
                "alerting"
            }
            Self::Configuration { .. } | Self::InvalidConfigValue { .. } => "configuration",
            Self::Persistence { .. } | Self::Serialization { .. } | Self::Internal { .. } => {
                "general"
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence { .. } => true,

            Self::MalformedTick { .. }
            | Self::LateTick { .. }
            | Self::StoreInvariantViolation { .. }
            | Self::PartitionPoisoned { .. }
            | Self::InvalidRule { .. }
            | Self::RuleNotFound { .. }
            | Self::RuleEval { .. }
            | Self::Configuration { .. }
            | Self::InvalidConfigValue { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Get severity level for logging
    pub fn severity(&self) -> tracing::Level {
        match self {
            // Fatal partition conditions must reach the operator
            Self::StoreInvariantViolation { .. } | Self::PartitionPoisoned { .. } => {
                tracing::Level::ERROR
            }

            Self::RuleEval { .. } | Self::Persistence { .. } => tracing::Level::WARN,

            Self::MalformedTick { .. }
            | Self::LateTick { .. }
            | Self::InvalidRule { .. }
            | Self::RuleNotFound { .. }
            | Self::Configuration { .. }
            | Self::InvalidConfigValue { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => tracing::Level::DEBUG,
        }
    }

    /// True for conditions that must stop writes to the affected partition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreInvariantViolation { .. } | Self::PartitionPoisoned { .. }
        )
    }
}

/// Convert anyhow::Error to PlentraError
impl From<anyhow::Error> for PlentraError {
    fn from(error: anyhow::Error) -> Self {
        PlentraError::internal(error.to_string())
    }
}

/// Convert std::io::Error to PlentraError
impl From<std::io::Error> for PlentraError {
    fn from(error: std::io::Error) -> Self {
        PlentraError::persistence(error.to_string())
    }
}

/// Convert serde_json::Error to PlentraError
impl From<serde_json::Error> for PlentraError {
    fn from(error: serde_json::Error) -> Self {
        PlentraError::serialization(error.to_string())
    }
}

/// Result type alias for convenience
pub type PlentraResult<T> = Result<T, PlentraError>;

/// Macro for creating errors with context
#[macro_export]
macro_rules! plentra_error {
    ($variant:ident $(, $arg:expr)* $(,)?) => {
        $crate::error::PlentraError::$variant($($arg),*)
    };
}

/// Macro for early return with error logging
#[macro_export]
macro_rules! plentra_bail {
    ($error:expr) => {{
        let error = $error;
        match error.severity() {
            tracing::Level::ERROR => tracing::error!(error = %error, "Operation failed"),
            tracing::Level::WARN => tracing::warn!(error = %error, "Operation failed"),
            tracing::Level::INFO => tracing::info!(error = %error, "Operation failed"),
            tracing::Level::DEBUG => tracing::debug!(error = %error, "Operation failed"),
            tracing::Level::TRACE => tracing::trace!(error = %error, "Operation failed"),
        }
        return Err(error);
    }};
}
