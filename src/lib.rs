// Plentra Analytics Engine - Core Library
// Streaming market analytics and alerting behind the trading dashboard

pub mod alerts;
pub mod config;
pub mod derived;
pub mod engine;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod persist;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use alerts::{AlertEngine, AlertEvent, AlertRule, CompareOp, RuleSpec, RuleState};
pub use config::EngineConfig;
pub use derived::{DerivedEngine, DerivedKind, DerivedValue, GenerationUnit, MeritOrder};
pub use engine::AnalyticsEngine;
pub use error::{PlentraError, PlentraResult};
pub use logging::LoggingConfig;
pub use normalizer::{FeedConnector, FeedNormalizer, RawFeedMessage};
pub use snapshot::{
    FeedHealth, FeedHealthTracker, Snapshot, SnapshotDelta, SnapshotService,
    SnapshotSubscription, StreamMessage,
};
pub use store::TimeSeriesStore;
pub use types::{Bucket, FeedId, KeyPattern, Market, MetricKey, Resolution, Tick, TimeRange};
