mod alerting;
mod ingest;
mod retention;
mod snapshot;

pub use alerting::AlertingConfig;
pub use ingest::IngestConfig;
pub use retention::RetentionConfig;
pub use snapshot::SnapshotConfig;
