// State Persistence
// JSON save and restore of bucket rings and alert rules across restarts

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts::AlertRule;
use crate::error::{PlentraError, PlentraResult};
use crate::store::PartitionRecord;

const STATE_VERSION: u32 = 1;

/// Everything the engine carries across a restart.
///
/// Deliberately excludes alert machine states, subscriber queues and the
/// derived cache: those rebuild from live traffic within seconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineState {
    pub version: u32,
    pub saved_at: i64,
    pub partitions: Vec<PartitionRecord>,
    pub rules: Vec<AlertRule>,
}

impl EngineState {
    pub fn new(saved_at: i64, partitions: Vec<PartitionRecord>, rules: Vec<AlertRule>) -> Self {
        Self {
            version: STATE_VERSION,
            saved_at,
            partitions,
            rules,
        }
    }
}

/// Write state to `path` atomically: serialize to a sibling temp file, then
/// rename over the target. A crash mid-save leaves the old file intact.
pub fn save(path: impl AsRef<Path>, state: &EngineState) -> PlentraResult<()> {
    let path = path.as_ref();
    let json = serde_json::to_vec(state)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    info!(
        path = %path.display(),
        partitions = state.partitions.len(),
        rules = state.rules.len(),
        "Engine state saved"
    );
    Ok(())
}

/// Load previously saved state. A missing file is a clean first start, not
/// an error; a version mismatch or corrupt file is.
pub fn load(path: impl AsRef<Path>) -> PlentraResult<Option<EngineState>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)?;
    let state: EngineState = serde_json::from_slice(&raw)?;
    if state.version != STATE_VERSION {
        return Err(PlentraError::persistence(format!(
            "unsupported state version {} in {}",
            state.version,
            path.display()
        )));
    }
    info!(
        path = %path.display(),
        partitions = state.partitions.len(),
        rules = state.rules.len(),
        "Engine state loaded"
    );
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IngestConfig, RetentionConfig};
    use crate::store::TimeSeriesStore;
    use crate::types::{FeedId, Tick};

    fn populated_store() -> TimeSeriesStore {
        let store = TimeSeriesStore::new(IngestConfig::default(), RetentionConfig::default());
        let tick = Tick {
            key: "PL/CEN/spot-price".parse().unwrap(),
            timestamp: 1_700_000_000_000,
            value: 50.0,
            volume: Some(10.0),
            source: FeedId::new("entsoe"),
        };
        store.ingest(&tick, tick.timestamp).unwrap();
        store
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = populated_store();
        let state = EngineState::new(1_700_000_000_000, store.export(), Vec::new());
        save(&path, &state).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.version, STATE_VERSION);
        assert_eq!(loaded.saved_at, 1_700_000_000_000);
        assert_eq!(loaded.partitions.len(), 1);

        let fresh = TimeSeriesStore::new(IngestConfig::default(), RetentionConfig::default());
        assert_eq!(fresh.restore(loaded.partitions).unwrap(), 1);
        assert_eq!(fresh.partition_count(), 1);
    }

    #[test]
    fn test_missing_file_is_clean_start() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path().join("nothing.json")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = EngineState::new(0, Vec::new(), Vec::new());
        state.version = 99;
        let json = serde_json::to_vec(&state).unwrap();
        std::fs::write(&path, json).unwrap();

        let error = load(&path).unwrap_err();
        assert!(matches!(error, PlentraError::Persistence { .. }));
    }

    #[test]
    fn test_save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        save(&path, &EngineState::new(1, Vec::new(), Vec::new())).unwrap();
        save(&path, &EngineState::new(2, Vec::new(), Vec::new())).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.saved_at, 2);
        // No temp file left behind
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
