//! Sync checkpoint / 同步检查点
//!
//! A tiny JSON file storing where the incremental claim sync left off.
//! Field names are fixed; existing checkpoint files keep working across
//! deployments.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Durable cursor of the claim sync / 声明同步的持久游标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// When the pass currently in progress started / 本轮开始时间
    #[serde(rename = "StartSyncTime")]
    pub start_sync_time: DateTime<Utc>,
    /// Lower bound on `modified_at` for the next batch / 下批的修改时间下界
    #[serde(rename = "LastSyncTime")]
    pub last_sync_time: DateTime<Utc>,
    /// Highest row id already processed, 0 between passes / 已处理的最大行id
    #[serde(rename = "LastID")]
    pub last_id: u64,
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            start_sync_time: epoch(),
            last_sync_time: epoch(),
            last_id: 0,
        }
    }
}

impl SyncState {
    /// A fresh state or a state between passes restarts from id 0
    pub fn is_between_passes(&self) -> bool {
        self.last_id == 0
    }

    /// Load the checkpoint, treating a missing file as a fresh start
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync state {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse sync state {:?}", path))
    }

    /// Persist the checkpoint, creating the state directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("failed to serialize sync state")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write sync state {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncstate.json");
        let state = SyncState::load(&path).unwrap();
        assert_eq!(state, SyncState::default());
        assert!(state.is_between_passes());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("syncstate.json");
        let state = SyncState {
            start_sync_time: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            last_sync_time: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
            last_id: 42,
        };
        state.save(&path).unwrap();
        assert_eq!(SyncState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_checkpoint_field_names() {
        let state = SyncState {
            last_id: 7,
            ..SyncState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("StartSyncTime").is_some());
        assert!(json.get("LastSyncTime").is_some());
        assert_eq!(json["LastID"], 7);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncstate.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(SyncState::load(&path).is_err());
    }
}
