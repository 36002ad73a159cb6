//! Read-only view of every target's state, plus the state file
//!
//! Each worker publishes its own entry after every check. Nothing else
//! writes to the board, so each key has a single writer.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::tracker::TargetState;

const STATE_FILE_VERSION: u32 = 1;

/// Latest published state per target
#[derive(Debug, Default)]
pub struct StatusBoard {
    states: DashMap<String, TargetState>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the board from a previously saved file
    pub fn with_states(states: HashMap<String, TargetState>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    /// Replace the entry for `target`
    pub fn publish(&self, target: &str, state: TargetState) {
        self.states.insert(target.to_string(), state);
    }

    pub fn get(&self, target: &str) -> Option<TargetState> {
        self.states.get(target).map(|s| s.clone())
    }

    pub fn remove(&self, target: &str) -> Option<TargetState> {
        self.states.remove(target).map(|(_, s)| s)
    }

    /// Drop entries whose names are not in `keep`
    pub fn retain_targets<'a>(&self, keep: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = keep.into_iter().collect();
        self.states.retain(|name, _| keep.contains(name.as_str()));
    }

    /// States for `names`, in that order, skipping unknown names
    pub fn snapshot<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<(String, TargetState)> {
        names
            .into_iter()
            .filter_map(|name| self.get(name).map(|s| (name.to_string(), s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Write all states to `path` as JSON
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let file = StateFile {
            version: STATE_FILE_VERSION,
            saved_at: Utc::now(),
            targets: self
                .states
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&file)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        // Write next to the destination, then rename over it
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read states from `path`. A missing file yields an empty map.
    pub fn load(path: &Path) -> Result<HashMap<String, TargetState>, SnapshotError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let file: StateFile = serde_json::from_slice(&data)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;
        if file.version != STATE_FILE_VERSION {
            return Err(SnapshotError::UnsupportedVersion(file.version));
        }
        Ok(file.targets)
    }
}

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    saved_at: DateTime<Utc>,
    targets: HashMap<String, TargetState>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unsupported state file version {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Status;

    fn down_state() -> TargetState {
        TargetState {
            status: Status::Down,
            last_notified: Some(Status::Down),
            last_transition: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[test]
    fn test_publish_and_snapshot_order() {
        let board = StatusBoard::new();
        board.publish("b", TargetState::default());
        board.publish("a", down_state());

        let snap = board.snapshot(["a", "missing", "b"]);
        let names: Vec<_> = snap.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snap[0].1.status, Status::Down);
    }

    #[test]
    fn test_retain_targets() {
        let board = StatusBoard::new();
        board.publish("a", TargetState::default());
        board.publish("b", TargetState::default());
        board.retain_targets(["b"]);
        assert!(board.get("a").is_none());
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let board = StatusBoard::new();
        board.publish("api", down_state());
        board.save(&path).unwrap();

        let loaded = StatusBoard::load(&path).unwrap();
        let api = loaded.get("api").unwrap();
        assert_eq!(api.status, Status::Down);
        assert_eq!(api.last_notified, Some(Status::Down));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StatusBoard::load(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            StatusBoard::load(&path),
            Err(SnapshotError::Deserialization(_))
        ));
    }
}
