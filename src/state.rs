//! Durable run-state persistence.
//!
//! The progression controller checkpoints its progress here before any
//! action that restarts the process, and a fresh process reads it back at
//! startup to decide whether to resume. Storage is a single JSON file; the
//! store does no validation beyond well-formedness — callers own the
//! invariants.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Progress record for a multi-stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub enabled: bool,
    pub start_time: DateTime<Utc>,
    pub completed_stages: u32,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            enabled: true,
            start_time: Utc::now(),
            completed_stages: 0,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunStateStore {
    state_file: PathBuf,
}

impl RunStateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to serialize run state")?;
        fs::write(&self.state_file, json).context("Failed to write run state")?;
        Ok(())
    }

    /// Load the persisted state, or `None` if absent or unreadable. A
    /// corrupt file is treated as absent rather than fatal; the next save
    /// overwrites it.
    pub fn load(&self) -> Option<RunState> {
        let content = fs::read_to_string(&self.state_file).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn clear(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove run state file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (RunStateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        (RunStateStore::new(path), dir)
    }

    #[test]
    fn test_load_absent_returns_none() {
        let (store, _dir) = make_store();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (store, _dir) = make_store();
        let mut state = RunState::new();
        state.completed_stages = 3;
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.completed_stages, 3);
        assert_eq!(loaded.start_time, state.start_time);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, _dir) = make_store();
        store.save(&RunState::new()).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_treated_as_absent() {
        let (store, _dir) = make_store();
        fs::write(&store.state_file, "not json{").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_survives_store_recreation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_state.json");

        {
            let store = RunStateStore::new(path.clone());
            let mut state = RunState::new();
            state.completed_stages = 7;
            store.save(&state).unwrap();
        }

        {
            let store = RunStateStore::new(path);
            assert_eq!(store.load().unwrap().completed_stages, 7);
        }
    }
}
