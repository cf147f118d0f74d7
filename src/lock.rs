//! Durable execution lock with staleness-based takeover.
//!
//! At most one run should be driving the workbench at a time, including
//! across process restarts and accidental duplicate invocations. The lock is
//! a JSON file holding the acquisition time and an owner token; an instance
//! resuming after a known restart force-acquires, and anyone may take over a
//! lock older than five minutes.
//!
//! This is a best-effort guard, not a consensus protocol: storage is
//! last-write-wins and the staleness window is the only conflict-resolution
//! mechanism. Storage failures are treated as "lock available" so a broken
//! state directory cannot deadlock the tool.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// A lock older than this is considered abandoned and may be taken over.
pub const LOCK_STALE_AFTER: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub acquired_at: DateTime<Utc>,
    pub owner: String,
}

pub struct ExecutionLock {
    lock_file: PathBuf,
    owner: String,
}

impl ExecutionLock {
    pub fn new(lock_file: PathBuf) -> Self {
        Self {
            lock_file,
            owner: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Attempt to acquire the lock. With `force` set (a fresh process
    /// resuming a previously-owned run) any existing lock is overwritten.
    /// Otherwise a fresh lock belonging to someone else wins and this
    /// returns `false`; a stale one is taken over with a logged warning.
    pub fn try_acquire(&self, force: bool) -> bool {
        match self.read_record() {
            Ok(Some(existing)) => {
                let age = Utc::now() - existing.acquired_at;
                if force {
                    tracing::info!("force-acquiring execution lock (resume after restart)");
                } else if age >= LOCK_STALE_AFTER {
                    warn!(
                        held_secs = age.num_seconds(),
                        "taking over stale execution lock"
                    );
                } else {
                    warn!(
                        held_secs = age.num_seconds(),
                        owner = %existing.owner,
                        "execution lock held by another instance"
                    );
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Fail open: a broken state directory must not wedge the tool.
                warn!("failed to read execution lock ({e}); proceeding");
            }
        }
        self.write_record();
        true
    }

    /// Age of the currently persisted lock, if any. Used by `status`.
    pub fn current_age(&self) -> Option<Duration> {
        self.read_record()
            .ok()
            .flatten()
            .map(|record| Utc::now() - record.acquired_at)
    }

    /// Delete the persisted lock. Idempotent; errors are swallowed for the
    /// same fail-open reason as acquisition.
    pub fn release(&self) {
        if self.lock_file.exists()
            && let Err(e) = fs::remove_file(&self.lock_file)
        {
            warn!("failed to release execution lock: {e}");
        }
    }

    fn read_record(&self) -> std::io::Result<Option<LockRecord>> {
        if !self.lock_file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.lock_file)?;
        Ok(serde_json::from_str(&content).ok())
    }

    fn write_record(&self) {
        let record = LockRecord {
            acquired_at: Utc::now(),
            owner: self.owner.clone(),
        };
        if let Some(parent) = self.lock_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.lock_file, json) {
                    warn!("failed to write execution lock ({e}); proceeding unlocked");
                }
            }
            Err(e) => warn!("failed to serialize execution lock: {e}"),
        }
    }
}
