//! Per-branch backup lock table.
//!
//! At most one backup runs per database branch. Acquisition never blocks:
//! a second attempt fails with [`RewindError::BackupInProgress`]. Entries
//! for branches that have not backed up recently are dropped on the next
//! acquisition so the table does not grow without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::DEFAULT_IDLE_TIMEOUT;
use crate::error::{Result, RewindError};
use crate::key::DatabaseKey;

#[derive(Debug)]
struct LockEntry {
    held: bool,
    last_used: Instant,
}

/// Table of backup locks keyed by database hash.
#[derive(Debug)]
pub struct BackupLocks {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
    idle_timeout: Duration,
}

impl BackupLocks {
    /// Creates a table that forgets unheld entries idle longer than
    /// `idle_timeout`.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Takes the backup lock of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::BackupInProgress`] if the lock is held.
    pub fn try_acquire(&self, key: &DatabaseKey) -> Result<BackupLockGuard> {
        let hash = key.hash();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let idle_timeout = self.idle_timeout;
        entries.retain(|_, entry| entry.held || now.duration_since(entry.last_used) <= idle_timeout);

        let entry = entries.entry(hash.clone()).or_insert(LockEntry {
            held: false,
            last_used: now,
        });
        if entry.held {
            return Err(RewindError::BackupInProgress(key.to_string()));
        }
        entry.held = true;
        entry.last_used = now;

        Ok(BackupLockGuard {
            entries: Arc::clone(&self.entries),
            hash,
        })
    }

    /// Returns true if a backup of `key` is running.
    #[must_use]
    pub fn is_held(&self, key: &DatabaseKey) -> bool {
        self.entries
            .lock()
            .get(&key.hash())
            .is_some_and(|entry| entry.held)
    }

    /// Returns the number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entry is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for BackupLocks {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

/// Releases a backup lock when dropped.
#[derive(Debug)]
pub struct BackupLockGuard {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
    hash: String,
}

impl Drop for BackupLockGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.entries.lock().get_mut(&self.hash) {
            entry.held = false;
            entry.last_used = Instant::now();
        }
    }
}
