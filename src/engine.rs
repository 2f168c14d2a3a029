//! Application context owning every per-branch component.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::backup::{Backup, BackupLocks, BackupStore};
use crate::checkpoint::Checkpointer;
use crate::config::Config;
use crate::error::Result;
use crate::key::DatabaseKey;
use crate::restore::{restore_from_timestamp, RestoreSource};
use crate::rollback::RollbackLogger;
use crate::snapshot::{RestorePoint, SnapshotLogger, SnapshotSummary};
use crate::storage::{FileSystem, LocalFileSystem, PageRangeStore};
use crate::timestamp::Timestamp;

/// The page store and logs of one database branch.
pub struct Branch {
    key: DatabaseKey,
    store: Arc<PageRangeStore>,
    rollback: Arc<RollbackLogger>,
    snapshots: Arc<SnapshotLogger>,
    checkpointer: Checkpointer,
}

impl Branch {
    /// Opens the components of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page store cannot be opened.
    pub fn open(fs: Arc<dyn FileSystem>, config: &Config, key: DatabaseKey) -> Result<Self> {
        let store = Arc::new(PageRangeStore::open(Arc::clone(&fs), config, key.clone())?);
        let rollback = Arc::new(RollbackLogger::new(Arc::clone(&fs), config, key.clone()));
        let snapshots = Arc::new(SnapshotLogger::new(fs, config, key.clone()));
        let checkpointer =
            Checkpointer::new(Arc::clone(&store), Arc::clone(&rollback), Arc::clone(&snapshots));

        Ok(Self {
            key,
            store,
            rollback,
            snapshots,
            checkpointer,
        })
    }

    /// Returns the branch key.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the page store.
    #[must_use]
    pub fn store(&self) -> &Arc<PageRangeStore> {
        &self.store
    }

    /// Returns the rollback logger.
    #[must_use]
    pub fn rollback(&self) -> &Arc<RollbackLogger> {
        &self.rollback
    }

    /// Returns the snapshot logger.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<SnapshotLogger> {
        &self.snapshots
    }

    /// Writes a checkpoint batch. See [`Checkpointer::checkpoint`].
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub fn checkpoint(
        &self,
        timestamp: Timestamp,
        pages: &[(u32, Vec<u8>)],
        page_count: u32,
    ) -> Result<RestorePoint> {
        self.checkpointer.checkpoint(timestamp, pages, page_count)
    }

    /// Returns the branch as a restore source.
    #[must_use]
    pub fn as_restore_source(&self) -> RestoreSource<'_> {
        RestoreSource {
            store: &self.store,
            rollback: &self.rollback,
            snapshots: &self.snapshots,
        }
    }

    /// Closes the logs of the branch.
    pub fn close(&self) {
        self.rollback.close();
        self.snapshots.close();
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Shared context: configuration, file system, backup locks and the open
/// branches.
pub struct Engine {
    config: Config,
    fs: Arc<dyn FileSystem>,
    backups: BackupStore,
    branches: Mutex<HashMap<DatabaseKey, Arc<Branch>>>,
}

impl Engine {
    /// Creates an engine over the local file system.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_file_system(config, Arc::new(LocalFileSystem::new()))
    }

    /// Creates an engine over `fs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_file_system(config: Config, fs: Arc<dyn FileSystem>) -> Result<Self> {
        config.validate()?;
        let locks = Arc::new(BackupLocks::new(config.backup_lock_idle_timeout));
        let backups = BackupStore::new(Arc::clone(&fs), &config, locks);

        Ok(Self {
            config,
            fs,
            backups,
            branches: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the file system.
    #[must_use]
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns the backup store.
    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Returns the branch of `key`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch cannot be opened.
    pub fn branch(&self, key: &DatabaseKey) -> Result<Arc<Branch>> {
        let mut branches = self.branches.lock();
        if let Some(branch) = branches.get(key) {
            return Ok(Arc::clone(branch));
        }

        let branch = Arc::new(Branch::open(Arc::clone(&self.fs), &self.config, key.clone())?);
        branches.insert(key.clone(), Arc::clone(&branch));
        Ok(branch)
    }

    /// Writes a backup of `key` as of `timestamp`.
    ///
    /// # Errors
    ///
    /// See [`BackupStore::run`].
    pub fn backup(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<Backup> {
        let branch = self.branch(key)?;
        self.backups
            .run(branch.store(), branch.rollback(), branch.snapshots(), timestamp)
    }

    /// Returns the backup of `key` at restore point `timestamp`.
    ///
    /// # Errors
    ///
    /// See [`BackupStore::get_backup`].
    pub fn get_backup(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<Backup> {
        self.backups.get_backup(key, timestamp)
    }

    /// Lists the backups of `key`.
    ///
    /// # Errors
    ///
    /// See [`BackupStore::list`].
    pub fn list_backups(&self, key: &DatabaseKey) -> Result<Vec<Backup>> {
        self.backups.list(key)
    }

    /// Deletes the backup of `key` at restore point `timestamp`.
    ///
    /// # Errors
    ///
    /// See [`BackupStore::delete`].
    pub fn delete_backup(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<()> {
        self.backups.delete(key, timestamp)
    }

    /// Restores `target` to the state of `source` at `timestamp`, then runs
    /// `on_complete`.
    ///
    /// # Errors
    ///
    /// See [`restore_from_timestamp`].
    pub fn restore<T>(
        &self,
        source: &DatabaseKey,
        target: &DatabaseKey,
        timestamp: Timestamp,
        on_complete: impl FnOnce(&RestorePoint) -> Result<T>,
    ) -> Result<T> {
        let source = self.branch(source)?;
        let target = self.branch(target)?;
        restore_from_timestamp(
            source.as_restore_source(),
            target.store(),
            timestamp,
            on_complete,
        )
    }

    /// Lists the snapshots of `key`, optionally with their restore points.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be read.
    pub fn snapshots(&self, key: &DatabaseKey, with_restore_points: bool) -> Result<Vec<SnapshotSummary>> {
        let branch = self.branch(key)?;
        let snapshots = if with_restore_points {
            branch.snapshots().get_snapshots_with_restore_points()?
        } else {
            branch.snapshots().get_snapshots()?
        };
        Ok(snapshots.iter().map(|snapshot| snapshot.summary()).collect())
    }

    /// Returns the snapshot of the day containing `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RewindError::RestorePointNotFound`] if nothing was
    /// recorded that day.
    pub fn snapshot(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<SnapshotSummary> {
        let branch = self.branch(key)?;
        Ok(branch.snapshots().get_snapshot(timestamp)?.summary())
    }

    /// Closes every open branch.
    pub fn close(&self) {
        let mut branches = self.branches.lock();
        for branch in branches.values() {
            branch.close();
        }
        info!(branches = branches.len(), "engine closed");
        branches.clear();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_branch_is_cached() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(Config::new(temp.path())).unwrap();
        let key = DatabaseKey::new("db", "main").unwrap();

        let a = engine.branch(&key).unwrap();
        let b = engine.branch(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp = TempDir::new().unwrap();
        let config = Config::new(temp.path()).with_page_size(1000);
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_snapshot_listing() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(Config::new(temp.path()).with_page_size(512)).unwrap();
        let key = DatabaseKey::new("db", "main").unwrap();
        let branch = engine.branch(&key).unwrap();

        branch.checkpoint(10, &[(1, vec![1u8; 512])], 1).unwrap();
        branch.checkpoint(20, &[], 1).unwrap();

        let listed = engine.snapshots(&key, true).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].restore_points.as_ref().unwrap().total, 2);

        let summary = engine.snapshot(&key, 15).unwrap();
        assert_eq!(summary.timestamp, 0);

        engine.close();
    }
}
