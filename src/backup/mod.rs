//! Historical backups.
//!
//! A backup is the database image of a branch as of a restore point,
//! rebuilt from the current page ranges and the reverse delta, and stored
//! as size-bounded part files plus a manifest:
//!
//! ```text
//! <data_dir>/backups/<database_id>/<branch_id>/<key>/<key>-00000
//! <data_dir>/backups/<database_id>/<branch_id>/<key>/<key>-00001
//! <data_dir>/backups/<database_id>/<branch_id>/<key>/manifest
//! ```
//!
//! `<key>` is the hex SHA-1 of the database id, branch id and restore point
//! timestamp.

mod lock;
mod manifest;
mod parts;

pub use lock::{BackupLockGuard, BackupLocks};
pub use manifest::{BackupManifest, BackupPart, MANIFEST_FILE_NAME, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use parts::{part_name, read_part, PartWriter};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::delta::{reconstruct_range, ReverseDelta};
use crate::error::{Result, RewindError};
use crate::key::DatabaseKey;
use crate::rollback::RollbackLogger;
use crate::snapshot::{RestorePoint, SnapshotLogger};
use crate::storage::page::ranges_for_pages;
use crate::storage::{FileSystem, PageRangeStore};
use crate::timestamp::Timestamp;

/// Suffix of the directory a backup is written to before it is installed.
const STAGING_SUFFIX: &str = "tmp";

/// Suffix a replaced backup is moved to while its successor is installed.
const RETIRED_SUFFIX: &str = "old";

fn sibling(directory: &Path, suffix: &str) -> PathBuf {
    let mut name = directory.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// A completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Branch the backup was taken from.
    pub key: DatabaseKey,
    /// State the backup captures.
    pub restore_point: RestorePoint,
    /// Upper bound on part size.
    pub max_part_size: u64,
    /// Total bytes across all parts.
    pub size: u64,
    /// Parts in image order.
    pub parts: Vec<BackupPart>,
    /// Directory holding the parts and manifest.
    pub directory: PathBuf,
}

impl Backup {
    fn from_manifest(manifest: BackupManifest, directory: PathBuf) -> Self {
        Self {
            size: manifest.size(),
            key: manifest.key,
            restore_point: manifest.restore_point,
            max_part_size: manifest.max_part_size,
            parts: manifest.parts,
            directory,
        }
    }
}

/// Creates, finds and deletes backups.
#[derive(Debug)]
pub struct BackupStore {
    fs: Arc<dyn FileSystem>,
    data_dir: PathBuf,
    max_part_size: u64,
    locks: Arc<BackupLocks>,
}

impl BackupStore {
    /// Creates a backup store sharing `locks` with every other store of the
    /// same application context.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, config: &Config, locks: Arc<BackupLocks>) -> Self {
        Self {
            fs,
            data_dir: config.data_dir.clone(),
            max_part_size: config.backup_max_part_size,
            locks,
        }
    }

    /// Returns the lock table.
    #[must_use]
    pub fn locks(&self) -> &Arc<BackupLocks> {
        &self.locks
    }

    /// Returns the directory of the backup of `key` at `timestamp`.
    #[must_use]
    pub fn backup_directory(&self, key: &DatabaseKey, timestamp: Timestamp) -> PathBuf {
        key.backups_directory(&self.data_dir)
            .join(key.backup_key(timestamp))
    }

    /// Writes a backup of the branch as of the latest restore point at or
    /// before `timestamp`.
    ///
    /// The parts and manifest are written to a staging directory next to the
    /// backup's own and moved into place once the manifest is durable, so a
    /// previous backup of the same restore point survives a failed run.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::BackupInProgress`] if a backup of the branch is
    /// already running, [`RewindError::RestorePointNotFound`] if nothing was
    /// recorded at or before `timestamp`, or the first I/O or corruption
    /// error.
    pub fn run(
        &self,
        store: &PageRangeStore,
        rollback: &RollbackLogger,
        snapshots: &SnapshotLogger,
        timestamp: Timestamp,
    ) -> Result<Backup> {
        let key = store.key();
        if rollback.key() != key || snapshots.key() != key {
            return Err(RewindError::ValidationError(format!(
                "Backup of {key} given logs of another branch"
            )));
        }

        let _guard = self.locks.try_acquire(key)?;

        let restore_point = snapshots.restore_point_at_or_before(timestamp)?;
        info!(
            key = %key,
            requested = timestamp,
            restore_point = restore_point.timestamp,
            page_count = restore_point.page_count,
            "backup started"
        );

        let delta = ReverseDelta::collect(rollback, restore_point.timestamp)?;
        let directory = self.backup_directory(key, restore_point.timestamp);
        let staging = sibling(&directory, STAGING_SUFFIX);

        self.remove_dir_if_exists(&staging)?;
        self.fs
            .mkdir_all(&staging)
            .map_err(|e| RewindError::io(format!("creating {}", staging.display()), e))?;

        let manifest = match self.write_staged(store, rollback, &delta, restore_point, &staging) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = self.remove_dir_if_exists(&staging) {
                    warn!(directory = %staging.display(), error = %cleanup, "failed to remove staged backup");
                }
                return Err(e);
            }
        };
        self.install(&staging, &directory)?;

        let backup = Backup::from_manifest(manifest, directory);
        info!(
            key = %key,
            restore_point = restore_point.timestamp,
            size = backup.size,
            parts = backup.parts.len(),
            pages_restored = delta.len(),
            "backup finished"
        );
        Ok(backup)
    }

    fn write_staged(
        &self,
        store: &PageRangeStore,
        rollback: &RollbackLogger,
        delta: &ReverseDelta,
        restore_point: RestorePoint,
        staging: &Path,
    ) -> Result<BackupManifest> {
        let key = store.key();
        let mut writer = PartWriter::new(
            Arc::clone(&self.fs),
            staging,
            key.backup_key(restore_point.timestamp),
            self.max_part_size,
        );
        let ranges = ranges_for_pages(restore_point.page_count, store.range_max_pages());
        for range_number in 1..=ranges {
            let bytes =
                reconstruct_range(store, rollback, delta, range_number, restore_point.page_count)?;
            writer.write(&bytes)?;
            debug!(range_number, bytes = bytes.len(), "backed up range");
        }
        let parts = writer.finish()?;

        let manifest = BackupManifest::new(
            key.clone(),
            restore_point,
            store.page_size(),
            self.max_part_size,
            parts,
        );
        manifest.validate()?;
        self.fs
            .write_file(&staging.join(MANIFEST_FILE_NAME), &manifest.serialize()?)
            .map_err(|e| RewindError::io("writing backup manifest", e))?;
        Ok(manifest)
    }

    /// Moves a complete staged backup to `directory`, retiring any backup
    /// already there.
    fn install(&self, staging: &Path, directory: &Path) -> Result<()> {
        let retired = sibling(directory, RETIRED_SUFFIX);
        self.remove_dir_if_exists(&retired)?;

        if self.fs.exists(directory) {
            self.fs.rename(directory, &retired).map_err(|e| {
                RewindError::io(format!("retiring {}", directory.display()), e)
            })?;
        }
        self.fs
            .rename(staging, directory)
            .map_err(|e| RewindError::io(format!("installing {}", directory.display()), e))?;

        self.remove_dir_if_exists(&retired)
    }

    /// Returns the backup of `key` taken at restore point `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::BackupNotFound`] if there is no complete backup
    /// at `timestamp`, or an error if its manifest is invalid.
    pub fn get_backup(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<Backup> {
        let directory = self.backup_directory(key, timestamp);
        let bytes = match self.fs.read_file(&directory.join(MANIFEST_FILE_NAME)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RewindError::BackupNotFound { timestamp })
            }
            Err(e) => return Err(RewindError::io("reading backup manifest", e)),
        };

        let manifest = BackupManifest::deserialize(&bytes)?;
        Ok(Backup::from_manifest(manifest, directory))
    }

    /// Lists the complete backups of `key`, ascending by restore point.
    ///
    /// Staging directories and directories without a manifest are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup directory cannot be listed or a
    /// manifest is invalid.
    pub fn list(&self, key: &DatabaseKey) -> Result<Vec<Backup>> {
        let root = key.backups_directory(&self.data_dir);
        let entries = crate::storage::fs::read_dir_or_empty(self.fs.as_ref(), &root)
            .map_err(|e| RewindError::io(format!("listing {}", root.display()), e))?;

        let mut backups = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.is_dir) {
            let directory = root.join(&entry.name);
            if entry.name.contains('.') {
                debug!(directory = %directory.display(), "skipping staged backup");
                continue;
            }
            let bytes = match self.fs.read_file(&directory.join(MANIFEST_FILE_NAME)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(directory = %directory.display(), "skipping incomplete backup");
                    continue;
                }
                Err(e) => return Err(RewindError::io("reading backup manifest", e)),
            };
            backups.push(Backup::from_manifest(
                BackupManifest::deserialize(&bytes)?,
                directory,
            ));
        }

        backups.sort_by_key(|backup| backup.restore_point.timestamp);
        Ok(backups)
    }

    /// Deletes the backup of `key` at restore point `timestamp`. Deleting a
    /// missing backup succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be removed.
    pub fn delete(&self, key: &DatabaseKey, timestamp: Timestamp) -> Result<()> {
        let directory = self.backup_directory(key, timestamp);
        self.remove_dir_if_exists(&directory)?;
        info!(key = %key, timestamp, "backup deleted");
        Ok(())
    }

    /// Reads and verifies the full database image of a backup.
    ///
    /// # Errors
    ///
    /// Returns an error if a part is missing or does not match the manifest.
    pub fn read_image(&self, backup: &Backup) -> Result<Vec<u8>> {
        let mut image = Vec::with_capacity(backup.size as usize);
        for part in &backup.parts {
            image.extend(read_part(self.fs.as_ref(), &backup.directory, part)?);
        }
        Ok(image)
    }

    fn remove_dir_if_exists(&self, directory: &Path) -> Result<()> {
        match self.fs.remove_all(directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RewindError::io(
                format!("removing {}", directory.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpointer;
    use crate::storage::LocalFileSystem;
    use tempfile::TempDir;

    const PAGE: usize = 512;

    struct Fixture {
        _temp: TempDir,
        store: Arc<PageRangeStore>,
        rollback: Arc<RollbackLogger>,
        snapshots: Arc<SnapshotLogger>,
        backups: BackupStore,
    }

    fn create_fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let config = Config::new(temp.path())
            .with_page_size(PAGE)
            .with_range_max_pages(2)
            .with_backup_max_part_size(3 * PAGE as u64);
        let key = DatabaseKey::new("db", "main").unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());

        Fixture {
            store: Arc::new(PageRangeStore::open(Arc::clone(&fs), &config, key.clone()).unwrap()),
            rollback: Arc::new(RollbackLogger::new(Arc::clone(&fs), &config, key.clone())),
            snapshots: Arc::new(SnapshotLogger::new(Arc::clone(&fs), &config, key)),
            backups: BackupStore::new(fs, &config, Arc::new(BackupLocks::default())),
            _temp: temp,
        }
    }

    fn page(byte: u8) -> Vec<u8> {
        vec![byte; PAGE]
    }

    #[test]
    fn test_backup_captures_past_state() {
        let f = create_fixture();
        let checkpointer = Checkpointer::new(
            Arc::clone(&f.store),
            Arc::clone(&f.rollback),
            Arc::clone(&f.snapshots),
        );

        checkpointer
            .checkpoint(100, &[(1, page(1)), (2, page(2)), (3, page(3))], 3)
            .unwrap();
        checkpointer
            .checkpoint(200, &[(2, page(20)), (5, page(50))], 5)
            .unwrap();

        let backup = f
            .backups
            .run(&f.store, &f.rollback, &f.snapshots, 150)
            .unwrap();
        assert_eq!(backup.restore_point, RestorePoint::new(100, 3));
        assert_eq!(backup.size, 3 * PAGE as u64);
        assert_eq!(backup.parts.len(), 1);

        let image = f.backups.read_image(&backup).unwrap();
        assert_eq!(image, [page(1), page(2), page(3)].concat());

        // Current state is untouched.
        assert_eq!(f.store.read_page(2).unwrap(), page(20));
        assert_eq!(f.store.page_count(), 5);
    }

    #[test]
    fn test_get_list_delete() {
        let f = create_fixture();
        let checkpointer = Checkpointer::new(
            Arc::clone(&f.store),
            Arc::clone(&f.rollback),
            Arc::clone(&f.snapshots),
        );
        checkpointer.checkpoint(10, &[(1, page(1))], 1).unwrap();
        checkpointer.checkpoint(20, &[(1, page(2)), (4, page(4))], 4).unwrap();

        let key = f.store.key().clone();
        let newest = f.backups.run(&f.store, &f.rollback, &f.snapshots, 25).unwrap();
        assert_eq!(newest.parts.len(), 2);
        f.backups.run(&f.store, &f.rollback, &f.snapshots, 10).unwrap();

        let listed = f.backups.list(&key).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1], newest);
        assert_eq!(f.backups.get_backup(&key, 20).unwrap(), newest);

        f.backups.delete(&key, 20).unwrap();
        f.backups.delete(&key, 20).unwrap();
        assert!(f.backups.get_backup(&key, 20).unwrap_err().is_not_found());
        assert_eq!(f.backups.list(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_rerun_replaces_backup_and_leaves_no_staging() {
        let f = create_fixture();
        let checkpointer = Checkpointer::new(
            Arc::clone(&f.store),
            Arc::clone(&f.rollback),
            Arc::clone(&f.snapshots),
        );
        checkpointer.checkpoint(10, &[(1, page(1)), (2, page(2))], 2).unwrap();

        let first = f.backups.run(&f.store, &f.rollback, &f.snapshots, 10).unwrap();
        let second = f.backups.run(&f.store, &f.rollback, &f.snapshots, 10).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            f.backups.read_image(&second).unwrap(),
            [page(1), page(2)].concat()
        );

        let root = f.store.key().backups_directory(f._temp.path());
        let names: Vec<String> = std::fs::read_dir(&root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![f.store.key().backup_key(10)]);

        // A leftover staging directory with a manifest is not a backup.
        let staged = sibling(&second.directory, STAGING_SUFFIX);
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::copy(
            second.directory.join(MANIFEST_FILE_NAME),
            staged.join(MANIFEST_FILE_NAME),
        )
        .unwrap();
        assert_eq!(f.backups.list(f.store.key()).unwrap(), vec![second]);
    }

    #[test]
    fn test_held_lock_rejects_run() {
        let f = create_fixture();
        f.snapshots.log(1, 0).unwrap();

        let _guard = f.backups.locks().try_acquire(f.store.key()).unwrap();
        let err = f
            .backups
            .run(&f.store, &f.rollback, &f.snapshots, 1)
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    #[test]
    fn test_no_restore_point() {
        let f = create_fixture();
        let err = f
            .backups
            .run(&f.store, &f.rollback, &f.snapshots, 1)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!f.backups.locks().is_held(f.store.key()));
    }
}
