//! Per-branch index of day-bucketed snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, RewindError};
use crate::key::{parse_bucket_name, DatabaseKey};
use crate::snapshot::day::Snapshot;
use crate::snapshot::restore_point::RestorePoint;
use crate::storage::fs::read_dir_or_empty;
use crate::storage::FileSystem;
use crate::timestamp::{truncate_day, Timestamp};

/// Records checkpoints of one database branch and answers restore point
/// lookups.
pub struct SnapshotLogger {
    key: DatabaseKey,
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    idle_timeout: Duration,
    snapshots: Mutex<BTreeMap<Timestamp, Arc<Snapshot>>>,
}

impl SnapshotLogger {
    /// Creates a snapshot logger for `key`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, config: &Config, key: DatabaseKey) -> Self {
        let directory = key.snapshot_directory(&config.data_dir);
        Self {
            key,
            fs,
            directory,
            idle_timeout: config.snapshot_idle_timeout,
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the branch this logger belongs to.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the directory holding the snapshot files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Records a checkpoint at `timestamp` with the resulting page count.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn log(&self, timestamp: Timestamp, page_count: u32) -> Result<()> {
        let snapshot = {
            let mut snapshots = self.snapshots.lock();
            self.cached_or_new(&mut snapshots, truncate_day(timestamp))
        };
        snapshot.log(timestamp, page_count)?;
        debug!(key = %self.key, timestamp, page_count, "recorded restore point");
        Ok(())
    }

    /// Returns the loaded snapshot of the day containing `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::RestorePointNotFound`] if nothing was recorded
    /// that day, or an error if the records cannot be read.
    pub fn get_snapshot(&self, timestamp: Timestamp) -> Result<Arc<Snapshot>> {
        let day = truncate_day(timestamp);
        let mut snapshots = self.snapshots.lock();
        Self::evict_locked(&mut snapshots, self.idle_timeout);

        if !snapshots.contains_key(&day)
            && !self.fs.exists(&self.directory.join(crate::key::bucket_name(day)))
        {
            return Err(RewindError::RestorePointNotFound { timestamp });
        }

        let snapshot = self.cached_or_new(&mut snapshots, day);
        snapshot.load()?;
        Ok(snapshot)
    }

    /// Returns every snapshot on disk, ascending by day, without loading
    /// their records.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot directory cannot be listed.
    pub fn get_snapshots(&self) -> Result<Vec<Arc<Snapshot>>> {
        let days = self.day_buckets()?;
        let mut snapshots = self.snapshots.lock();
        Ok(days
            .into_iter()
            .map(|day| self.cached_or_new(&mut snapshots, day))
            .collect())
    }

    /// Returns every snapshot on disk with its records loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be read.
    pub fn get_snapshots_with_restore_points(&self) -> Result<Vec<Arc<Snapshot>>> {
        let snapshots = self.get_snapshots()?;
        for snapshot in &snapshots {
            snapshot.load()?;
        }
        Ok(snapshots)
    }

    /// Lists the day buckets with a snapshot file, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot directory cannot be listed.
    pub fn day_buckets(&self) -> Result<Vec<Timestamp>> {
        let entries = read_dir_or_empty(self.fs.as_ref(), &self.directory).map_err(|e| {
            RewindError::io(format!("listing {}", self.directory.display()), e)
        })?;

        let mut days: Vec<Timestamp> = entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| parse_bucket_name(&entry.name))
            .collect();
        days.sort_unstable();
        Ok(days)
    }

    /// Returns the latest restore point at or before `timestamp`, searching
    /// the day of `timestamp` first and then earlier days.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::RestorePointNotFound`] if no checkpoint was
    /// recorded at or before `timestamp`.
    pub fn restore_point_at_or_before(&self, timestamp: Timestamp) -> Result<RestorePoint> {
        let day = truncate_day(timestamp);

        for bucket in self.day_buckets()?.into_iter().rev() {
            if bucket > day {
                continue;
            }
            let snapshot = self.get_snapshot(bucket)?;
            if let Some(point) = snapshot.latest_at_or_before(timestamp)? {
                return Ok(point);
            }
        }

        Err(RewindError::RestorePointNotFound { timestamp })
    }

    /// Returns the number of cached snapshots.
    #[must_use]
    pub fn cached_snapshots(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Drops snapshots unused for longer than `idle` and not held elsewhere.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        Self::evict_locked(&mut self.snapshots.lock(), idle)
    }

    fn evict_locked(snapshots: &mut BTreeMap<Timestamp, Arc<Snapshot>>, idle: Duration) -> usize {
        let before = snapshots.len();
        snapshots.retain(|day, snapshot| {
            let evict = Arc::strong_count(snapshot) == 1 && snapshot.idle_for() > idle;
            if evict {
                snapshot.close();
                debug!(day, "evicted idle snapshot");
            }
            !evict
        });
        before - snapshots.len()
    }

    fn cached_or_new(
        &self,
        snapshots: &mut BTreeMap<Timestamp, Arc<Snapshot>>,
        day: Timestamp,
    ) -> Arc<Snapshot> {
        let snapshot = snapshots.entry(day).or_insert_with(|| {
            Arc::new(Snapshot::new(Arc::clone(&self.fs), &self.directory, day))
        });
        snapshot.touch();
        Arc::clone(snapshot)
    }

    /// Closes every snapshot and clears the cache.
    pub fn close(&self) {
        let mut snapshots = self.snapshots.lock();
        for snapshot in snapshots.values() {
            snapshot.close();
        }
        snapshots.clear();
    }
}

impl std::fmt::Debug for SnapshotLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLogger")
            .field("key", &self.key)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
