//! One day of checkpoint records.
//!
//! ## Record Format (64 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------
//! 0       8     timestamp (i64 LE)
//! 8       4     page count (u32 LE)
//! 12      52    reserved (zero)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, RewindError};
use crate::key::bucket_name;
use crate::snapshot::restore_point::{RestorePoint, RestorePoints, SnapshotSummary};
use crate::storage::{open_file_ensuring_dir, File, FileSystem, OpenMode};
use crate::timestamp::{truncate_day, Timestamp};

/// Size of one snapshot record.
pub const SNAPSHOT_RECORD_SIZE: usize = 64;

fn encode_record(point: &RestorePoint) -> [u8; SNAPSHOT_RECORD_SIZE] {
    let mut bytes = [0u8; SNAPSHOT_RECORD_SIZE];
    bytes[0..8].copy_from_slice(&point.timestamp.to_le_bytes());
    bytes[8..12].copy_from_slice(&point.page_count.to_le_bytes());
    bytes
}

fn decode_record(bytes: &[u8]) -> RestorePoint {
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&bytes[0..8]);
    let mut page_count = [0u8; 4];
    page_count.copy_from_slice(&bytes[8..12]);
    RestorePoint::new(i64::from_le_bytes(timestamp), u32::from_le_bytes(page_count))
}

#[derive(Debug, Default)]
struct SnapshotState {
    /// Append handle, opened on first write.
    file: Option<Box<dyn File>>,
    /// Records in file order, populated on first read.
    records: Option<Vec<RestorePoint>>,
}

/// The restore points recorded during one UTC day.
pub struct Snapshot {
    timestamp: Timestamp,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    state: Mutex<SnapshotState>,
    last_accessed: Mutex<Instant>,
}

impl Snapshot {
    /// Creates the snapshot for the day containing `timestamp`. No file is
    /// touched until the first [`log`](Self::log) or [`load`](Self::load).
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, directory: &Path, timestamp: Timestamp) -> Self {
        let day = truncate_day(timestamp);
        Self {
            timestamp: day,
            path: directory.join(bucket_name(day)),
            fs,
            state: Mutex::new(SnapshotState::default()),
            last_accessed: Mutex::new(Instant::now()),
        }
    }

    /// Returns the day bucket.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the records have been read from disk.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.lock().records.is_some()
    }

    pub(crate) fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_accessed.lock().elapsed()
    }

    /// Appends a checkpoint record and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written, or if
    /// `timestamp` belongs to another day.
    pub fn log(&self, timestamp: Timestamp, page_count: u32) -> Result<()> {
        if truncate_day(timestamp) != self.timestamp {
            return Err(RewindError::ValidationError(format!(
                "Timestamp {timestamp} does not belong to snapshot day {}",
                self.timestamp
            )));
        }

        let point = RestorePoint::new(timestamp, page_count);
        let mut state = self.state.lock();

        let file = match &mut state.file {
            Some(file) => file,
            slot @ None => slot.insert(self.open_for_append()?),
        };

        let offset = file
            .len()
            .map_err(|e| RewindError::io("sizing snapshot", e))?;
        file.write_at(&encode_record(&point), offset)
            .map_err(|e| RewindError::io(format!("appending to {}", self.path.display()), e))?;
        file.sync()
            .map_err(|e| RewindError::io(format!("syncing {}", self.path.display()), e))?;

        if let Some(records) = state.records.as_mut() {
            records.push(point);
        }
        Ok(())
    }

    fn open_for_append(&self) -> Result<Box<dyn File>> {
        let file = open_file_ensuring_dir(self.fs.as_ref(), &self.path, OpenMode::ReadWrite)
            .map_err(|e| RewindError::io(format!("opening {}", self.path.display()), e))?;

        let len = file
            .len()
            .map_err(|e| RewindError::io("sizing snapshot", e))?;
        let aligned = len - len % SNAPSHOT_RECORD_SIZE as u64;
        if aligned != len {
            warn!(
                path = %self.path.display(),
                discarded = len - aligned,
                "truncating partial snapshot record"
            );
            file.truncate(aligned)
                .map_err(|e| RewindError::io("truncating partial snapshot record", e))?;
        }

        Ok(file)
    }

    /// Reads every record from disk if not already loaded.
    ///
    /// A missing file loads as an empty snapshot. A trailing partial record
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.records.is_none() {
            state.records = Some(self.read_records()?);
        }
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<RestorePoint>> {
        let bytes = match self.fs.read_file(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RewindError::io(
                    format!("reading {}", self.path.display()),
                    e,
                ))
            }
        };

        let records: Vec<RestorePoint> = bytes
            .chunks_exact(SNAPSHOT_RECORD_SIZE)
            .map(decode_record)
            .collect();

        if let Some(stray) = records
            .iter()
            .find(|point| truncate_day(point.timestamp) != self.timestamp)
        {
            return Err(RewindError::CorruptedSnapshot(format!(
                "{} holds restore point {} from another day",
                self.path.display(),
                stray.timestamp
            )));
        }
        debug!(path = %self.path.display(), records = records.len(), "loaded snapshot");
        Ok(records)
    }

    fn with_records<T>(&self, f: impl FnOnce(&[RestorePoint]) -> T) -> Result<T> {
        self.load()?;
        let state = self.state.lock();
        Ok(f(state.records.as_deref().unwrap_or_default()))
    }

    /// Returns the recorded checkpoint instants of the day.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be loaded.
    pub fn restore_points(&self) -> Result<RestorePoints> {
        self.with_records(|records| {
            RestorePoints::from_timestamps(records.iter().map(|point| point.timestamp))
        })
    }

    /// Returns the restore point recorded at exactly `timestamp`.
    ///
    /// When several checkpoints share the timestamp, the last one recorded
    /// wins, so repeated lookups always agree.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::RestorePointNotFound`] if none was recorded.
    pub fn get_restore_point(&self, timestamp: Timestamp) -> Result<RestorePoint> {
        self.with_records(|records| {
            records
                .iter()
                .rev()
                .find(|point| point.timestamp == timestamp)
                .copied()
        })?
        .ok_or(RewindError::RestorePointNotFound { timestamp })
    }

    /// Returns the latest restore point at or before `timestamp` in this day.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be loaded.
    pub fn latest_at_or_before(&self, timestamp: Timestamp) -> Result<Option<RestorePoint>> {
        self.with_records(|records| {
            let mut best: Option<RestorePoint> = None;
            for point in records.iter().filter(|point| point.timestamp <= timestamp) {
                // `>=` lets a later record with the same timestamp win.
                if best.map_or(true, |b| point.timestamp >= b.timestamp) {
                    best = Some(*point);
                }
            }
            best
        })
    }

    /// Returns a listing view of the snapshot, including restore points
    /// only if they are already loaded.
    #[must_use]
    pub fn summary(&self) -> SnapshotSummary {
        let state = self.state.lock();
        SnapshotSummary {
            timestamp: self.timestamp,
            restore_points: state.records.as_ref().map(|records| {
                RestorePoints::from_timestamps(records.iter().map(|point| point.timestamp))
            }),
        }
    }

    /// Closes the append handle. Loaded records are kept.
    pub fn close(&self) {
        self.state.lock().file = None;
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("timestamp", &self.timestamp)
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileSystem;
    use crate::timestamp::{NANOS_PER_DAY, NANOS_PER_SECOND};
    use tempfile::TempDir;

    const DAY: Timestamp = 19_000 * NANOS_PER_DAY;

    fn create_test_snapshot(temp: &TempDir) -> Snapshot {
        Snapshot::new(Arc::new(LocalFileSystem::new()), temp.path(), DAY + 42)
    }

    #[test]
    fn test_log_and_reload() {
        let temp = TempDir::new().unwrap();
        {
            let snapshot = create_test_snapshot(&temp);
            snapshot.log(DAY + 10, 1).unwrap();
            snapshot.log(DAY + 20, 5).unwrap();
        }

        let snapshot = create_test_snapshot(&temp);
        assert!(!snapshot.is_loaded());
        assert_eq!(snapshot.get_restore_point(DAY + 20).unwrap().page_count, 5);
        assert!(snapshot.is_loaded());

        let points = snapshot.restore_points().unwrap();
        assert_eq!(points.data, vec![DAY + 10, DAY + 20]);
        assert_eq!(
            std::fs::metadata(snapshot.path()).unwrap().len(),
            2 * SNAPSHOT_RECORD_SIZE as u64
        );
    }

    #[test]
    fn test_rejects_other_day() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        let err = snapshot.log(DAY + NANOS_PER_DAY, 1).unwrap_err();
        assert!(matches!(err, RewindError::ValidationError(_)));
    }

    #[test]
    fn test_record_from_another_day_is_corruption() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        snapshot.log(DAY + 10, 1).unwrap();
        snapshot.close();

        let mut bytes = std::fs::read(snapshot.path()).unwrap();
        bytes.extend(encode_record(&RestorePoint::new(DAY + NANOS_PER_DAY + 1, 2)));
        std::fs::write(snapshot.path(), &bytes).unwrap();

        let reloaded = create_test_snapshot(&temp);
        let err = reloaded.restore_points().unwrap_err();
        assert!(matches!(err, RewindError::CorruptedSnapshot(_)));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_missing_restore_point() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        snapshot.log(DAY + 10, 1).unwrap();
        assert!(snapshot.get_restore_point(DAY + 11).unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_timestamp_resolves_to_last_record() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        let ts = DAY + NANOS_PER_SECOND;
        snapshot.log(ts, 3).unwrap();
        snapshot.log(ts, 4).unwrap();

        for _ in 0..3 {
            assert_eq!(snapshot.get_restore_point(ts).unwrap().page_count, 4);
            assert_eq!(snapshot.latest_at_or_before(ts + 1).unwrap().unwrap().page_count, 4);
        }
        assert_eq!(snapshot.restore_points().unwrap().total, 1);
    }

    #[test]
    fn test_latest_at_or_before() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        snapshot.log(DAY + 10, 1).unwrap();
        snapshot.log(DAY + 30, 3).unwrap();

        assert_eq!(snapshot.latest_at_or_before(DAY + 5).unwrap(), None);
        assert_eq!(
            snapshot.latest_at_or_before(DAY + 29).unwrap(),
            Some(RestorePoint::new(DAY + 10, 1))
        );
        assert_eq!(
            snapshot.latest_at_or_before(DAY + 30).unwrap(),
            Some(RestorePoint::new(DAY + 30, 3))
        );
    }

    #[test]
    fn test_partial_record_is_ignored_then_truncated() {
        let temp = TempDir::new().unwrap();
        let snapshot = create_test_snapshot(&temp);
        snapshot.log(DAY + 1, 1).unwrap();
        snapshot.close();

        let mut bytes = std::fs::read(snapshot.path()).unwrap();
        bytes.extend_from_slice(&[0xFF; 10]);
        std::fs::write(snapshot.path(), &bytes).unwrap();

        let snapshot = create_test_snapshot(&temp);
        assert_eq!(snapshot.restore_points().unwrap().total, 1);

        snapshot.log(DAY + 2, 2).unwrap();
        assert_eq!(
            std::fs::metadata(snapshot.path()).unwrap().len(),
            2 * SNAPSHOT_RECORD_SIZE as u64
        );
        assert_eq!(snapshot.get_restore_point(DAY + 2).unwrap().page_count, 2);
    }
}
