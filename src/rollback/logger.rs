//! Per-branch manager of hour-bucketed rollback logs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, RewindError};
use crate::key::{parse_bucket_name, DatabaseKey};
use crate::rollback::buffer_pool::CompressionBufferPool;
use crate::rollback::log::{RollbackLog, RollbackLogFile, RollbackLogReader};
use crate::storage::fs::read_dir_or_empty;
use crate::storage::FileSystem;
use crate::timestamp::{truncate_hour, Timestamp};

/// Owns the open rollback logs of one database branch, keyed by hour bucket.
pub struct RollbackLogger {
    key: DatabaseKey,
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    idle_timeout: Duration,
    logs: Mutex<BTreeMap<Timestamp, Arc<RollbackLog>>>,
    buffers: Arc<CompressionBufferPool>,
}

impl RollbackLogger {
    /// Creates a logger for `key`. No file is opened until the first write
    /// or read of an hour bucket.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, config: &Config, key: DatabaseKey) -> Self {
        let directory = key.rollback_log_directory(&config.data_dir);
        Self {
            key,
            fs,
            directory,
            idle_timeout: config.rollback_log_idle_timeout,
            logs: Mutex::new(BTreeMap::new()),
            buffers: Arc::new(CompressionBufferPool::new()),
        }
    }

    /// Returns the branch this logger belongs to.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the directory holding the log files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the shared compression buffer pool.
    #[must_use]
    pub fn buffers(&self) -> &Arc<CompressionBufferPool> {
        &self.buffers
    }

    /// Returns the log for the hour containing `timestamp`, opening it if needed.
    ///
    /// Opening a new bucket also closes handles idle past the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened.
    pub fn get_log(&self, timestamp: Timestamp) -> Result<Arc<RollbackLog>> {
        let bucket = truncate_hour(timestamp);
        let mut logs = self.logs.lock();

        if let Some(log) = logs.get(&bucket) {
            log.touch();
            return Ok(Arc::clone(log));
        }

        Self::evict_locked(&mut logs, self.idle_timeout);

        let log = Arc::new(RollbackLog::open(
            Arc::clone(&self.fs),
            &self.directory,
            bucket,
            Arc::clone(&self.buffers),
        )?);
        logs.insert(bucket, Arc::clone(&log));
        Ok(log)
    }

    /// Returns a read-only view of the hour log containing `timestamp`.
    ///
    /// Unlike [`get_log`](Self::get_log) this never opens the file for
    /// writing or recovers its tail, so it is safe next to an in-flight frame.
    #[must_use]
    pub fn reader(&self, timestamp: Timestamp) -> RollbackLogReader {
        RollbackLogReader::new(Arc::clone(&self.fs), &self.directory, timestamp)
    }

    /// Opens a frame for `timestamp` and returns a writer holding the hour
    /// log's frame lock until it is committed, rolled back or dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or the header written.
    pub fn begin_frame(&self, timestamp: Timestamp) -> Result<FrameWriter> {
        let log = self.get_log(timestamp)?;
        let mut file = log.file().lock_arc();
        let (offset, size) = file.append_frame(timestamp)?;

        debug!(key = %self.key, timestamp, offset, "started rollback frame");

        Ok(FrameWriter {
            log,
            file,
            buffers: Arc::clone(&self.buffers),
            offset,
            size,
            timestamp,
            finished: false,
        })
    }

    /// Appends an uncommitted frame header to the hour log of `timestamp`.
    ///
    /// The caller owns the frame lifecycle until it commits or rolls back;
    /// prefer [`begin_frame`](Self::begin_frame).
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::FrameInProgress`] while another frame is open
    /// on the same hour log, or an error if the log cannot be opened or
    /// written.
    pub fn start_frame(&self, timestamp: Timestamp) -> Result<(u64, u64)> {
        self.get_log(timestamp)?.append_frame(timestamp)
    }

    /// Appends the pre-image of `page_number` to the hour log of `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails.
    pub fn log(&self, page_number: u32, timestamp: Timestamp, data: &[u8]) -> Result<u64> {
        self.get_log(timestamp)?
            .append_page(page_number, timestamp, data)
    }

    /// Commits the frame at `offset` in the hour log of `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be committed.
    pub fn commit(&self, timestamp: Timestamp, offset: u64, size: u64) -> Result<()> {
        self.get_log(timestamp)?.commit(offset, size)
    }

    /// Discards the frame at `offset` in the hour log of `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::RollbackConflict`] if the frame is not the tail.
    pub fn rollback(&self, timestamp: Timestamp, offset: u64, size: u64) -> Result<()> {
        self.get_log(timestamp)?.rollback(offset, size)
    }

    /// Lists the hour buckets with a log file on disk, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be listed.
    pub fn hour_buckets(&self) -> Result<Vec<Timestamp>> {
        let entries = read_dir_or_empty(self.fs.as_ref(), &self.directory).map_err(|e| {
            RewindError::io(format!("listing {}", self.directory.display()), e)
        })?;

        let mut buckets: Vec<Timestamp> = entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| parse_bucket_name(&entry.name))
            .collect();
        buckets.sort_unstable();
        Ok(buckets)
    }

    /// Returns the number of open log handles.
    #[must_use]
    pub fn open_logs(&self) -> usize {
        self.logs.lock().len()
    }

    /// Closes handles unused for longer than `idle` and not held elsewhere.
    ///
    /// Returns the number of handles closed.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        Self::evict_locked(&mut self.logs.lock(), idle)
    }

    fn evict_locked(logs: &mut BTreeMap<Timestamp, Arc<RollbackLog>>, idle: Duration) -> usize {
        let before = logs.len();
        logs.retain(|bucket, log| {
            let evict = Arc::strong_count(log) == 1
                && log.idle_for() > idle
                && log
                    .file()
                    .try_lock()
                    .is_some_and(|file| file.open_frame().is_none());
            if evict {
                debug!(bucket, "closing idle rollback log");
            }
            !evict
        });
        before - logs.len()
    }

    /// Closes every open log and releases the buffer pool.
    ///
    /// In-flight frames must be drained by the caller first.
    pub fn close(&self) {
        let mut logs = self.logs.lock();
        for (bucket, log) in logs.iter() {
            if let Err(e) = log.file().lock().sync() {
                warn!(bucket, error = %e, "failed to sync rollback log on close");
            }
        }
        logs.clear();
        self.buffers.clear();
    }
}

impl std::fmt::Debug for RollbackLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackLogger")
            .field("key", &self.key)
            .field("directory", &self.directory)
            .field("open_logs", &self.open_logs())
            .finish_non_exhaustive()
    }
}

/// An open frame holding its hour log's frame lock.
///
/// Entries logged through the writer carry the frame's timestamp. Dropping a
/// writer that was neither committed nor rolled back discards the frame.
pub struct FrameWriter {
    log: Arc<RollbackLog>,
    file: ArcMutexGuard<RawMutex, RollbackLogFile>,
    buffers: Arc<CompressionBufferPool>,
    offset: u64,
    size: u64,
    timestamp: Timestamp,
    finished: bool,
}

impl FrameWriter {
    /// Offset of the frame header in the log.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes written for the frame so far, header included.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Timestamp of the frame.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Hour bucket of the log the frame is written to.
    #[must_use]
    pub fn bucket(&self) -> Timestamp {
        self.log.timestamp()
    }

    /// Appends the pre-image of `page_number`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails. The frame stays
    /// open and should be rolled back.
    pub fn log(&mut self, page_number: u32, data: &[u8]) -> Result<u64> {
        let mut buffer = self.buffers.get();
        let result = self
            .file
            .append_page(page_number, self.timestamp, data, &mut buffer);
        self.buffers.put(buffer);

        let written = result?;
        self.size += written;
        Ok(written)
    }

    /// Commits the frame, making its entries visible to readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the frame is then rolled back
    /// when the writer is dropped.
    pub fn commit(mut self) -> Result<()> {
        self.file.commit(self.offset, self.size)?;
        self.finished = true;
        debug!(
            timestamp = self.timestamp,
            offset = self.offset,
            size = self.size,
            "committed rollback frame"
        );
        Ok(())
    }

    /// Discards the frame and its entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be truncated.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.file.rollback(self.offset, self.size)
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(
            timestamp = self.timestamp,
            offset = self.offset,
            "rolling back rollback frame dropped without commit"
        );
        if let Err(e) = self.file.rollback(self.offset, self.size) {
            warn!(offset = self.offset, error = %e, "failed to roll back dropped frame");
        }
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("bucket", &self.log.timestamp())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
