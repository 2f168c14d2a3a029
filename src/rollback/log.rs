//! A single hour-bucketed rollback log file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, RewindError};
use crate::rollback::buffer_pool::{CompressionBuffer, CompressionBufferPool};
use crate::rollback::entry::RollbackLogEntry;
use crate::rollback::frame::{RollbackLogFrame, FRAME_HEADER_SIZE};
use crate::rollback::reader::{
    frame_entry_locations, EntryLocation, FrameBatches, FrameCursor, FrameStep,
};
use crate::storage::{open_file_ensuring_dir, File, FileSystem, OpenMode};
use crate::timestamp::{truncate_hour, Timestamp};

/// Append-side handle of a rollback log.
///
/// Every method assumes the caller holds the log's frame lock, so a frame's
/// header and entries are written as one uninterrupted sequence.
#[derive(Debug)]
pub struct RollbackLogFile {
    file: Box<dyn File>,
    path: PathBuf,
    /// Offset of the frame appended but not yet committed or rolled back.
    open_frame: Option<u64>,
}

impl RollbackLogFile {
    /// Returns the current length of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be sized.
    pub fn len(&self) -> Result<u64> {
        self.file
            .len()
            .map_err(|e| RewindError::io(format!("sizing {}", self.path.display()), e))
    }

    /// Returns true if the log holds no frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be sized.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Returns the offset of the frame currently being written, if any.
    #[must_use]
    pub fn open_frame(&self) -> Option<u64> {
        self.open_frame
    }

    /// Appends an uncommitted frame header at the end of the log.
    ///
    /// Returns the frame offset and the bytes written so far (the header).
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::FrameInProgress`] if an earlier frame has not
    /// been committed or rolled back, or an error if the write fails.
    pub fn append_frame(&mut self, timestamp: Timestamp) -> Result<(u64, u64)> {
        if let Some(offset) = self.open_frame {
            return Err(RewindError::FrameInProgress { offset });
        }

        let offset = self.len()?;
        let frame = RollbackLogFrame::open(offset, timestamp);

        self.file
            .write_at(&frame.encode(), offset)
            .map_err(|e| RewindError::io("writing rollback frame header", e))?;

        self.open_frame = Some(offset);
        Ok((offset, FRAME_HEADER_SIZE as u64))
    }

    /// Appends an already-encoded entry to the open frame.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is open or the write fails.
    pub fn append_encoded(&mut self, encoded: &[u8]) -> Result<u64> {
        if self.open_frame.is_none() {
            return Err(RewindError::ValidationError(format!(
                "No open frame in {} to append an entry to",
                self.path.display()
            )));
        }

        let offset = self.len()?;
        self.file
            .write_at(encoded, offset)
            .map_err(|e| RewindError::io("writing rollback entry", e))?;
        Ok(encoded.len() as u64)
    }

    /// Serializes and appends one entry through `buffer`, returning the
    /// bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails.
    pub fn append_log(
        &mut self,
        entry: &mut RollbackLogEntry,
        buffer: &mut CompressionBuffer,
    ) -> Result<u64> {
        entry.serialize(&mut buffer.encoder, &mut buffer.buf)?;
        self.append_encoded(&buffer.buf)
    }

    /// Encodes a borrowed page pre-image through `buffer` and appends it.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails.
    pub fn append_page(
        &mut self,
        page_number: u32,
        timestamp: Timestamp,
        data: &[u8],
        buffer: &mut CompressionBuffer,
    ) -> Result<u64> {
        RollbackLogEntry::encode_page(
            page_number,
            timestamp,
            data,
            &mut buffer.encoder,
            &mut buffer.buf,
        )?;
        self.append_encoded(&buffer.buf)
    }

    /// Marks the frame at `offset` committed with its final `size`.
    ///
    /// Entries are synced before the header is rewritten, and the header is
    /// synced afterwards; the frame becomes visible to readers at that point.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` does not hold an open frame or the size
    /// runs past the end of the log.
    pub fn commit(&mut self, offset: u64, size: u64) -> Result<()> {
        if self.open_frame != Some(offset) {
            return Err(RewindError::ValidationError(format!(
                "No open frame at offset {offset} to commit"
            )));
        }

        let mut frame = self.read_frame(offset)?;
        if frame.committed {
            return Err(RewindError::CorruptedLog(format!(
                "Frame at {offset} is already committed"
            )));
        }

        let len = self.len()?;
        if size < FRAME_HEADER_SIZE as u64 || offset + size > len {
            return Err(RewindError::CorruptedLog(format!(
                "Frame at {offset} cannot commit size {size} with log length {len}"
            )));
        }

        self.sync()?;

        frame.committed = true;
        frame.size = size;
        self.file
            .write_at(&frame.encode(), offset)
            .map_err(|e| RewindError::io("committing rollback frame", e))?;

        self.sync()?;
        self.open_frame = None;
        Ok(())
    }

    /// Discards the open frame at `offset` by truncating the log back to it.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::RollbackConflict`] if the frame is not the tail
    /// of the log or is already committed; the log is left unmodified.
    pub fn rollback(&mut self, offset: u64, size: u64) -> Result<()> {
        let len = self.len()?;
        if offset + size != len {
            return Err(RewindError::RollbackConflict {
                offset,
                size,
                length: len,
            });
        }

        if self.open_frame != Some(offset) || self.read_frame(offset)?.committed {
            return Err(RewindError::RollbackConflict {
                offset,
                size,
                length: len,
            });
        }

        self.file
            .truncate(offset)
            .map_err(|e| RewindError::io("truncating rollback log", e))?;
        self.open_frame = None;
        Ok(())
    }

    /// Flushes the log to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync()
            .map_err(|e| RewindError::io(format!("syncing {}", self.path.display()), e))
    }

    fn read_frame(&self, offset: u64) -> Result<RollbackLogFrame> {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        self.file
            .read_exact_at(&mut bytes, offset)
            .map_err(|e| RewindError::io(format!("reading frame at {offset}"), e))?;
        let frame = RollbackLogFrame::decode(&bytes)?;

        if frame.offset != offset {
            return Err(RewindError::CorruptedLog(format!(
                "Frame at {offset} records offset {}",
                frame.offset
            )));
        }

        Ok(frame)
    }

    /// Truncates a trailing uncommitted frame or partial header left by a
    /// crash. Uncommitted frames followed by other frames are kept; readers
    /// pass over them.
    fn recover_tail(&mut self) -> Result<Option<u64>> {
        let len = self.len()?;
        let mut cursor = FrameCursor::new(len);

        loop {
            match cursor.next_frame(self.file.as_ref())? {
                FrameStep::Committed(_) => {}
                FrameStep::Uncommitted { frame, next } => {
                    warn!(
                        path = %self.path.display(),
                        offset = frame.offset,
                        next,
                        "skipping abandoned rollback frame"
                    );
                }
                FrameStep::Tail { position } if position < len => {
                    self.file
                        .truncate(position)
                        .map_err(|e| RewindError::io("truncating uncommitted tail", e))?;
                    return Ok(Some(len - position));
                }
                FrameStep::Tail { .. } => return Ok(None),
            }
        }
    }
}

/// One rollback log: all frames written during one hour.
///
/// Frame lifecycles are serialized by a per-log lock. Reads go through a
/// [`RollbackLogReader`] and only see committed frames.
pub struct RollbackLog {
    reader: RollbackLogReader,
    file: Arc<Mutex<RollbackLogFile>>,
    buffers: Arc<CompressionBufferPool>,
    last_used: Mutex<Instant>,
}

impl RollbackLog {
    /// Opens (creating if needed) the log for the hour containing `timestamp`
    /// inside `directory` for writing.
    ///
    /// A trailing uncommitted frame from an earlier crash is truncated, so
    /// only the single writer of a log may open it this way; everyone else
    /// reads through [`RollbackLogReader`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or recovered.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        directory: &Path,
        timestamp: Timestamp,
        buffers: Arc<CompressionBufferPool>,
    ) -> Result<Self> {
        let reader = RollbackLogReader::new(fs, directory, timestamp);
        let path = reader.path().to_path_buf();

        let file = open_file_ensuring_dir(reader.fs.as_ref(), &path, OpenMode::ReadWrite)
            .map_err(|e| RewindError::io(format!("opening {}", path.display()), e))?;

        let mut log_file = RollbackLogFile {
            file,
            path: path.clone(),
            open_frame: None,
        };
        if let Some(discarded) = log_file.recover_tail()? {
            warn!(
                path = %path.display(),
                discarded,
                "truncated uncommitted rollback frame"
            );
        }
        debug!(path = %path.display(), "opened rollback log");

        Ok(Self {
            reader,
            file: Arc::new(Mutex::new(log_file)),
            buffers,
            last_used: Mutex::new(Instant::now()),
        })
    }

    /// Returns the hour bucket of this log.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.reader.timestamp
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.reader.path
    }

    /// Returns the read side of this log.
    #[must_use]
    pub fn reader(&self) -> &RollbackLogReader {
        &self.reader
    }

    /// Returns the shared append handle; lock it to run a frame lifecycle.
    #[must_use]
    pub fn file(&self) -> &Arc<Mutex<RollbackLogFile>> {
        &self.file
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    /// Appends an uncommitted frame header. See [`RollbackLogFile::append_frame`].
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::FrameInProgress`] if another frame is open, or
    /// an error if the write fails.
    pub fn append_frame(&self, timestamp: Timestamp) -> Result<(u64, u64)> {
        self.file.lock().append_frame(timestamp)
    }

    /// Appends one entry to the open frame using a pooled buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is open, or compression or the write fails.
    pub fn append_log(&self, entry: &mut RollbackLogEntry) -> Result<u64> {
        let mut buffer = self.buffers.get();
        let result = self.file.lock().append_log(entry, &mut buffer);
        self.buffers.put(buffer);
        result
    }

    /// Appends a borrowed page pre-image to the open frame using a pooled
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is open, or compression or the write fails.
    pub fn append_page(&self, page_number: u32, timestamp: Timestamp, data: &[u8]) -> Result<u64> {
        let mut buffer = self.buffers.get();
        let result = self
            .file
            .lock()
            .append_page(page_number, timestamp, data, &mut buffer);
        self.buffers.put(buffer);
        result
    }

    /// Commits a frame. See [`RollbackLogFile::commit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be committed.
    pub fn commit(&self, offset: u64, size: u64) -> Result<()> {
        self.file.lock().commit(offset, size)
    }

    /// Discards a frame. See [`RollbackLogFile::rollback`].
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not the tail of the log.
    pub fn rollback(&self, offset: u64, size: u64) -> Result<()> {
        self.file.lock().rollback(offset, size)
    }

    /// See [`RollbackLogReader::read_after`].
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or an entry is corrupt.
    pub fn read_after(&self, timestamp: Timestamp) -> Result<Vec<RollbackLogEntry>> {
        self.reader.read_after(timestamp)
    }

    /// See [`RollbackLogReader::read_for_timestamp`].
    ///
    /// # Errors
    ///
    /// Returns an error if a read handle cannot be opened.
    pub fn read_for_timestamp(&self, timestamp: Timestamp) -> Result<FrameBatches> {
        self.reader.read_for_timestamp(timestamp)
    }

    /// See [`RollbackLogReader::entry_locations_after`].
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or a header is corrupt.
    pub fn entry_locations_after(&self, timestamp: Timestamp) -> Result<Vec<EntryLocation>> {
        self.reader.entry_locations_after(timestamp)
    }

    /// See [`RollbackLogReader::frames`].
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn frames(&self) -> Result<Vec<RollbackLogFrame>> {
        self.reader.frames()
    }

    /// See [`RollbackLogReader::read_entry_at`].
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or is corrupt.
    pub fn read_entry_at(&self, offset: u64) -> Result<RollbackLogEntry> {
        self.reader.read_entry_at(offset)
    }
}

impl std::fmt::Debug for RollbackLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackLog")
            .field("timestamp", &self.reader.timestamp)
            .field("path", &self.reader.path)
            .finish_non_exhaustive()
    }
}

/// Read-only access to one hour's rollback log.
///
/// Every call opens its own read handle and never modifies the file, so a
/// reader is safe next to the writer of the same log, in this process or
/// another. Uncommitted frames are never visible.
#[derive(Clone)]
pub struct RollbackLogReader {
    timestamp: Timestamp,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl RollbackLogReader {
    /// Creates a reader for the log of the hour containing `timestamp`
    /// inside `directory`. No file is opened until the first read.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, directory: &Path, timestamp: Timestamp) -> Self {
        let bucket = truncate_hour(timestamp);
        Self {
            timestamp: bucket,
            path: directory.join(crate::key::bucket_name(bucket)),
            fs,
        }
    }

    /// Returns the hour bucket of this log.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every entry of every committed frame newer than `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or an entry is corrupt.
    pub fn read_after(&self, timestamp: Timestamp) -> Result<Vec<RollbackLogEntry>> {
        let mut entries = Vec::new();
        for batch in self.read_for_timestamp(timestamp)? {
            entries.extend(batch?);
        }
        Ok(entries)
    }

    /// Streams committed frames newer than `timestamp` one batch at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if a read handle cannot be opened.
    pub fn read_for_timestamp(&self, timestamp: Timestamp) -> Result<FrameBatches> {
        FrameBatches::new(self.open_file()?, timestamp)
    }

    /// Lists the entries of committed frames newer than `timestamp` without
    /// decoding their payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or a header is corrupt.
    pub fn entry_locations_after(&self, timestamp: Timestamp) -> Result<Vec<EntryLocation>> {
        let file = self.open_file()?;
        let mut cursor = FrameCursor::new(Self::file_len(file.as_ref())?);
        let mut locations = Vec::new();

        while let Some(frame) = cursor.next_committed(file.as_ref())? {
            if frame.timestamp > timestamp {
                locations.extend(frame_entry_locations(file.as_ref(), &frame)?);
            }
        }

        Ok(locations)
    }

    /// Lists every committed frame header in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn frames(&self) -> Result<Vec<RollbackLogFrame>> {
        let file = self.open_file()?;
        let mut cursor = FrameCursor::new(Self::file_len(file.as_ref())?);
        let mut frames = Vec::new();

        while let Some(frame) = cursor.next_committed(file.as_ref())? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Reads and verifies the entry stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or is corrupt.
    pub fn read_entry_at(&self, offset: u64) -> Result<RollbackLogEntry> {
        let file = self.open_file()?;
        RollbackLogEntry::read_at(file.as_ref(), offset)
    }

    fn open_file(&self) -> Result<Box<dyn File>> {
        self.fs
            .open_file(&self.path, OpenMode::Read)
            .map_err(|e| RewindError::io(format!("opening {} for reading", self.path.display()), e))
    }

    fn file_len(file: &dyn File) -> Result<u64> {
        file.len()
            .map_err(|e| RewindError::io("sizing rollback log", e))
    }
}

impl std::fmt::Debug for RollbackLogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackLogReader")
            .field("timestamp", &self.timestamp)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileSystem;
    use crate::timestamp::NANOS_PER_HOUR;
    use tempfile::TempDir;

    const HOUR: Timestamp = 100 * NANOS_PER_HOUR;

    fn create_test_log(temp: &TempDir) -> RollbackLog {
        RollbackLog::open(
            Arc::new(LocalFileSystem::new()),
            temp.path(),
            HOUR + 5,
            Arc::new(CompressionBufferPool::new()),
        )
        .unwrap()
    }

    /// Encodes a frame with one entry per page, as a writer would leave it.
    fn encoded_frame(offset: u64, timestamp: Timestamp, pages: &[u32], committed: bool) -> Vec<u8> {
        let mut encoder = snap::raw::Encoder::new();
        let mut entries = Vec::new();
        for &page in pages {
            let mut buf = Vec::new();
            RollbackLogEntry::new(page, timestamp, vec![page as u8; 256])
                .serialize(&mut encoder, &mut buf)
                .unwrap();
            entries.extend(buf);
        }

        let mut frame = RollbackLogFrame::open(offset, timestamp);
        if committed {
            frame.committed = true;
            frame.size = (FRAME_HEADER_SIZE + entries.len()) as u64;
        }
        let mut bytes = frame.encode().to_vec();
        bytes.extend(entries);
        bytes
    }

    fn write_frame(log: &RollbackLog, timestamp: Timestamp, pages: &[u32]) -> (u64, u64) {
        let (offset, mut size) = log.append_frame(timestamp).unwrap();
        for &page in pages {
            let mut entry = RollbackLogEntry::new(page, timestamp, vec![page as u8; 256]);
            size += log.append_log(&mut entry).unwrap();
        }
        (offset, size)
    }

    #[test]
    fn test_open_uses_hour_bucket() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);
        assert_eq!(log.timestamp(), HOUR);
        assert!(log.path().ends_with(HOUR.to_string()));
    }

    #[test]
    fn test_commit_then_read() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 10, &[1, 2]);
        log.commit(offset, size).unwrap();

        let entries = log.read_after(HOUR).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].page_number, 1);
        assert_eq!(entries[1].data, vec![2u8; 256]);

        let frames = log.frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].committed);
        assert_eq!(frames[0].size, size);
    }

    #[test]
    fn test_commit_twice_fails() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 10, &[1]);
        log.commit(offset, size).unwrap();
        assert!(log.commit(offset, size).is_err());
    }

    #[test]
    fn test_rollback_truncates_to_offset() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (first, first_size) = write_frame(&log, HOUR + 1, &[1]);
        log.commit(first, first_size).unwrap();

        let (offset, size) = write_frame(&log, HOUR + 2, &[2, 3]);
        log.rollback(offset, size).unwrap();

        assert_eq!(log.file().lock().len().unwrap(), offset);
        assert_eq!(log.read_after(0).unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_rejects_non_tail() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 1, &[1]);
        let before = log.file().lock().len().unwrap();

        let err = log.rollback(offset, size - 1).unwrap_err();
        assert!(matches!(err, RewindError::RollbackConflict { .. }));
        assert_eq!(log.file().lock().len().unwrap(), before);
    }

    #[test]
    fn test_rollback_rejects_committed_frame() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 1, &[1]);
        log.commit(offset, size).unwrap();

        assert!(log.rollback(offset, size).unwrap_err().is_concurrency());
        assert_eq!(log.read_after(0).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_truncates_uncommitted_tail() {
        let temp = TempDir::new().unwrap();
        let committed_len;
        {
            let log = create_test_log(&temp);
            let (offset, size) = write_frame(&log, HOUR + 1, &[1]);
            log.commit(offset, size).unwrap();
            committed_len = offset + size;

            write_frame(&log, HOUR + 2, &[2]);
        }

        let log = create_test_log(&temp);
        assert_eq!(log.file().lock().len().unwrap(), committed_len);
        assert_eq!(log.read_after(0).unwrap().len(), 1);
    }

    #[test]
    fn test_second_frame_waits_for_first() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (first, mut first_size) = log.append_frame(HOUR + 1).unwrap();
        let err = log.append_frame(HOUR + 2).unwrap_err();
        assert!(matches!(err, RewindError::FrameInProgress { offset } if offset == first));
        assert!(err.is_concurrency());

        first_size += log.append_page(1, HOUR + 1, &[1u8; 256]).unwrap();
        log.commit(first, first_size).unwrap();

        let (second, second_size) = write_frame(&log, HOUR + 2, &[2]);
        log.commit(second, second_size).unwrap();
        assert_eq!(log.read_after(0).unwrap().len(), 2);
    }

    #[test]
    fn test_entries_need_an_open_frame() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        assert!(log.append_page(1, HOUR, &[1u8; 64]).is_err());
        assert!(log.commit(0, FRAME_HEADER_SIZE as u64).is_err());
        assert_eq!(log.file().lock().len().unwrap(), 0);
    }

    #[test]
    fn test_abandoned_frame_is_skipped_and_kept() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(crate::key::bucket_name(HOUR));

        let mut bytes = encoded_frame(0, HOUR + 1, &[1, 2], false);
        let committed = encoded_frame(bytes.len() as u64, HOUR + 2, &[3], true);
        bytes.extend(&committed);
        LocalFileSystem::new().write_file(&path, &bytes).unwrap();

        let log = create_test_log(&temp);
        assert_eq!(log.file().lock().len().unwrap(), bytes.len() as u64);

        let entries = log.read_after(0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].page_number, 3);
        assert_eq!(log.frames().unwrap().len(), 1);

        let (offset, size) = write_frame(&log, HOUR + 3, &[4]);
        log.commit(offset, size).unwrap();
        let pages: Vec<u32> = log.read_after(0).unwrap().iter().map(|e| e.page_number).collect();
        assert_eq!(pages, vec![3, 4]);
    }

    #[test]
    fn test_reader_leaves_open_frame_alone() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 1, &[1]);
        let reader = RollbackLogReader::new(Arc::new(LocalFileSystem::new()), temp.path(), HOUR);
        assert!(reader.frames().unwrap().is_empty());
        assert!(reader.read_after(0).unwrap().is_empty());

        log.commit(offset, size).unwrap();
        assert_eq!(reader.read_after(0).unwrap().len(), 1);
    }

    #[test]
    fn test_entry_locations_match_entries() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        let (offset, size) = write_frame(&log, HOUR + 3, &[4, 9]);
        log.commit(offset, size).unwrap();

        let locations = log.entry_locations_after(HOUR).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].offset, offset + FRAME_HEADER_SIZE as u64);
        assert_eq!(locations[1].page_number, 9);
        assert_eq!(locations[1].timestamp, HOUR + 3);

        let entry = log.read_entry_at(locations[1].offset).unwrap();
        assert_eq!(entry.page_number, 9);
        assert_eq!(entry.data, vec![9u8; 256]);
    }

    #[test]
    fn test_stream_stops_early_without_error() {
        let temp = TempDir::new().unwrap();
        let log = create_test_log(&temp);

        for i in 1..=3 {
            let (offset, size) = write_frame(&log, HOUR + i, &[i as u32]);
            log.commit(offset, size).unwrap();
        }

        let mut batches = log.read_for_timestamp(HOUR).unwrap();
        let first = batches.next().unwrap().unwrap();
        assert_eq!(first[0].page_number, 1);
        drop(batches);

        // The writer is unaffected by the abandoned reader.
        let (offset, size) = write_frame(&log, HOUR + 4, &[4]);
        log.commit(offset, size).unwrap();
        assert_eq!(log.read_for_timestamp(HOUR).unwrap().count(), 4);
    }
}
