//! Sequential frame scanning over a rollback log.

use crate::error::{Result, RewindError};
use crate::rollback::entry::{read_header_at, RollbackLogEntry, ENTRY_HEADER_SIZE};
use crate::rollback::frame::{RollbackLogFrame, FRAME_HEADER_SIZE, FRAME_MAGIC};
use crate::storage::File;
use crate::timestamp::Timestamp;

/// One step of a frame scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameStep {
    /// A committed frame.
    Committed(RollbackLogFrame),
    /// An abandoned uncommitted frame followed by another frame starting at
    /// `next`. Its entries are never visible.
    Uncommitted { frame: RollbackLogFrame, next: u64 },
    /// The end of the readable log: either the end of the file, a partial
    /// header, or an uncommitted frame that runs to the end of the file,
    /// starting at `position`.
    Tail { position: u64 },
}

/// Walks frame headers from the start of a log, up to the length observed
/// when the cursor was created.
pub(crate) struct FrameCursor {
    position: u64,
    len: u64,
}

impl FrameCursor {
    pub(crate) fn new(len: u64) -> Self {
        Self { position: 0, len }
    }

    pub(crate) fn next_frame(&mut self, file: &dyn File) -> Result<FrameStep> {
        if self.position + FRAME_HEADER_SIZE as u64 > self.len {
            return Ok(FrameStep::Tail {
                position: self.position,
            });
        }

        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        file.read_exact_at(&mut bytes, self.position)
            .map_err(|e| RewindError::io(format!("reading frame at {}", self.position), e))?;
        let frame = RollbackLogFrame::decode(&bytes)?;

        if frame.offset != self.position {
            return Err(RewindError::CorruptedLog(format!(
                "Frame at {} records offset {}",
                self.position, frame.offset
            )));
        }

        if !frame.committed {
            return self.skip_uncommitted(file, frame);
        }

        if frame.size < FRAME_HEADER_SIZE as u64 || frame.end() > self.len {
            return Err(RewindError::CorruptedLog(format!(
                "Frame at {} has size {} beyond log length {}",
                frame.offset, frame.size, self.len
            )));
        }

        self.position = frame.end();
        Ok(FrameStep::Committed(frame))
    }

    /// Advances to the next committed frame, passing over abandoned ones.
    pub(crate) fn next_committed(&mut self, file: &dyn File) -> Result<Option<RollbackLogFrame>> {
        loop {
            match self.next_frame(file)? {
                FrameStep::Committed(frame) => return Ok(Some(frame)),
                FrameStep::Uncommitted { .. } => {}
                FrameStep::Tail { .. } => return Ok(None),
            }
        }
    }

    /// An uncommitted frame has no size, so its extent is found by walking
    /// entry headers until the next frame magic. Anything that stops the
    /// walk short of another frame makes the frame the tail.
    fn skip_uncommitted(&mut self, file: &dyn File, frame: RollbackLogFrame) -> Result<FrameStep> {
        let tail = FrameStep::Tail {
            position: frame.offset,
        };
        let mut position = frame.offset + FRAME_HEADER_SIZE as u64;

        loop {
            if position + FRAME_HEADER_SIZE as u64 <= self.len {
                let mut magic = [0u8; 4];
                file.read_exact_at(&mut magic, position)
                    .map_err(|e| RewindError::io(format!("reading log at {position}"), e))?;
                if &magic == FRAME_MAGIC {
                    self.position = position;
                    return Ok(FrameStep::Uncommitted {
                        frame,
                        next: position,
                    });
                }
            }

            if position + ENTRY_HEADER_SIZE as u64 > self.len {
                return Ok(tail);
            }
            let Ok(header) = read_header_at(file, position) else {
                return Ok(tail);
            };
            if position + header.encoded_len() > self.len {
                return Ok(tail);
            }
            position += header.encoded_len();
        }
    }
}

/// Location of one entry inside a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    /// Page the entry restores.
    pub page_number: u32,
    /// Timestamp of the frame holding the entry.
    pub timestamp: Timestamp,
    /// Offset of the entry header in the log.
    pub offset: u64,
}

/// Decodes every entry of a committed frame.
pub(crate) fn read_frame_entries(
    file: &dyn File,
    frame: &RollbackLogFrame,
) -> Result<Vec<RollbackLogEntry>> {
    let mut entries = Vec::new();
    for location in frame_entry_locations(file, frame)? {
        entries.push(RollbackLogEntry::read_at(file, location.offset)?);
    }
    Ok(entries)
}

/// Lists the entries of a committed frame from their headers alone.
pub(crate) fn frame_entry_locations(
    file: &dyn File,
    frame: &RollbackLogFrame,
) -> Result<Vec<EntryLocation>> {
    let mut locations = Vec::new();
    let mut position = frame.offset + FRAME_HEADER_SIZE as u64;

    while position < frame.end() {
        let header = read_header_at(file, position)?;
        if position + header.encoded_len() > frame.end() {
            return Err(RewindError::CorruptedLog(format!(
                "Entry at {position} overruns frame ending at {}",
                frame.end()
            )));
        }

        locations.push(EntryLocation {
            page_number: header.page_number,
            timestamp: frame.timestamp,
            offset: position,
        });
        position += header.encoded_len();
    }

    Ok(locations)
}

/// Lazy sequence of entry batches, one per committed frame newer than a
/// timestamp.
///
/// Yields `Some(Ok(batch))` per qualifying frame, `None` once the committed
/// prefix is exhausted, and `Some(Err(_))` once on a terminal error, after
/// which it yields `None`. Dropping the iterator early closes the file.
pub struct FrameBatches {
    file: Box<dyn File>,
    cursor: FrameCursor,
    timestamp: Timestamp,
    done: bool,
}

impl FrameBatches {
    /// Creates a reader over `file` for frames with a timestamp greater than `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file length cannot be read.
    pub fn new(file: Box<dyn File>, timestamp: Timestamp) -> Result<Self> {
        let len = file
            .len()
            .map_err(|e| RewindError::io("sizing rollback log", e))?;

        Ok(Self {
            file,
            cursor: FrameCursor::new(len),
            timestamp,
            done: false,
        })
    }

    fn next_batch(&mut self) -> Result<Option<Vec<RollbackLogEntry>>> {
        while let Some(frame) = self.cursor.next_committed(self.file.as_ref())? {
            if frame.timestamp <= self.timestamp {
                continue;
            }
            let entries = read_frame_entries(self.file.as_ref(), &frame)?;
            if !entries.is_empty() {
                return Ok(Some(entries));
            }
        }
        Ok(None)
    }
}

impl Iterator for FrameBatches {
    type Item = Result<Vec<RollbackLogEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for FrameBatches {}
