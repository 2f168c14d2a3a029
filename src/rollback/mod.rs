//! Undo logging of page pre-images.
//!
//! Every checkpoint writes the previous content of each page it overwrites
//! into the rollback log of the current hour, inside a frame:
//!
//! ```text
//! [Frame][Entry][Entry]...[Frame][Entry]...
//! ```
//!
//! A frame is appended uncommitted, followed by its entries, and committed
//! in place once the entries are durable. Only one frame per log is open at
//! a time. Readers never see entries of an uncommitted frame, and reopening
//! a log for writing discards an uncommitted tail.
//!
//! # Example
//!
//! ```ignore
//! let logger = RollbackLogger::new(fs, &config, key);
//! let mut frame = logger.begin_frame(ts)?;
//! frame.log(page_number, &pre_image)?;
//! frame.commit()?;
//! ```

mod buffer_pool;
mod entry;
mod frame;
mod log;
mod logger;
mod reader;

pub use buffer_pool::{CompressionBuffer, CompressionBufferPool};
pub use entry::{read_header_at, EntryHeader, RollbackLogEntry, ENTRY_HEADER_SIZE, ENTRY_VERSION};
pub use frame::{RollbackLogFrame, FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use log::{RollbackLog, RollbackLogFile, RollbackLogReader};
pub use logger::{FrameWriter, RollbackLogger};
pub use reader::{EntryLocation, FrameBatches};
