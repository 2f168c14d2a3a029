//! Checkpoint index.
//!
//! Each checkpoint appends a `(timestamp, page count)` record to the snapshot
//! file of its UTC day. Restore and backup use the index to pick the restore
//! point at or before a requested instant.

mod day;
mod logger;
mod restore_point;

pub use day::{Snapshot, SNAPSHOT_RECORD_SIZE};
pub use logger::SnapshotLogger;
pub use restore_point::{RestorePoint, RestorePoints, SnapshotSummary};
