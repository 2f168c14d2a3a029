//! rewind - Point-in-time recovery for page-oriented databases
//!
//! Every checkpoint records the pre-image of each page it overwrites in an
//! hour-bucketed rollback log and a `(timestamp, page count)` restore point
//! in a day-bucketed snapshot log. Given the current page ranges and those
//! logs, any recorded instant can be rebuilt byte for byte, either into
//! backup part files or into another branch.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new(Config::new("/var/lib/rewind"))?;
//! let key = DatabaseKey::new("db", "main")?;
//!
//! let branch = engine.branch(&key)?;
//! branch.checkpoint(timestamp::now(), &pages, page_count)?;
//!
//! let backup = engine.backup(&key, target)?;
//! engine.restore(&key, &DatabaseKey::new("db", "restored")?, target, |point| Ok(*point))?;
//! ```

pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod key;
pub mod restore;
pub mod rollback;
pub mod snapshot;
pub mod storage;
pub mod timestamp;

pub use backup::{Backup, BackupLocks, BackupStore};
pub use checkpoint::Checkpointer;
pub use config::Config;
pub use delta::ReverseDelta;
pub use engine::{Branch, Engine};
pub use error::{Result, RewindError};
pub use key::DatabaseKey;
pub use restore::{restore_from_timestamp, RestoreSource};
pub use rollback::{
    FrameWriter, RollbackLog, RollbackLogEntry, RollbackLogFrame, RollbackLogReader, RollbackLogger,
};
pub use snapshot::{RestorePoint, RestorePoints, Snapshot, SnapshotLogger};
pub use storage::{FileSystem, LocalFileSystem, PageRangeStore};
pub use timestamp::Timestamp;
