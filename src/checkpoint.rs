//! Checkpoint driver: writes a batch of pages with undo logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, RewindError};
use crate::rollback::RollbackLogger;
use crate::snapshot::{RestorePoint, SnapshotLogger};
use crate::storage::PageRangeStore;
use crate::timestamp::Timestamp;

/// Writes checkpoint batches into a page store, capturing the pre-image of
/// every overwritten page and recording a restore point per batch.
pub struct Checkpointer {
    store: Arc<PageRangeStore>,
    rollback: Arc<RollbackLogger>,
    snapshots: Arc<SnapshotLogger>,
    /// Number of checkpoints completed.
    completed: AtomicU64,
}

impl Checkpointer {
    /// Creates a checkpointer over one branch's store and logs.
    #[must_use]
    pub fn new(
        store: Arc<PageRangeStore>,
        rollback: Arc<RollbackLogger>,
        snapshots: Arc<SnapshotLogger>,
    ) -> Self {
        Self {
            store,
            rollback,
            snapshots,
            completed: AtomicU64::new(0),
        }
    }

    /// Returns the number of checkpoints completed.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Performs a checkpoint.
    ///
    /// This:
    /// 1. Opens a rollback frame at `timestamp`
    /// 2. For each page, logs its current content and writes the new content
    /// 3. Syncs the page store and commits the frame
    /// 4. Persists `page_count` and records the restore point
    ///
    /// An empty batch only records the restore point.
    ///
    /// # Errors
    ///
    /// Returns an error if a page is malformed or any step fails. The frame
    /// is rolled back; pages already written are not restored.
    pub fn checkpoint(
        &self,
        timestamp: Timestamp,
        pages: &[(u32, Vec<u8>)],
        page_count: u32,
    ) -> Result<RestorePoint> {
        for (page_number, data) in pages {
            if *page_number == 0 || *page_number > page_count {
                return Err(RewindError::ValidationError(format!(
                    "Page {page_number} outside database of {page_count} pages"
                )));
            }
            if data.len() != self.store.page_size() {
                return Err(RewindError::ValidationError(format!(
                    "Page {page_number} has {} bytes, expected {}",
                    data.len(),
                    self.store.page_size()
                )));
            }
        }

        if !pages.is_empty() {
            let mut frame = self.rollback.begin_frame(timestamp)?;

            for (page_number, data) in pages {
                let pre_image = self.store.read_page(*page_number)?;
                frame.log(*page_number, &pre_image)?;
                if let Err(e) = self.store.write_page(*page_number, data) {
                    warn!(page_number, timestamp, error = %e, "checkpoint page write failed");
                    return Err(e);
                }
            }

            self.store.sync()?;
            frame.commit()?;
        }

        self.store.set_page_count(page_count)?;
        self.snapshots.log(timestamp, page_count)?;
        self.completed.fetch_add(1, Ordering::Relaxed);

        debug!(
            key = %self.store.key(),
            timestamp,
            pages = pages.len(),
            page_count,
            "checkpoint complete"
        );

        Ok(RestorePoint::new(timestamp, page_count))
    }
}
