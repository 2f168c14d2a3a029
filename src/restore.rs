//! Point-in-time restore into a target page-range file set.

use tracing::{debug, info};

use crate::delta::{reconstruct_range, ReverseDelta};
use crate::error::{Result, RewindError};
use crate::rollback::RollbackLogger;
use crate::snapshot::{RestorePoint, SnapshotLogger};
use crate::storage::page::ranges_for_pages;
use crate::storage::PageRangeStore;
use crate::timestamp::Timestamp;

/// The branch a restore reads from.
#[derive(Debug, Clone, Copy)]
pub struct RestoreSource<'a> {
    /// Current pages of the source.
    pub store: &'a PageRangeStore,
    /// Pre-images of the source.
    pub rollback: &'a RollbackLogger,
    /// Checkpoint index of the source.
    pub snapshots: &'a SnapshotLogger,
}

/// Rebuilds `target` as the source was at the latest restore point at or
/// before `timestamp`, then runs `on_complete`.
///
/// Every range of the restore point is written to the target with raw
/// writes (no write hooks), the target is truncated to the restore point's
/// size and its page count updated and synced. Only then is `on_complete`
/// called with the restore point; its result is returned.
///
/// The caller must hold the target's checkpoint lock for the duration.
///
/// # Errors
///
/// Returns [`RewindError::RestorePointNotFound`] if nothing was recorded at
/// or before `timestamp`, a validation error if source and target are the
/// same branch or differ in geometry, or the first I/O or corruption error.
/// A target left by a failed restore must be discarded.
pub fn restore_from_timestamp<T>(
    source: RestoreSource<'_>,
    target: &PageRangeStore,
    timestamp: Timestamp,
    on_complete: impl FnOnce(&RestorePoint) -> Result<T>,
) -> Result<T> {
    let source_key = source.store.key();
    if target.key() == source_key {
        return Err(RewindError::ValidationError(format!(
            "Cannot restore {source_key} onto itself"
        )));
    }
    if source.rollback.key() != source_key || source.snapshots.key() != source_key {
        return Err(RewindError::ValidationError(format!(
            "Restore of {source_key} given logs of another branch"
        )));
    }
    if target.page_size() != source.store.page_size()
        || target.range_max_pages() != source.store.range_max_pages()
    {
        return Err(RewindError::ValidationError(format!(
            "Target {} geometry differs from source {source_key}",
            target.key()
        )));
    }

    let restore_point = source.snapshots.restore_point_at_or_before(timestamp)?;
    info!(
        source = %source_key,
        target = %target.key(),
        requested = timestamp,
        restore_point = restore_point.timestamp,
        page_count = restore_point.page_count,
        "restore started"
    );

    let delta = ReverseDelta::collect(source.rollback, restore_point.timestamp)?;
    let range_size = source.store.range_size();

    let ranges = ranges_for_pages(restore_point.page_count, source.store.range_max_pages());
    for range_number in 1..=ranges {
        let bytes = reconstruct_range(
            source.store,
            source.rollback,
            &delta,
            range_number,
            restore_point.page_count,
        )?;
        target.raw_write_at(&bytes, (range_number - 1) * range_size)?;
        debug!(range_number, bytes = bytes.len(), "restored range");
    }

    target.truncate(restore_point.database_size(target.page_size()))?;
    target.set_page_count(restore_point.page_count)?;
    target.sync()?;

    info!(
        target = %target.key(),
        restore_point = restore_point.timestamp,
        pages_rewound = delta.len(),
        "restore written"
    );

    on_complete(&restore_point)
}
