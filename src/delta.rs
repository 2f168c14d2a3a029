//! Reverse delta: the page pre-images that move current state back in time.
//!
//! For a target instant `T`, the content of page `p` at `T` is the pre-image
//! captured by the first write to `p` after `T`, i.e. the entry for `p` with
//! the smallest frame timestamp greater than `T`. Pages never written after
//! `T` are unchanged.
//!
//! The delta is collected from entry headers only and keeps one location per
//! page, so its size is bounded by the number of modified pages. Entries are
//! read back and verified when a range is reconstructed.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, RewindError};
use crate::rollback::{EntryLocation, RollbackLogEntry, RollbackLogger};
use crate::storage::page::first_page_of_range;
use crate::storage::PageRangeStore;
use crate::timestamp::{truncate_hour, Timestamp};

/// Where the pre-image of one page is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEntry {
    /// Hour bucket of the log holding the entry.
    pub bucket: Timestamp,
    /// Entry location inside that log.
    pub location: EntryLocation,
}

impl DeltaEntry {
    /// Orders candidates: earliest frame first, then earliest position.
    fn precedes(&self, other: &DeltaEntry) -> bool {
        (self.location.timestamp, self.bucket, self.location.offset)
            < (other.location.timestamp, other.bucket, other.location.offset)
    }
}

/// Per-page pre-images needed to reconstruct state as of a target instant.
#[derive(Debug, Clone, Default)]
pub struct ReverseDelta {
    target: Timestamp,
    pages: BTreeMap<u32, DeltaEntry>,
}

impl ReverseDelta {
    /// Creates an empty delta for `target`.
    #[must_use]
    pub fn new(target: Timestamp) -> Self {
        Self {
            target,
            pages: BTreeMap::new(),
        }
    }

    /// Scans every rollback log that can hold frames newer than `target` and
    /// keeps, per page, the entry with the smallest frame timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if a log cannot be listed, opened or parsed.
    pub fn collect(rollback: &RollbackLogger, target: Timestamp) -> Result<Self> {
        let mut delta = Self::new(target);
        let first_bucket = truncate_hour(target);

        for bucket in rollback.hour_buckets()? {
            if bucket < first_bucket {
                continue;
            }
            for location in rollback.reader(bucket).entry_locations_after(target)? {
                delta.insert(bucket, location);
            }
        }

        debug!(
            key = %rollback.key(),
            target,
            pages = delta.len(),
            "collected reverse delta"
        );
        Ok(delta)
    }

    /// Adds a candidate, keeping the earliest one per page.
    ///
    /// Candidates from frames at or before the target are ignored.
    pub fn insert(&mut self, bucket: Timestamp, location: EntryLocation) {
        if location.timestamp <= self.target {
            return;
        }

        let candidate = DeltaEntry { bucket, location };
        self.pages
            .entry(location.page_number)
            .and_modify(|current| {
                if candidate.precedes(current) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    /// Returns the target instant.
    #[must_use]
    pub fn target(&self) -> Timestamp {
        self.target
    }

    /// Returns the number of pages to restore.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if no page changed after the target.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Returns the chosen entry for `page_number`.
    #[must_use]
    pub fn get(&self, page_number: u32) -> Option<&DeltaEntry> {
        self.pages.get(&page_number)
    }

    /// Iterates over the pages in `[first, last]`, ascending.
    pub fn pages_between(
        &self,
        first: u32,
        last: u32,
    ) -> impl Iterator<Item = (u32, &DeltaEntry)> + '_ {
        self.pages
            .range(first..=last)
            .map(|(page_number, entry)| (*page_number, entry))
    }

    /// Reads and verifies the pre-image of one delta entry.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the entry is damaged or does not belong
    /// to the page it was indexed under.
    pub fn read_entry(rollback: &RollbackLogger, entry: &DeltaEntry) -> Result<RollbackLogEntry> {
        let decoded = rollback
            .reader(entry.bucket)
            .read_entry_at(entry.location.offset)?;

        if decoded.page_number != entry.location.page_number {
            return Err(RewindError::CorruptedLog(format!(
                "Entry at {} in bucket {} holds page {}, expected {}",
                entry.location.offset,
                entry.bucket,
                decoded.page_number,
                entry.location.page_number
            )));
        }

        Ok(decoded)
    }
}

/// Rebuilds the bytes of one range file as of the delta's target.
///
/// The current range content is sized to the pages of the range below
/// `page_count`, then every delta page in the range is overwritten with its
/// pre-image.
///
/// # Errors
///
/// Returns an error if the range or an entry cannot be read, or a pre-image
/// is not exactly one page.
pub fn reconstruct_range(
    store: &PageRangeStore,
    rollback: &RollbackLogger,
    delta: &ReverseDelta,
    range_number: u64,
    page_count: u32,
) -> Result<Vec<u8>> {
    let page_size = store.page_size();
    let first_page = first_page_of_range(range_number, store.range_max_pages());
    if first_page > u64::from(page_count) {
        return Ok(Vec::new());
    }

    let pages_in_range =
        (u64::from(page_count) - first_page + 1).min(u64::from(store.range_max_pages()));
    let last_page = first_page + pages_in_range - 1;

    let mut bytes = store.read_range(range_number)?;
    bytes.resize(pages_in_range as usize * page_size, 0);

    for (page_number, entry) in delta.pages_between(first_page as u32, last_page as u32) {
        let decoded = ReverseDelta::read_entry(rollback, entry)?;
        if decoded.data.len() != page_size {
            return Err(RewindError::CorruptedLog(format!(
                "Pre-image of page {page_number} has {} bytes, expected {page_size}",
                decoded.data.len()
            )));
        }

        let offset = (u64::from(page_number) - first_page) as usize * page_size;
        bytes[offset..offset + page_size].copy_from_slice(&decoded.data);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(page_number: u32, timestamp: Timestamp, offset: u64) -> EntryLocation {
        EntryLocation {
            page_number,
            timestamp,
            offset,
        }
    }

    #[test]
    fn test_keeps_minimal_timestamp_per_page() {
        let mut delta = ReverseDelta::new(100);
        delta.insert(0, location(1, 300, 10));
        delta.insert(0, location(1, 200, 500));
        delta.insert(0, location(1, 250, 20));
        delta.insert(0, location(2, 150, 30));

        assert_eq!(delta.len(), 2);
        assert_eq!(delta.get(1).unwrap().location.timestamp, 200);
        assert_eq!(delta.get(2).unwrap().location.offset, 30);
    }

    #[test]
    fn test_ignores_entries_at_or_before_target() {
        let mut delta = ReverseDelta::new(100);
        delta.insert(0, location(1, 100, 0));
        delta.insert(0, location(2, 50, 0));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_same_frame_keeps_first_entry() {
        let mut delta = ReverseDelta::new(0);
        delta.insert(0, location(7, 5, 200));
        delta.insert(0, location(7, 5, 100));
        assert_eq!(delta.get(7).unwrap().location.offset, 100);
    }

    #[test]
    fn test_pages_between() {
        let mut delta = ReverseDelta::new(0);
        for page in [1, 4, 5, 9] {
            delta.insert(0, location(page, 1, u64::from(page)));
        }
        let pages: Vec<u32> = delta.pages_between(4, 8).map(|(p, _)| p).collect();
        assert_eq!(pages, vec![4, 5]);
    }
}
