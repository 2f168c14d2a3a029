//! Page-range storage.
//!
//! A database branch is stored as a run of page-range files, each holding up
//! to `range_max_pages` consecutive fixed-size pages. Page numbers start at 1:
//!
//! ```text
//! range  = (page_number - 1) / range_max_pages + 1
//! offset = (page_number - 1) % range_max_pages * page_size
//! ```

mod metadata;
mod range_store;

pub use metadata::{DatabaseMetadata, METADATA_MAGIC, METADATA_VERSION};
pub use range_store::{PageRangeStore, PageWriteHook};

use crate::error::{Result, RewindError};

/// Where a page lives inside the page-range file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageLocation {
    /// Range file number (1-based).
    pub range_number: u64,
    /// Byte offset within the range file.
    pub offset: u64,
}

impl PageLocation {
    /// Locates `page_number` for the given geometry.
    ///
    /// # Errors
    ///
    /// Returns a validation error for page number 0.
    pub fn of(page_number: u32, page_size: usize, range_max_pages: u32) -> Result<Self> {
        if page_number == 0 {
            return Err(RewindError::ValidationError(
                "Page numbers start at 1".into(),
            ));
        }

        let index = u64::from(page_number - 1);
        let per_range = u64::from(range_max_pages);

        Ok(Self {
            range_number: index / per_range + 1,
            offset: (index % per_range) * page_size as u64,
        })
    }
}

/// Returns the first page number stored in `range_number`.
#[must_use]
pub fn first_page_of_range(range_number: u64, range_max_pages: u32) -> u64 {
    (range_number - 1) * u64::from(range_max_pages) + 1
}

/// Returns the number of range files needed to hold `page_count` pages.
#[must_use]
pub fn ranges_for_pages(page_count: u32, range_max_pages: u32) -> u64 {
    u64::from(page_count).div_ceil(u64::from(range_max_pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_location() {
        let loc = PageLocation::of(1, 4096, 4).unwrap();
        assert_eq!(loc, PageLocation { range_number: 1, offset: 0 });

        let loc = PageLocation::of(4, 4096, 4).unwrap();
        assert_eq!(loc, PageLocation { range_number: 1, offset: 3 * 4096 });

        let loc = PageLocation::of(5, 4096, 4).unwrap();
        assert_eq!(loc, PageLocation { range_number: 2, offset: 0 });
    }

    #[test]
    fn test_page_zero_rejected() {
        assert!(PageLocation::of(0, 4096, 4).is_err());
    }

    #[test]
    fn test_range_math() {
        assert_eq!(first_page_of_range(1, 4), 1);
        assert_eq!(first_page_of_range(3, 4), 9);
        assert_eq!(ranges_for_pages(0, 4), 0);
        assert_eq!(ranges_for_pages(4, 4), 1);
        assert_eq!(ranges_for_pages(5, 4), 2);
    }
}
