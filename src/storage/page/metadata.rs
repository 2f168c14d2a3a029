//! Persisted page metadata for a page-range file set.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewindError};

/// Magic bytes for metadata file identification.
pub const METADATA_MAGIC: &[u8; 8] = b"RWNDMETA";

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// Metadata stored beside the page-range files of one database branch.
///
/// Holds the logical page count, which may be lower than what the range
/// files physically contain until they are truncated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseMetadata {
    /// Magic bytes ("RWNDMETA").
    pub magic: [u8; 8],
    /// Metadata format version.
    pub version: u32,
    /// Page size the ranges were written with.
    pub page_size: u32,
    /// Number of pages in the database.
    pub page_count: u32,
    /// CRC32 checksum of the metadata (excluding this field).
    pub checksum: u32,
}

impl DatabaseMetadata {
    /// Creates metadata for an empty database.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        let mut metadata = Self {
            magic: *METADATA_MAGIC,
            version: METADATA_VERSION,
            page_size: page_size as u32,
            page_count: 0,
            checksum: 0,
        };
        metadata.update_checksum();
        metadata
    }

    /// Sets the page count and refreshes the checksum.
    pub fn set_page_count(&mut self, page_count: u32) {
        self.page_count = page_count;
        self.update_checksum();
    }

    /// Computes the checksum for this metadata.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = *self;
        copy.checksum = 0;

        if let Ok(bytes) = bincode::serialize(&copy) {
            crc32fast::hash(&bytes)
        } else {
            0
        }
    }

    /// Updates the checksum field.
    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Validates magic, version and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if any of them do not match.
    pub fn validate(&self) -> Result<()> {
        if self.magic != *METADATA_MAGIC {
            return Err(RewindError::InvalidMetadata("Invalid metadata magic bytes".into()));
        }

        if self.version > METADATA_VERSION {
            return Err(RewindError::InvalidMetadata(format!(
                "Unsupported metadata version: {} (max supported: {})",
                self.version, METADATA_VERSION
            )));
        }

        if self.checksum != self.compute_checksum() {
            return Err(RewindError::InvalidMetadata("Metadata checksum mismatch".into()));
        }

        Ok(())
    }

    /// Serializes the metadata to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            RewindError::StorageError(format!("Failed to serialize metadata: {e}"))
        })
    }

    /// Deserializes and validates metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid metadata.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let metadata: Self = bincode::deserialize(data).map_err(|e| {
            RewindError::InvalidMetadata(format!("Failed to deserialize metadata: {e}"))
        })?;
        metadata.validate()?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut metadata = DatabaseMetadata::new(4096);
        metadata.set_page_count(17);

        let bytes = metadata.serialize().unwrap();
        let restored = DatabaseMetadata::deserialize(&bytes).unwrap();
        assert_eq!(restored, metadata);
        assert_eq!(restored.page_count, 17);
    }

    #[test]
    fn test_stale_checksum_rejected() {
        let mut metadata = DatabaseMetadata::new(4096);
        metadata.page_count = 5;
        assert!(matches!(
            metadata.validate(),
            Err(RewindError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut metadata = DatabaseMetadata::new(4096);
        metadata.magic = [0u8; 8];
        metadata.update_checksum();
        assert!(metadata.validate().is_err());
    }
}
