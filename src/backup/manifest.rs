//! Backup manifest: the descriptor persisted beside the backup parts.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewindError};
use crate::key::DatabaseKey;
use crate::snapshot::RestorePoint;

/// Magic bytes for manifest identification.
pub const MANIFEST_MAGIC: &[u8; 8] = b"RWNDBKUP";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// File name of the manifest inside a backup directory.
pub const MANIFEST_FILE_NAME: &str = "manifest";

/// One part file of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPart {
    /// Position of the part in the database image.
    pub index: u32,
    /// Part file name.
    pub name: String,
    /// Part size in bytes.
    pub size: u64,
    /// CRC32 of the part content.
    pub crc32: u32,
}

/// Persisted description of a completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Magic bytes ("RWNDBKUP").
    pub magic: [u8; 8],
    /// Manifest format version.
    pub version: u32,
    /// Branch the backup was taken from.
    pub key: DatabaseKey,
    /// State the backup captures.
    pub restore_point: RestorePoint,
    /// Page size of the database image.
    pub page_size: u32,
    /// Upper bound on part size.
    pub max_part_size: u64,
    /// Parts in image order.
    pub parts: Vec<BackupPart>,
    /// CRC32 of the manifest (excluding this field).
    pub checksum: u32,
}

impl BackupManifest {
    /// Creates a manifest with a fresh checksum.
    #[must_use]
    pub fn new(
        key: DatabaseKey,
        restore_point: RestorePoint,
        page_size: usize,
        max_part_size: u64,
        parts: Vec<BackupPart>,
    ) -> Self {
        let mut manifest = Self {
            magic: *MANIFEST_MAGIC,
            version: MANIFEST_VERSION,
            key,
            restore_point,
            page_size: page_size as u32,
            max_part_size,
            parts,
            checksum: 0,
        };
        manifest.checksum = manifest.compute_checksum();
        manifest
    }

    /// Returns the total size of the backed-up image.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.parts.iter().map(|part| part.size).sum()
    }

    fn compute_checksum(&self) -> u32 {
        let mut copy = self.clone();
        copy.checksum = 0;

        if let Ok(bytes) = bincode::serialize(&copy) {
            crc32fast::hash(&bytes)
        } else {
            0
        }
    }

    /// Validates magic, version, checksum and that the parts add up to the
    /// restore point's size.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidMetadata`] on any mismatch.
    pub fn validate(&self) -> Result<()> {
        if self.magic != *MANIFEST_MAGIC {
            return Err(RewindError::InvalidMetadata("Invalid manifest magic bytes".into()));
        }

        if self.version > MANIFEST_VERSION {
            return Err(RewindError::InvalidMetadata(format!(
                "Unsupported manifest version: {} (max supported: {})",
                self.version, MANIFEST_VERSION
            )));
        }

        if self.checksum != self.compute_checksum() {
            return Err(RewindError::InvalidMetadata("Manifest checksum mismatch".into()));
        }

        let expected = self.restore_point.database_size(self.page_size as usize);
        if self.size() != expected {
            return Err(RewindError::InvalidMetadata(format!(
                "Backup parts hold {} bytes, restore point needs {expected}",
                self.size()
            )));
        }

        Ok(())
    }

    /// Serializes the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            RewindError::StorageError(format!("Failed to serialize backup manifest: {e}"))
        })
    }

    /// Deserializes and validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid manifest.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let manifest: Self = bincode::deserialize(data).map_err(|e| {
            RewindError::InvalidMetadata(format!("Failed to deserialize backup manifest: {e}"))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }
}
