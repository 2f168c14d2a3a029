//! Rollback log frame: the atomic-commit envelope around a batch of entries.
//!
//! ## Frame Header (32 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------------
//! 0       4     magic ("RBFR")
//! 4       4     committed (0 or 1)
//! 8       8     offset of this header in the log
//! 16      8     size of the frame including this header
//! 24      8     timestamp
//! ```
//!
//! A frame is appended uncommitted with size 0, followed by its entries, and
//! rewritten in place with `committed = 1` and the final size once every entry
//! is durable. Readers pass over uncommitted frames; one that runs to the end
//! of the log is the in-flight frame, or the debris of a crash.

use crate::error::{Result, RewindError};
use crate::timestamp::Timestamp;

/// Magic bytes identifying a frame header.
pub const FRAME_MAGIC: &[u8; 4] = b"RBFR";

/// Size of an encoded frame header.
pub const FRAME_HEADER_SIZE: usize = 32;

/// Header of one frame in a rollback log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackLogFrame {
    /// Whether every entry of the frame is durable and visible.
    pub committed: bool,
    /// Offset of the frame header in the log.
    pub offset: u64,
    /// Size of the frame (header plus entries); 0 until committed.
    pub size: u64,
    /// Timestamp of the write batch the frame covers.
    pub timestamp: Timestamp,
}

impl RollbackLogFrame {
    /// Creates an open (uncommitted) frame at `offset`.
    #[must_use]
    pub fn open(offset: u64, timestamp: Timestamp) -> Self {
        Self {
            committed: false,
            offset,
            size: 0,
            timestamp,
        }
    }

    /// Encodes the frame header.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0..4].copy_from_slice(FRAME_MAGIC);
        bytes[4..8].copy_from_slice(&u32::from(self.committed).to_le_bytes());
        bytes[8..16].copy_from_slice(&self.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.size.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }

    /// Decodes a frame header.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the magic or committed flag is invalid.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        if &bytes[0..4] != FRAME_MAGIC {
            return Err(RewindError::CorruptedLog(
                "Invalid rollback frame magic bytes".into(),
            ));
        }

        let committed = match u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) {
            0 => false,
            1 => true,
            other => {
                return Err(RewindError::CorruptedLog(format!(
                    "Invalid rollback frame commit flag {other}"
                )))
            }
        };

        let word = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            b
        };

        Ok(Self {
            committed,
            offset: u64::from_le_bytes(word(8)),
            size: u64::from_le_bytes(word(16)),
            timestamp: i64::from_le_bytes(word(24)),
        })
    }

    /// Returns the offset one past the end of a committed frame.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = RollbackLogFrame {
            committed: true,
            offset: 4096,
            size: 1234,
            timestamp: -5,
        };
        let decoded = RollbackLogFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.end(), 4096 + 1234);
    }

    #[test]
    fn test_open_frame_is_uncommitted() {
        let frame = RollbackLogFrame::open(64, 10);
        let bytes = frame.encode();
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[16..24], &[0u8; 8]);
        assert!(!RollbackLogFrame::decode(&bytes).unwrap().committed);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = RollbackLogFrame::open(0, 1).encode();
        bytes[0] = b'X';
        assert!(matches!(
            RollbackLogFrame::decode(&bytes),
            Err(RewindError::CorruptedLog(_))
        ));
    }

    #[test]
    fn test_bad_commit_flag() {
        let mut bytes = RollbackLogFrame::open(0, 1).encode();
        bytes[4] = 7;
        assert!(RollbackLogFrame::decode(&bytes).is_err());
    }
}
