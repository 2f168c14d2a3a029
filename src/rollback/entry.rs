//! Rollback log entry: one compressed page pre-image.
//!
//! ## Entry Format
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------------
//! 0       4     version
//! 4       4     page_number
//! 8       8     timestamp
//! 16      4     decompressed size
//! 20      4     compressed size
//! 24      20    SHA-1 of the compressed payload
//! 44      56    reserved (zero)
//! 100     n     Snappy-compressed page bytes
//! ```
//!
//! All integers are little-endian.

use sha1::{Digest, Sha1};

use crate::error::{Result, RewindError};
use crate::storage::File;
use crate::timestamp::Timestamp;

/// Current entry format version.
pub const ENTRY_VERSION: u32 = 1;

/// Size of the fixed entry header.
pub const ENTRY_HEADER_SIZE: usize = 100;

/// Largest decompressed payload accepted when decoding (16 MiB).
const MAX_DECOMPRESSED_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded fixed-size entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Format version.
    pub version: u32,
    /// Page the pre-image belongs to.
    pub page_number: u32,
    /// Timestamp of the write that overwrote the page.
    pub timestamp: Timestamp,
    /// Size of the page pre-image.
    pub size_decompressed: u32,
    /// Size of the compressed payload following the header.
    pub size_compressed: u32,
    /// SHA-1 of the compressed payload.
    pub sha1: [u8; 20],
}

impl EntryHeader {
    /// Decodes and sanity-checks a header.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for an unknown version or impossible sizes.
    pub fn decode(bytes: &[u8; ENTRY_HEADER_SIZE]) -> Result<Self> {
        let header = Self {
            version: read_u32(bytes, 0),
            page_number: read_u32(bytes, 4),
            timestamp: i64::from_le_bytes(bytes[8..16].try_into().unwrap_or_default()),
            size_decompressed: read_u32(bytes, 16),
            size_compressed: read_u32(bytes, 20),
            sha1: bytes[24..44].try_into().unwrap_or_default(),
        };

        if header.version == 0 || header.version > ENTRY_VERSION {
            return Err(RewindError::CorruptedLog(format!(
                "Unsupported rollback entry version {}",
                header.version
            )));
        }

        if header.size_decompressed > MAX_DECOMPRESSED_SIZE
            || header.size_compressed as usize
                > snap::raw::max_compress_len(header.size_decompressed as usize)
        {
            return Err(RewindError::CorruptedLog(format!(
                "Impossible entry sizes for page {}: compressed {}, decompressed {}",
                header.page_number, header.size_compressed, header.size_decompressed
            )));
        }

        Ok(header)
    }

    fn encode(&self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut bytes = [0u8; ENTRY_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.page_number.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.size_decompressed.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.size_compressed.to_le_bytes());
        bytes[24..44].copy_from_slice(&self.sha1);
        bytes
    }

    /// Returns the total encoded length of the entry.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64 + u64::from(self.size_compressed)
    }
}

/// A page pre-image captured before the page was overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackLogEntry {
    /// Format version.
    pub version: u32,
    /// Page the pre-image belongs to.
    pub page_number: u32,
    /// Timestamp of the write that overwrote the page.
    pub timestamp: Timestamp,
    /// Decompressed page pre-image.
    pub data: Vec<u8>,
    /// SHA-1 of the compressed payload; filled in by [`serialize`](Self::serialize).
    pub sha1: [u8; 20],
    /// Compressed payload size; filled in by [`serialize`](Self::serialize).
    pub size_compressed: u32,
    /// Size of `data`.
    pub size_decompressed: u32,
}

impl RollbackLogEntry {
    /// Creates an entry for a page pre-image.
    #[must_use]
    pub fn new(page_number: u32, timestamp: Timestamp, data: Vec<u8>) -> Self {
        Self {
            version: ENTRY_VERSION,
            page_number,
            timestamp,
            size_decompressed: data.len() as u32,
            data,
            sha1: [0u8; 20],
            size_compressed: 0,
        }
    }

    /// Serializes the entry into `buf`, replacing its contents.
    ///
    /// Compresses the pre-image with `encoder` and records the compressed
    /// size and checksum on the entry. Returns the encoded length.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn serialize(
        &mut self,
        encoder: &mut snap::raw::Encoder,
        buf: &mut Vec<u8>,
    ) -> Result<usize> {
        let header = Self::encode_page(self.page_number, self.timestamp, &self.data, encoder, buf)?;
        self.size_compressed = header.size_compressed;
        self.size_decompressed = header.size_decompressed;
        self.sha1 = header.sha1;
        Ok(buf.len())
    }

    /// Encodes a borrowed page pre-image into `buf`, replacing its contents.
    ///
    /// Produces the same bytes as [`serialize`](Self::serialize) without
    /// copying the page into an entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode_page(
        page_number: u32,
        timestamp: Timestamp,
        data: &[u8],
        encoder: &mut snap::raw::Encoder,
        buf: &mut Vec<u8>,
    ) -> Result<EntryHeader> {
        buf.clear();
        buf.resize(ENTRY_HEADER_SIZE + snap::raw::max_compress_len(data.len()), 0);

        let compressed_len = encoder
            .compress(data, &mut buf[ENTRY_HEADER_SIZE..])
            .map_err(|e| {
                RewindError::StorageError(format!("Failed to compress page {page_number}: {e}"))
            })?;
        buf.truncate(ENTRY_HEADER_SIZE + compressed_len);

        let header = EntryHeader {
            version: ENTRY_VERSION,
            page_number,
            timestamp,
            size_decompressed: data.len() as u32,
            size_compressed: compressed_len as u32,
            sha1: Sha1::digest(&buf[ENTRY_HEADER_SIZE..]).into(),
        };
        buf[..ENTRY_HEADER_SIZE].copy_from_slice(&header.encode());

        Ok(header)
    }

    /// Deserializes an entry from its encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::ChecksumMismatch`] if the payload does not match
    /// its checksum, or another corruption error if the bytes are malformed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header_bytes: &[u8; ENTRY_HEADER_SIZE] = bytes
            .get(..ENTRY_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| RewindError::CorruptedLog("Truncated rollback entry header".into()))?;
        let header = EntryHeader::decode(header_bytes)?;

        let payload = bytes
            .get(ENTRY_HEADER_SIZE..header.encoded_len() as usize)
            .ok_or_else(|| {
                RewindError::CorruptedLog(format!(
                    "Truncated payload for page {}",
                    header.page_number
                ))
            })?;

        Self::from_parts(header, payload)
    }

    /// Reads and decodes the entry stored at `offset` of `file`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is short, or a corruption error.
    pub fn read_at(file: &dyn File, offset: u64) -> Result<Self> {
        let header = read_header_at(file, offset)?;

        let mut payload = vec![0u8; header.size_compressed as usize];
        file.read_exact_at(&mut payload, offset + ENTRY_HEADER_SIZE as u64)
            .map_err(|e| RewindError::io(format!("reading rollback entry at {offset}"), e))?;

        Self::from_parts(header, &payload)
    }

    fn from_parts(header: EntryHeader, payload: &[u8]) -> Result<Self> {
        let digest: [u8; 20] = Sha1::digest(payload).into();
        if digest != header.sha1 {
            return Err(RewindError::ChecksumMismatch {
                page_number: header.page_number,
                timestamp: header.timestamp,
            });
        }

        let data = snap::raw::Decoder::new().decompress_vec(payload).map_err(|e| {
            RewindError::Decompression(format!("page {}: {e}", header.page_number))
        })?;

        if data.len() != header.size_decompressed as usize {
            return Err(RewindError::Decompression(format!(
                "page {}: expected {} bytes, got {}",
                header.page_number,
                header.size_decompressed,
                data.len()
            )));
        }

        Ok(Self {
            version: header.version,
            page_number: header.page_number,
            timestamp: header.timestamp,
            data,
            sha1: header.sha1,
            size_compressed: header.size_compressed,
            size_decompressed: header.size_decompressed,
        })
    }

    /// Returns the fixed header describing this entry.
    #[must_use]
    pub fn header(&self) -> EntryHeader {
        EntryHeader {
            version: self.version,
            page_number: self.page_number,
            timestamp: self.timestamp,
            size_decompressed: self.size_decompressed,
            size_compressed: self.size_compressed,
            sha1: self.sha1,
        }
    }
}

/// Reads and decodes the entry header stored at `offset` of `file`.
///
/// # Errors
///
/// Returns an I/O error if the file is short, or a corruption error.
pub fn read_header_at(file: &dyn File, offset: u64) -> Result<EntryHeader> {
    let mut bytes = [0u8; ENTRY_HEADER_SIZE];
    file.read_exact_at(&mut bytes, offset)
        .map_err(|e| RewindError::io(format!("reading rollback entry header at {offset}"), e))?;
    EntryHeader::decode(&bytes)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
