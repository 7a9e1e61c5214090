//! Spill frame header and chunk metadata.
//!
//! A spill chunk is a sequence of frames. Layout of each frame on disk:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ]
//!
//! The payload is a JSON array of rows. A per-frame checksum is computed over
//! (header || payload) using blake3 and kept in `FrameMeta`.

use serde::{Deserialize, Serialize};

use super::Codec;
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5442_4C41; // "TBLA"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;

/// Sanity limit applied to frame sizes read back from storage.
pub const MAX_FRAME_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u16,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl SegmentHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            codec,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.codec as u8);
        out.push(0u8); // reserved
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short header".into()));
        }
        let magic = u32::from_le_bytes(le_array(&bytes[0..4])?);
        let version = u16::from_le_bytes(le_array(&bytes[4..6])?);
        let codec = Codec::from_u8(bytes[6])?;
        // bytes[7] reserved
        let uncompressed_len = u64::from_le_bytes(le_array(&bytes[8..16])?);
        let compressed_len = u64::from_le_bytes(le_array(&bytes[16..24])?);

        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage("bad magic/version".into()));
        }

        Ok(Self { magic, version, codec, uncompressed_len, compressed_len })
    }

    /// Validate that the sizes in the header are reasonable.
    /// This prevents excessive allocations from corrupted data.
    pub fn validate_sizes(&self, max_uncompressed: u64, max_compressed: u64) -> Result<()> {
        if self.uncompressed_len > max_uncompressed {
            return Err(Error::Storage(format!(
                "uncompressed_len {} exceeds max {}",
                self.uncompressed_len, max_uncompressed
            )));
        }
        if self.compressed_len > max_compressed {
            return Err(Error::Storage(format!(
                "compressed_len {} exceeds max {}",
                self.compressed_len, max_compressed
            )));
        }
        Ok(())
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Storage("truncated header field".into()))
}

/// Human-friendly name for a chunk, derived from a spill id and a run index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: tabula_core::id::SpillId, run_index: u32) -> Self {
        SegmentName(format!("spill{}_run{}", id.get(), run_index))
    }
}

/// Location and integrity data of one frame within a chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub offset: u64,
    pub compressed_len: u64,
    pub rows: u32,
    pub checksum: [u8; 32],
}

impl FrameMeta {
    /// Bytes occupied on disk, header included.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.compressed_len as usize
    }
}

/// Metadata the engine keeps for a spilled chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub codec: Codec,
    pub rows: u64,
    pub frames: Vec<FrameMeta>,
    pub etag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_rejects_bad_magic() {
        let h = SegmentHeader::new(Codec::None, 10, 10);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let back = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back.uncompressed_len, 10);

        let mut bad = bytes.clone();
        bad[0] ^= 0xff;
        assert!(SegmentHeader::from_bytes(&bad).is_err());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let h = SegmentHeader::new(Codec::None, MAX_FRAME_BYTES + 1, 4);
        assert!(h.validate_sizes(MAX_FRAME_BYTES, MAX_FRAME_BYTES).is_err());
    }
}
