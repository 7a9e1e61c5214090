//! Owned spill chunks and their streaming readers.
//!
//! A `SpillChunk` exclusively owns its file. Sort views share chunks through
//! `Arc` between their cache and any live merge; when the last handle is
//! dropped the file is deleted. Readers hold an `Arc` too, so abandoning a
//! merge halfway still releases the chunk deterministically.

use std::collections::VecDeque;
use std::sync::Arc;

use tabula_core::types::Row;

use super::codec;
use super::segment::{SegmentHeader, SegmentMeta, HEADER_LEN, MAX_FRAME_BYTES};
use super::Storage;
use crate::error::{Error, Result};

pub struct SpillChunk {
    meta: SegmentMeta,
    storage: Arc<dyn Storage>,
}

impl SpillChunk {
    pub(crate) fn new(meta: SegmentMeta, storage: Arc<dyn Storage>) -> Self {
        Self { meta, storage }
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn rows(&self) -> u64 {
        self.meta.rows
    }

    /// Open a fresh reader positioned at the first row.
    pub fn reader(self: &Arc<Self>) -> ChunkReader {
        ChunkReader {
            chunk: Arc::clone(self),
            next_frame: 0,
            buffered: VecDeque::new(),
            failed: false,
        }
    }

    /// Checks that the file still has the length and tag it was written with.
    fn verify(&self) -> Result<()> {
        let path = &self.meta.path;
        let expected: u64 = self.meta.frames.iter().map(|f| f.total_len() as u64).sum();
        let actual = self.storage.size(path)?;
        if actual != expected {
            return Err(Error::Storage(format!(
                "{path}: chunk is {actual} bytes, expected {expected}"
            )));
        }
        if let Some(tag) = &self.meta.etag {
            if self.storage.etag(path)?.as_ref() != Some(tag) {
                return Err(Error::Storage(format!("{path}: chunk changed since it was written")));
            }
        }
        Ok(())
    }

    /// Read, verify and decode one frame.
    fn read_frame(&self, idx: usize) -> Result<Vec<Row>> {
        let frame = &self.meta.frames[idx];
        let bytes = self
            .storage
            .read_range(&self.meta.path, frame.offset, frame.total_len())?;
        if bytes.len() != frame.total_len() {
            return Err(Error::Storage(format!(
                "{}: frame {idx} truncated ({} of {} bytes)",
                self.meta.path,
                bytes.len(),
                frame.total_len()
            )));
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(&bytes);
        let computed: [u8; 32] = hasher.finalize().into();
        if computed != frame.checksum {
            return Err(Error::ChecksumMismatch {
                path: self.meta.path.clone(),
                frame: idx,
            });
        }

        let header = SegmentHeader::from_bytes(&bytes[..HEADER_LEN])?;
        header.validate_sizes(MAX_FRAME_BYTES, MAX_FRAME_BYTES)?;
        let payload = codec::decompress(header.codec, &bytes[HEADER_LEN..])?;

        serde_json::from_slice(&payload).map_err(|e| Error::Codec(format!("json deserialize: {e}")))
    }
}

impl Drop for SpillChunk {
    fn drop(&mut self) {
        match self.storage.delete(&self.meta.path) {
            Ok(()) => tracing::trace!(chunk = %self.meta.name.0, "deleted spill chunk"),
            Err(e) => {
                let chunk = &self.meta.name.0;
                tracing::warn!(%chunk, error = %e, "failed to delete spill chunk")
            }
        }
    }
}

impl std::fmt::Debug for SpillChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillChunk")
            .field("path", &self.meta.path)
            .field("rows", &self.meta.rows)
            .finish()
    }
}

/// Streams a chunk's rows back one frame at a time.
pub struct ChunkReader {
    chunk: Arc<SpillChunk>,
    next_frame: usize,
    buffered: VecDeque<Row>,
    failed: bool,
}

impl Iterator for ChunkReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(Ok(row));
            }
            if self.failed || self.next_frame >= self.chunk.meta.frames.len() {
                return None;
            }
            let idx = self.next_frame;
            self.next_frame += 1;
            let frame = match idx {
                0 => self.chunk.verify().and_then(|()| self.chunk.read_frame(idx)),
                _ => self.chunk.read_frame(idx),
            };
            match frame {
                Ok(rows) => self.buffered.extend(rows),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_storage::MapStorage;
    use super::super::{Codec, SpillManager};
    use super::*;
    use tabula_core::row;

    fn rows(n: i64) -> Vec<Row> {
        (0..n).map(|i| row![i, "x", 0.5]).collect()
    }

    #[test]
    fn reader_replays_all_rows_and_is_reopenable() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage, Codec::None, "/s").with_frame_rows(3);
        let chunk = Arc::new(mgr.write_run(&rows(7)).unwrap());

        let first: Vec<Row> = chunk.reader().collect::<Result<_>>().unwrap();
        let second: Vec<Row> = chunk.reader().collect::<Result<_>>().unwrap();
        assert_eq!(first, rows(7));
        assert_eq!(first, second);
    }

    #[test]
    fn file_deleted_when_last_handle_drops() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "/s");
        let chunk = Arc::new(mgr.write_run(&rows(4)).unwrap());

        let mut reader = chunk.reader();
        assert!(reader.next().is_some());
        drop(chunk);
        // The live reader keeps the chunk alive.
        assert_eq!(storage.files.lock().unwrap().len(), 1);
        assert_eq!(reader.by_ref().count(), 3);
        drop(reader);
        assert!(storage.files.lock().unwrap().is_empty());
    }

    #[test]
    fn truncated_chunk_fails_before_decoding() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "/s").with_frame_rows(1);
        let chunk = Arc::new(mgr.write_run(&rows(3)).unwrap());
        {
            let mut files = storage.files.lock().unwrap();
            let data = files.get_mut(&chunk.meta().path).unwrap();
            data.truncate(data.len() - 1);
        }
        let mut reader = chunk.reader();
        match reader.next() {
            Some(Err(Error::Storage(msg))) => assert!(msg.contains("expected")),
            other => panic!("expected a storage error, got {other:?}"),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn corrupted_frame_is_detected() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "/s");
        let chunk = Arc::new(mgr.write_run(&rows(2)).unwrap());
        {
            let mut files = storage.files.lock().unwrap();
            let data = files.get_mut(&chunk.meta().path).unwrap();
            let last = data.len() - 2;
            data[last] ^= 0x55;
        }
        let mut reader = chunk.reader();
        assert!(matches!(reader.next(), Some(Err(Error::ChecksumMismatch { .. }))));
        assert!(reader.next().is_none());
    }
}
