//! Spill manager for external sort.
//!
//! Orchestrates writing sorted runs of rows to storage as framed, checksummed
//! chunks, and hands back `SpillChunk` handles that can be re-opened for
//! replay any number of times.

pub mod chunk;
pub mod codec;
pub mod segment;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tabula_core::id::SpillId;
use tabula_core::types::Row;

use crate::error::{Error, Result};

pub use chunk::{ChunkReader, SpillChunk};
pub use codec::Codec;
pub use segment::{FrameMeta, SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN};

/// Abstract storage interface for spill chunks.
///
/// Implemented by `tabula-io::FsStorage` for the local filesystem and by
/// `tabula-io::MemoryStorage` for tests.
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a byte range from a path. Returns exactly `len` bytes or error.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// Completed chunk paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;

    /// Tag that changes whenever the bytes at `path` are rewritten; `None`
    /// when the path is absent or the backend cannot tell.
    fn etag(&self, path: &str) -> Result<Option<String>>;
}

/// Central manager for spilling sorted runs to temporary storage.
///
/// Responsibilities:
/// - Split a run into frames, serialize/compress each with a checksum
/// - Name chunks uniquely within a per-manager session directory
/// - Return owning `SpillChunk` handles; the chunk deletes its file on drop
pub struct SpillManager {
    storage: Arc<dyn Storage>,
    codec: Codec,
    root_dir: String,
    spill_id: SpillId,
    next_run: AtomicU32,
    frame_rows: usize,
}

impl SpillManager {
    /// Create a new SpillManager writing under `root_dir/<session-uuid>`.
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, root_dir: impl Into<String>) -> Self {
        let root: String = root_dir.into();
        let session = uuid::Uuid::new_v4();
        Self {
            storage,
            codec,
            root_dir: format!("{}/{}", root.trim_end_matches('/'), session),
            spill_id: SpillId::fresh(),
            next_run: AtomicU32::new(0),
            frame_rows: 1024,
        }
    }

    /// Rows per frame; a chunk reader decodes one frame at a time.
    pub fn with_frame_rows(mut self, frame_rows: usize) -> Self {
        self.frame_rows = frame_rows.max(1);
        self
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// Generate a unique run index for this spill session.
    pub fn next_run_index(&self) -> u32 {
        self.next_run.fetch_add(1, Ordering::Relaxed)
    }

    /// Write an already-sorted run of rows as a new chunk.
    ///
    /// Steps per frame:
    /// 1. Serialize the frame's rows with serde_json
    /// 2. Compress payload with configured codec
    /// 3. Create SegmentHeader
    /// 4. Compute BLAKE3 checksum over header + compressed payload
    ///
    /// The frames are then written to storage in one call.
    pub fn write_run(&self, rows: &[Row]) -> Result<SpillChunk> {
        let name = SegmentName::new(self.spill_id, self.next_run_index());
        let path = format!("{}/{}.seg", self.root_dir, name.0);

        let mut file = Vec::new();
        let mut frames = Vec::with_capacity(rows.len() / self.frame_rows + 1);
        for frame_rows in rows.chunks(self.frame_rows) {
            let uncompressed = serde_json::to_vec(frame_rows)
                .map_err(|e| Error::Codec(format!("json serialize: {e}")))?;
            let compressed = codec::compress(self.codec, &uncompressed)?;

            let header =
                SegmentHeader::new(self.codec, uncompressed.len() as u64, compressed.len() as u64);
            let header_bytes = header.to_bytes();

            let mut hasher = blake3::Hasher::new();
            hasher.update(&header_bytes);
            hasher.update(&compressed);

            frames.push(FrameMeta {
                offset: file.len() as u64,
                compressed_len: compressed.len() as u64,
                rows: frame_rows.len() as u32,
                checksum: hasher.finalize().into(),
            });
            file.extend_from_slice(&header_bytes);
            file.extend_from_slice(&compressed);
        }

        self.storage.write(&path, &file)?;
        let etag = self.storage.etag(&path).ok().flatten();

        tracing::debug!(
            chunk = %name.0,
            rows = rows.len(),
            frames = frames.len(),
            bytes = file.len(),
            "spilled sorted run"
        );

        let meta = SegmentMeta {
            name,
            path,
            codec: self.codec,
            rows: rows.len() as u64,
            frames,
            etag,
        };
        Ok(SpillChunk::new(meta, Arc::clone(&self.storage)))
    }

    /// Paths of chunk files currently present in this session.
    pub fn list_chunks(&self) -> Result<Vec<String>> {
        self.storage.list(&self.root_dir)
    }
}

impl std::fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillManager")
            .field("root_dir", &self.root_dir)
            .field("codec", &self.codec)
            .field("frame_rows", &self.frame_rows)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_storage {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::Storage;
    use crate::error::{Error, Result};

    /// Minimal map-backed storage for unit tests.
    #[derive(Default)]
    pub struct MapStorage {
        pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl Storage for MapStorage {
        fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
            self.files.lock().unwrap().insert(path.into(), bytes.to_vec());
            Ok(())
        }

        fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
            let files = self.files.lock().unwrap();
            let data = files
                .get(path)
                .ok_or_else(|| Error::Storage(format!("path not found: {path}")))?;
            let start = offset as usize;
            let end = (start + len).min(data.len());
            Ok(data[start..end].to_vec())
        }

        fn delete(&self, path: &str) -> Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        fn size(&self, path: &str) -> Result<u64> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|d| d.len() as u64)
                .ok_or_else(|| Error::Storage(format!("path not found: {path}")))
        }

        fn etag(&self, _path: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_storage::MapStorage;
    use super::*;
    use tabula_core::row;

    #[test]
    fn write_run_splits_into_frames() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "/spill").with_frame_rows(2);
        let rows: Vec<Row> = (0..5).map(|i| row![i, format!("r{i}")]).collect();
        let chunk = mgr.write_run(&rows).unwrap();

        assert_eq!(chunk.meta().rows, 5);
        assert_eq!(chunk.meta().frames.len(), 3);
        assert!(chunk.meta().path.starts_with(mgr.root_dir()));
        assert_eq!(mgr.list_chunks().unwrap().len(), 1);
    }

    #[test]
    fn run_names_are_unique_per_manager() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage, Codec::None, "/spill");
        let a = mgr.write_run(&[row![1]]).unwrap();
        let b = mgr.write_run(&[row![2]]).unwrap();
        assert_ne!(a.meta().path, b.meta().path);
    }
}
