//! In-memory storage backend.
//!
//! Provides a HashMap-based storage that implements the Storage trait.
//! Used for the `memory://` spill URI and in tests to avoid file I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tabula_mem::error::{Error as MemError, Result as MemResult};
use tabula_mem::Storage;

/// Thread-safe in-memory storage using a HashMap.
#[derive(Clone)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn map(&self) -> MemResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| MemError::Storage("memory storage lock poisoned".into()))
    }

    /// Check if a path exists
    pub fn contains(&self, path: &str) -> bool {
        self.map().map(|d| d.contains_key(path)).unwrap_or(false)
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.map().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        let mut data = self.map()?;
        data.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let data = self.map()?;
        let bytes = data
            .get(path)
            .ok_or_else(|| MemError::Storage(format!("path not found: {}", path)))?;

        let start = offset as usize;
        let end = (start + len).min(bytes.len());

        if start >= bytes.len() {
            return Err(MemError::Storage(format!(
                "offset {} exceeds size {}",
                offset,
                bytes.len()
            )));
        }

        Ok(bytes[start..end].to_vec())
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        let mut data = self.map()?;
        data.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let data = self.map()?;
        let mut result: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        let data = self.map()?;
        let bytes = data
            .get(path)
            .ok_or_else(|| MemError::Storage(format!("path not found: {}", path)))?;
        Ok(bytes.len() as u64)
    }

    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        // Content hash; cheap enough for spill-sized objects.
        let data = self.map()?;
        Ok(data
            .get(path)
            .map(|bytes| format!("mem-{}", blake3::hash(bytes).to_hex())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_write_read() {
        let storage = MemoryStorage::new();
        let path = "test/file.txt";
        let data = b"hello world";

        storage.write(path, data).unwrap();
        let read_data = storage.read_range(path, 0, data.len()).unwrap();

        assert_eq!(read_data, data);
    }

    #[test]
    fn test_memory_storage_read_range() {
        let storage = MemoryStorage::new();
        let path = "test/file.txt";
        let data = b"hello world";

        storage.write(path, data).unwrap();

        // Read partial range
        let partial = storage.read_range(path, 6, 5).unwrap();
        assert_eq!(partial, b"world");
    }

    #[test]
    fn test_memory_storage_delete() {
        let storage = MemoryStorage::new();
        let path = "test/file.txt";

        storage.write(path, b"data").unwrap();
        assert!(storage.contains(path));

        storage.delete(path).unwrap();
        assert!(!storage.contains(path));
    }

    #[test]
    fn test_memory_storage_list() {
        let storage = MemoryStorage::new();

        storage.write("spill/a/run0.seg", b"1").unwrap();
        storage.write("spill/a/run1.seg", b"2").unwrap();
        storage.write("spill/b/run0.seg", b"3").unwrap();

        let files = storage.list("spill/a/").unwrap();
        assert_eq!(
            files,
            vec!["spill/a/run0.seg".to_string(), "spill/a/run1.seg".to_string()]
        );
    }

    #[test]
    fn test_memory_storage_etag_tracks_content() {
        let storage = MemoryStorage::new();
        storage.write("x", b"one").unwrap();
        let first = storage.etag("x").unwrap();
        storage.write("x", b"two").unwrap();
        assert_ne!(first, storage.etag("x").unwrap());
        assert_eq!(storage.etag("missing").unwrap(), None);
        assert_eq!(storage.size("x").unwrap(), 3);
    }
}
