use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tabula_mem::error::{Error as MemError, Result as MemResult};
use tabula_mem::Storage;

/// Suffix of a chunk that is still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// Spill storage on the local filesystem.
///
/// A chunk is written under a `.partial` name and renamed into place once
/// complete, so `list` never reports a half-written chunk. Deleting the last
/// chunk of a spill session also removes the session directory.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn fail(op: &str, path: &Path, e: io::Error) -> MemError {
    MemError::Storage(format!("{op} {}: {e}", path.display()))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        let target = Path::new(path);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|e| fail("create spill dir", dir, e))?;
        }
        let partial = partial_path(target);
        let mut f = File::create(&partial).map_err(|e| fail("create", &partial, e))?;
        f.write_all(bytes)
            .and_then(|()| f.sync_data())
            .map_err(|e| fail("write", &partial, e))?;
        fs::rename(&partial, target).map_err(|e| fail("publish", target, e))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let p = Path::new(path);
        let mut f = File::open(p).map_err(|e| fail("open", p, e))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| fail("seek", p, e))?;
        let mut buf = Vec::new();
        f.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| fail("read", p, e))?;
        Ok(buf)
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        let p = Path::new(path);
        match fs::remove_file(p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(fail("delete", p, e)),
        }
        if let Some(session) = p.parent() {
            // Only succeeds once the session holds no other chunk.
            let _ = fs::remove_dir(session);
        }
        Ok(())
    }

    /// Completed chunk files under `prefix`, searched recursively.
    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let root = Path::new(prefix);
        if root.is_file() {
            return Ok(vec![prefix.to_string()]);
        }
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(fail("list", &dir, e)),
            };
            for entry in entries {
                let path = entry.map_err(|e| fail("list", &dir, e))?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(s) = path.to_str() {
                    if !s.ends_with(PARTIAL_SUFFIX) {
                        found.push(s.to_string());
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        let p = Path::new(path);
        Ok(fs::metadata(p).map_err(|e| fail("stat", p, e))?.len())
    }

    /// Length and modification time; a rewritten chunk gets a new tag.
    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        let Ok(meta) = fs::metadata(path) else {
            return Ok(None);
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(Some(format!("fs-{:x}-{:x}", meta.len(), mtime)))
    }
}
