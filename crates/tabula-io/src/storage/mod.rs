//! Storage adapters implementing `tabula_mem::spill::Storage`.
//!
//! - `fs`: Local filesystem (default).
//! - `memory`: In-process map, selected by `memory://` URIs.
//!
//! Also exposes helper builders that choose the appropriate storage based on
//! the configured spill URI (e.g. `file:///tmp`, `memory://`).

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use tabula_core::config::{EngineConfig, StorageConfig};
use tabula_mem::{Codec, SpillManager, Storage};

use crate::error::{Error, Result};

/// Build the correct storage backend using the provided configuration.
pub fn build_storage_from_config(cfg: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match cfg.scheme() {
        Some("memory") | Some("mem") => Ok(Arc::new(MemoryStorage::new())),
        Some("file") | None => {
            // Default to filesystem (treat URI as file:// or bare path).
            Ok(Arc::new(FsStorage::new()))
        }
        Some(other) => Err(Error::Config(format!("unsupported spill scheme '{other}'"))),
    }
}

/// Build a spill manager (storage, codec, root, frame size) from engine config.
pub fn build_spill_manager(cfg: &EngineConfig) -> Result<SpillManager> {
    cfg.validate()
        .map_err(|e| Error::Config(e.to_string()))?;
    let storage_cfg = cfg.storage_config();
    let storage = build_storage_from_config(&storage_cfg)?;
    let codec: Codec = cfg.spill_codec.parse()?;
    Ok(SpillManager::new(storage, codec, storage_cfg.root).with_frame_rows(cfg.frame_rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selects_backend() {
        let mem = StorageConfig {
            uri: Some("memory://".into()),
            root: "memory:".into(),
        };
        assert!(build_storage_from_config(&mem).is_ok());

        let s3 = StorageConfig {
            uri: Some("s3://bucket/prefix".into()),
            root: "s3://bucket/prefix".into(),
        };
        assert!(matches!(build_storage_from_config(&s3), Err(Error::Config(_))));
    }

    #[test]
    fn spill_manager_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            spill_dir: dir.path().to_string_lossy().into_owned(),
            frame_rows: 8,
            ..EngineConfig::default()
        };
        let mgr = build_spill_manager(&cfg).unwrap();
        assert!(mgr.root_dir().starts_with(&cfg.spill_dir));

        let bad_codec = EngineConfig {
            spill_codec: "snappy".into(),
            ..cfg
        };
        assert!(matches!(build_spill_manager(&bad_codec), Err(Error::Spill(_))));
    }
}
