//! Engine configuration that downstream crates can serialize/deserialize.
//!
//! Operators take their defaults (sort buffer size, spill location, caching,
//! recast sampling) from an `EngineConfig`; each view can still override
//! individual settings through its builder methods.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows held in memory by a sort before spilling a chunk. `None` keeps
    /// every sort fully in memory.
    pub buffer_size: Option<usize>,

    /// Directory for spill files (legacy local-path configuration).
    pub spill_dir: String,

    /// Optional fully-qualified spill URI (e.g., `file:///tmp/x`, `memory://`).
    pub spill_uri: Option<String>,

    /// Spill compression: `none`, `zstd` or `lz4`.
    pub spill_codec: String,

    /// Rows per checksummed frame inside a spill chunk; bounds the rows a
    /// chunk reader holds at once during a merge.
    pub frame_rows: usize,

    /// Reuse sorted results and hash tables across scans when the source
    /// fingerprint is unchanged.
    pub cache: bool,

    /// Rows sampled by `recast` to discover output columns.
    pub recast_sample_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: Some(100_000),
            spill_dir: std::env::temp_dir()
                .join("tabula-spill")
                .to_string_lossy()
                .into_owned(),
            spill_uri: None,
            spill_codec: "none".to_string(),
            frame_rows: 1024,
            cache: true,
            recast_sample_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uri: Option<String>,
    pub root: String,
}

impl StorageConfig {
    pub fn scheme(&self) -> Option<&str> {
        self.uri
            .as_deref()
            .and_then(|uri| uri.split("://").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TABULA_BUFFER_SIZE`: sort buffer in rows (`none` = unbounded)
    /// - `TABULA_SPILL_DIR`: spill directory
    /// - `TABULA_SPILL_URI`: spill URI
    /// - `TABULA_SPILL_CODEC`: `none` | `zstd` | `lz4`
    /// - `TABULA_FRAME_ROWS`: rows per spill frame
    /// - `TABULA_CACHE`: `0`/`false` disables caching
    /// - `TABULA_RECAST_SAMPLE_SIZE`: recast sample rows
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TABULA_BUFFER_SIZE") {
            if s.eq_ignore_ascii_case("none") {
                cfg.buffer_size = None;
            } else if let Ok(v) = s.parse::<usize>() {
                cfg.buffer_size = Some(v);
            }
        }

        if let Ok(s) = std::env::var("TABULA_SPILL_DIR") {
            cfg.spill_dir = s;
        }

        if let Ok(s) = std::env::var("TABULA_SPILL_URI") {
            cfg.spill_uri = Some(s);
        }

        if let Ok(s) = std::env::var("TABULA_SPILL_CODEC") {
            cfg.spill_codec = s;
        }

        if let Ok(s) = std::env::var("TABULA_FRAME_ROWS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.frame_rows = v;
            }
        }

        if let Ok(s) = std::env::var("TABULA_CACHE") {
            cfg.cache = !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }

        if let Ok(s) = std::env::var("TABULA_RECAST_SAMPLE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.recast_sample_size = v;
            }
        }

        cfg
    }

    /// Reject settings no operator can run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == Some(0) {
            return Err(Error::Config("buffer_size must be at least 1 row".into()));
        }
        if self.frame_rows == 0 {
            return Err(Error::Config("frame_rows must be at least 1".into()));
        }
        if self.spill_dir.is_empty() && self.spill_uri.is_none() {
            return Err(Error::Config("no spill location configured".into()));
        }
        Ok(())
    }

    /// Produce a storage configuration snapshot used by the IO layer.
    pub fn storage_config(&self) -> StorageConfig {
        let scheme = self
            .spill_uri
            .as_deref()
            .and_then(|uri| uri.split("://").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let root = match (scheme.as_deref(), self.spill_uri.as_ref()) {
            (Some("file"), Some(uri)) => {
                file_uri_to_path(uri).unwrap_or_else(|| self.spill_dir.clone())
            }
            (Some(_), Some(uri)) => uri.trim_end_matches('/').to_string(),
            _ => self.spill_dir.clone(),
        };

        StorageConfig {
            uri: self.spill_uri.clone(),
            root,
        }
    }
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uri_becomes_storage_root() {
        let cfg = EngineConfig {
            spill_uri: Some("file:///var/tmp/spill".into()),
            ..EngineConfig::default()
        };
        let sc = cfg.storage_config();
        assert_eq!(sc.scheme(), Some("file"));
        assert_eq!(sc.root, "/var/tmp/spill");
    }

    #[test]
    fn bare_dir_has_no_scheme() {
        let cfg = EngineConfig {
            spill_dir: "/tmp/x".into(),
            ..EngineConfig::default()
        };
        let sc = cfg.storage_config();
        assert_eq!(sc.scheme(), None);
        assert_eq!(sc.root, "/tmp/x");
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let cfg = EngineConfig {
            buffer_size: Some(0),
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        assert!(EngineConfig::default().validate().is_ok());
    }
}
