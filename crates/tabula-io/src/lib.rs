#![forbid(unsafe_code)]
//! tabula-io: temporary-storage backends for spill chunks.
//!
//! Concrete table sources and sinks (delimited files, databases, ...) are not
//! part of this workspace; they feed operators through the `Table` trait.
//! What lives here is the storage the external sort spills into:
//! - `FsStorage`: local filesystem (default).
//! - `MemoryStorage`: map-backed, for tests and `memory://` URIs.

pub mod error;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{build_spill_manager, build_storage_from_config, FsStorage, MemoryStorage};
