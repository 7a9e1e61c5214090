#![forbid(unsafe_code)]
//! tabula-mem: spill chunks and the spill manager used by external sort.
//!
//! A sort that outgrows its row buffer writes each sorted buffer as a spill
//! chunk: a file of checksummed, optionally compressed frames. Chunks are
//! re-openable for replay and delete their file when the last `Arc` to them
//! is dropped.
//!
//! No filesystem code lives here. A generic `Storage` trait is exposed
//! (in `spill::`) and implemented by `tabula-io`.

pub mod error;
pub mod spill;

pub use error::{Error, Result};
pub use spill::{ChunkReader, Codec, SpillChunk, SpillManager, Storage};
