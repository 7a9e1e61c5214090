#![forbid(unsafe_code)]
//! tabula-core: the value model shared by every tabula crate.
//!
//! - `types`: the tagged `Value` with one canonical cross-type total order.
//! - `schema`: headers and field references.
//! - `key`: key specs, resolution to positions, and key extraction.
//! - `config`: engine configuration (buffer sizes, spill location, caching).
//! - `hash`: blake3 fingerprints used as cachetags.
//!
//! No I/O lives here; spill storage is in `tabula-mem`/`tabula-io`.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod key;
pub mod prelude;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
