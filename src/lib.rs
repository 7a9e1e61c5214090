#![forbid(unsafe_code)]
//! tabula: lazy relational operators over header-plus-rows tables.
//!
//! This umbrella crate re-exports the workspace crates so applications and
//! the integration tests under `tests/` can depend on a single package.

pub use tabula_core as core;
pub use tabula_io as io;
pub use tabula_mem as mem;
pub use tabula_operators as operators;

pub mod prelude {
    pub use tabula_core::prelude::*;
    pub use tabula_operators::prelude::*;
    pub use tabula_operators::prelude::Result;
}
