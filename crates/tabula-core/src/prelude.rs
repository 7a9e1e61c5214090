//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::Cachetag;
pub use crate::id::{SpillId, TableId};
pub use crate::key::{Key, KeyPositions, KeySpec};
pub use crate::row;
pub use crate::schema::{FieldRef, Header};
pub use crate::types::{Row, Value};
