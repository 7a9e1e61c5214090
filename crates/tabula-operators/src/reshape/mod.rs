//! Reshaping between long and wide layouts.
//!
//! - `Melt`: one output row per (row, variable field).
//! - `Recast`: the inverse; output columns are discovered from a sample.
//! - `Pivot`: two-field recast with an aggregation, columns from a full scan.
//! - `Transpose`, `flatten`, `Unflatten`: structural reshapes.

pub mod melt;
pub mod pivot;
pub mod recast;
pub mod transpose;

pub use melt::Melt;
pub use pivot::Pivot;
pub use recast::{Recast, UnseenPolicy};
pub use transpose::{flatten, values_table, Transpose, Unflatten};

use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::Value;

use crate::traits::Result;

/// Header field name for a data value used as a column label.
pub(crate) fn label(value: &Value) -> String {
    value.to_string()
}

/// Positions of `fields`, or of every field not in `others` when `fields`
/// is not given.
pub(crate) fn positions_or_rest(
    header: &Header,
    fields: Option<&[FieldRef]>,
    others: &[usize],
) -> Result<Vec<usize>> {
    match fields {
        Some(fields) => Ok(header.resolve_all(fields)?),
        None => Ok((0..header.len()).filter(|p| !others.contains(p)).collect()),
    }
}
