#![forbid(unsafe_code)]
//! tabula-operators: lazy relational operators over row tables.
//!
//! Every operator is a view implementing `Table`: constructing one reads
//! nothing, and each `scan` re-derives the output from the sources.
//!
//! - `sort`: external merge sort with spill to `tabula-mem` chunks.
//! - `merge`: k-way merge of sorted streams.
//! - `join`: sort-merge and hash joins, set operators, cross join.
//! - `aggregate`, `dedup`: group-wise operators over key-sorted input.
//! - `reshape`: melt/recast/pivot/transpose.
//!
//! Operators that need sorted input sort it themselves unless told the
//! input is presorted.

pub mod traits;

pub mod cat;
pub mod source;

pub mod group;
pub mod merge;
pub mod sort;

pub mod aggregate;
pub mod dedup;
pub mod join;
pub mod reshape;

pub mod ext;
pub mod prelude;

pub use ext::TableExt;
pub use traits::{materialize, OpError, Result, RowStream, Scan, Table, TableRef};
