//! Run generation utilities for external sort.
//!
//! Sorts buffers of rows in memory (stable, keyed once per row) and writes
//! them to spill as chunks.

use std::cmp::Ordering;
use std::sync::Arc;

use tabula_core::key::{Key, KeyPositions};
use tabula_core::types::Row;
use tabula_mem::{SpillChunk, SpillManager};

use crate::traits::Result;

/// Stable sort of `rows` by the key at `positions`.
///
/// Keys are extracted once per row. Descending order uses a reversed
/// comparator rather than reversing the output, so equal keys keep their
/// input order in both directions.
pub fn sort_rows(rows: Vec<Row>, positions: &KeyPositions, reverse: bool) -> Result<Vec<Row>> {
    let mut keyed: Vec<(Key, Row)> = rows
        .into_iter()
        .map(|r| -> Result<(Key, Row)> { Ok((positions.key_of(&r)?, r)) })
        .collect::<Result<_>>()?;
    if reverse {
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
    } else {
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
    }
    Ok(keyed.into_iter().map(|(_, r)| r).collect())
}

/// Order of two keys under the sort direction.
pub(crate) fn directed(a: &Key, b: &Key, reverse: bool) -> Ordering {
    if reverse {
        b.cmp(a)
    } else {
        a.cmp(b)
    }
}

/// Generator for sorted runs.
///
/// Each flushed buffer becomes one chunk; chunk order follows input order,
/// which the merge relies on to break ties.
pub struct RunGenerator {
    positions: KeyPositions,
    reverse: bool,
    runs: Vec<Arc<SpillChunk>>,
    spilled_rows: u64,
}

impl RunGenerator {
    pub fn new(positions: KeyPositions, reverse: bool) -> Self {
        Self {
            positions,
            reverse,
            runs: Vec::new(),
            spilled_rows: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn spilled_rows(&self) -> u64 {
        self.spilled_rows
    }

    /// Sort `rows` and write them as the next chunk.
    pub fn flush_run(&mut self, rows: Vec<Row>, spill: &SpillManager) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sorted = sort_rows(rows, &self.positions, self.reverse)?;
        let chunk = spill.write_run(&sorted)?;
        self.spilled_rows += chunk.rows();
        self.runs.push(Arc::new(chunk));
        Ok(())
    }

    /// Finish run generation, handing back the chunks in creation order.
    pub fn finalize(self) -> Vec<Arc<SpillChunk>> {
        self.runs
    }
}
