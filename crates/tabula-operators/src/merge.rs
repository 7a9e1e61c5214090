//! K-way merge of already-sorted row streams.
//!
//! Ascending merges go through a binary heap, O(N log K). Descending merges
//! scan the K current heads for the largest key. In both directions equal
//! keys are taken from the lowest-numbered stream first, which keeps external
//! sort stable across chunks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tabula_core::hash::Cachetag;
use tabula_core::key::{Key, KeyPositions, KeySpec};
use tabula_core::schema::Header;
use tabula_core::types::{Row, Value};

use crate::cat::{union_header, Cat};
use crate::sort::{SortOptions, SortView};
use crate::traits::{OpenedScan, Result, RowStream, Scan, Table, TableRef};

use std::sync::Arc;

/// Entry in the merge heap.
///
/// Ordered by `(key, stream)` reversed, so the max-heap pops the smallest.
struct HeapEntry {
    key: Key,
    stream: usize,
    row: Row,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.stream.cmp(&self.stream))
    }
}

/// Streaming merge of sorted inputs, see [`merge_sorted`].
pub struct MergeSorted {
    positions: KeyPositions,
    reverse: bool,
    streams: Vec<RowStream>,
    heap: BinaryHeap<HeapEntry>,
    heads: Vec<Option<(Key, Row)>>,
    primed: bool,
    failed: bool,
}

/// Merge `streams`, each already sorted by `positions` in direction
/// `reverse`, into one sorted stream.
pub fn merge_sorted(
    positions: KeyPositions,
    reverse: bool,
    streams: Vec<RowStream>,
) -> MergeSorted {
    let heads = if reverse {
        (0..streams.len()).map(|_| None).collect()
    } else {
        Vec::new()
    };
    MergeSorted {
        positions,
        reverse,
        heap: BinaryHeap::with_capacity(streams.len()),
        streams,
        heads,
        primed: false,
        failed: false,
    }
}

impl MergeSorted {
    fn pull(&mut self, idx: usize) -> Result<Option<(Key, Row)>> {
        match self.streams[idx].next() {
            None => Ok(None),
            Some(row) => {
                let row = row?;
                Ok(Some((self.positions.key_of(&row)?, row)))
            }
        }
    }

    /// Fetch the next head of stream `idx` into the heap or head list.
    fn refill(&mut self, idx: usize) -> Result<()> {
        let next = self.pull(idx)?;
        if self.reverse {
            self.heads[idx] = next;
        } else if let Some((key, row)) = next {
            self.heap.push(HeapEntry {
                key,
                stream: idx,
                row,
            });
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        for idx in 0..self.streams.len() {
            self.refill(idx)?;
        }
        self.primed = true;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.primed {
            self.prime()?;
        }
        if self.reverse {
            // Linear shortlist scan: first stream holding the largest key.
            let mut best: Option<usize> = None;
            for (idx, head) in self.heads.iter().enumerate() {
                let Some((key, _)) = head else { continue };
                match best {
                    Some(b) => {
                        if let Some((best_key, _)) = &self.heads[b] {
                            if key > best_key {
                                best = Some(idx);
                            }
                        }
                    }
                    None => best = Some(idx),
                }
            }
            let Some(idx) = best else { return Ok(None) };
            let row = self.heads[idx].take().map(|(_, r)| r);
            self.refill(idx)?;
            Ok(row)
        } else {
            let Some(entry) = self.heap.pop() else {
                return Ok(None);
            };
            self.refill(entry.stream)?;
            Ok(Some(entry.row))
        }
    }
}

impl Iterator for MergeSorted {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_row() {
            Ok(row) => row.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Several tables combined into one sorted table.
///
/// Headers are unioned the way `Cat` does it; each input is sorted by `key`
/// first unless declared presorted.
pub struct MergeTables {
    sources: Vec<TableRef>,
    key: KeySpec,
    reverse: bool,
    presorted: bool,
    missing: Value,
    sort: SortOptions,
}

impl MergeTables {
    pub fn new(sources: Vec<TableRef>, key: impl Into<KeySpec>) -> Self {
        Self {
            sources,
            key: key.into(),
            reverse: false,
            presorted: false,
            missing: Value::Null,
            sort: SortOptions::default(),
        }
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn presorted(mut self, presorted: bool) -> Self {
        self.presorted = presorted;
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    pub fn sort_options(mut self, opts: SortOptions) -> Self {
        self.sort = opts;
        self
    }

    fn union(&self) -> Result<Header> {
        let headers = self
            .sources
            .iter()
            .map(|s| s.header())
            .collect::<Result<Vec<_>>>()?;
        Ok(union_header(&headers))
    }
}

impl Table for MergeTables {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn scan(&self) -> Result<Scan> {
        let scans = self
            .sources
            .iter()
            .map(|s| s.scan())
            .collect::<Result<Vec<_>>>()?;
        let header = union_header(&scans.iter().map(|s| s.header.clone()).collect::<Vec<_>>());
        let positions = self.key.resolve(&header)?;
        let mut streams = Vec::with_capacity(scans.len());
        for scan in scans {
            let aligned: TableRef = Arc::new(
                Cat::new(vec![OpenedScan::table(scan)])
                    .with_header(header.clone())
                    .missing(self.missing.clone()),
            );
            let input: TableRef = if self.presorted {
                aligned
            } else {
                Arc::new(
                    SortView::new(aligned, self.key.clone())
                        .reverse(self.reverse)
                        .with_options(self.sort.clone()),
                )
            };
            streams.push(input.scan()?.rows);
        }
        Ok(Scan::new(header, merge_sorted(positions, self.reverse, streams)))
    }

    fn header(&self) -> Result<Header> {
        self.union()
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let mut b = Cachetag::builder("merge")
            .param(&self.key)
            .ok()?
            .param(&(self.reverse, self.presorted))
            .ok()?
            .param(&self.missing)
            .ok()?;
        for s in &self.sources {
            b = b.tag(&s.cachetag()?);
        }
        Some(b.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    fn stream(rows: Vec<Row>) -> RowStream {
        Box::new(rows.into_iter().map(Ok))
    }

    fn first_field() -> KeyPositions {
        KeyPositions::Fields(vec![0])
    }

    #[test]
    fn ascending_merge_prefers_earlier_stream_on_ties() {
        let a = stream(vec![row![1, "a0"], row![3, "a1"]]);
        let b = stream(vec![row![1, "b0"], row![2, "b1"], row![3, "b2"]]);
        let out: Vec<Row> = merge_sorted(first_field(), false, vec![a, b])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            out,
            vec![row![1, "a0"], row![1, "b0"], row![2, "b1"], row![3, "a1"], row![3, "b2"]]
        );
    }

    #[test]
    fn descending_merge_uses_largest_head() {
        let a = stream(vec![row![5, "a"], row![1, "a"]]);
        let b = stream(vec![row![5, "b"], row![3, "b"]]);
        let c = stream(vec![]);
        let out: Vec<Row> = merge_sorted(first_field(), true, vec![a, b, c])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out, vec![row![5, "a"], row![5, "b"], row![3, "b"], row![1, "a"]]);
    }

    #[test]
    fn mixed_types_merge_in_canonical_order() {
        let a = stream(vec![row![None::<i64>], row![2.5], row!["x"]]);
        let b = stream(vec![row![true], row![3]]);
        let out: Vec<Row> = merge_sorted(first_field(), false, vec![a, b])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            out,
            vec![row![None::<i64>], row![true], row![2.5], row![3], row!["x"]]
        );
    }

    #[test]
    fn merge_tables_unions_headers_and_sorts_inputs() {
        let a: TableRef = Arc::new(MemTable::new(["k", "x"], vec![row![3, "a"], row![1, "b"]]));
        let b: TableRef = Arc::new(MemTable::new(["y", "k"], vec![row!["c", 2]]));
        let (hdr, rows) = materialize(&MergeTables::new(vec![a, b], "k")).unwrap();
        assert_eq!(hdr, Header::new(["k", "x", "y"]));
        assert_eq!(
            rows,
            vec![
                row![1, "b", None::<i64>],
                row![2, None::<i64>, "c"],
                row![3, "a", None::<i64>],
            ]
        );
    }
}
