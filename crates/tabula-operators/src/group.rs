//! Group-by cursor over key-sorted rows.
//!
//! `GroupedRows` walks consecutive equal-key runs of a sorted stream. The
//! rows of a group share the cursor's position with the outer stream: asking
//! for the next key skips whatever remains of the current group, so callers
//! either consume a group as they go or take it owned with `next_owned`.

use std::collections::VecDeque;

use tabula_core::key::{Key, KeyPositions, KeySpec};
use tabula_core::schema::Header;
use tabula_core::types::Row;

use crate::sort::{sorted, SortOptions};
use crate::traits::{Result, RowStream, Table, TableRef};

pub struct GroupedRows<I> {
    rows: I,
    positions: KeyPositions,
    lookahead: Option<(Key, Row)>,
    current: Option<Key>,
    done: bool,
}

impl<I> GroupedRows<I>
where
    I: Iterator<Item = Result<Row>>,
{
    pub fn new(rows: I, positions: KeyPositions) -> Self {
        Self {
            rows,
            positions,
            lookahead: None,
            current: None,
            done: false,
        }
    }

    pub fn positions(&self) -> &KeyPositions {
        &self.positions
    }

    fn fill(&mut self) -> Result<()> {
        if self.lookahead.is_some() || self.done {
            return Ok(());
        }
        match self.rows.next() {
            None => self.done = true,
            Some(Err(e)) => {
                self.done = true;
                return Err(e);
            }
            Some(Ok(row)) => match self.positions.key_of(&row) {
                Ok(key) => self.lookahead = Some((key, row)),
                Err(e) => {
                    self.done = true;
                    return Err(e.into());
                }
            },
        }
        Ok(())
    }

    fn in_current(&self) -> bool {
        match (&self.lookahead, &self.current) {
            (Some((key, _)), Some(cur)) => key == cur,
            _ => false,
        }
    }

    /// Advance to the next group and return its key, skipping any rows of
    /// the current group that were not consumed.
    pub fn next_key(&mut self) -> Result<Option<Key>> {
        self.skip_group()?;
        self.fill()?;
        self.current = self.lookahead.as_ref().map(|(k, _)| k.clone());
        Ok(self.current.clone())
    }

    /// Next row of the current group, or `None` once the group ends.
    pub fn next_in_group(&mut self) -> Result<Option<Row>> {
        self.fill()?;
        if self.in_current() {
            Ok(self.lookahead.take().map(|(_, r)| r))
        } else {
            Ok(None)
        }
    }

    /// Discard the rest of the current group, returning how many rows were
    /// dropped.
    pub fn skip_group(&mut self) -> Result<usize> {
        let mut n = 0;
        while self.next_in_group()?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    /// Next group's key together with the number of rows in it.
    pub fn next_counted(&mut self) -> Result<Option<(Key, usize)>> {
        match self.next_key()? {
            Some(key) => Ok(Some((key, self.skip_group()?))),
            None => Ok(None),
        }
    }

    /// Next group materialized into an owned vector.
    pub fn next_owned(&mut self) -> Result<Option<(Key, Vec<Row>)>> {
        let Some(key) = self.next_key()? else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        while let Some(row) = self.next_in_group()? {
            rows.push(row);
        }
        Ok(Some((key, rows)))
    }

    /// Next group as a single-pass cursor borrowing this one.
    pub fn next_group(&mut self) -> Result<Option<Group<'_, I>>> {
        match self.next_key()? {
            Some(key) => Ok(Some(Group { key, cursor: self })),
            None => Ok(None),
        }
    }
}

/// The rows of one group. Dropping it early leaves the remaining rows to be
/// skipped by the next `next_key`.
pub struct Group<'a, I> {
    key: Key,
    cursor: &'a mut GroupedRows<I>,
}

impl<I> Group<'_, I> {
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl<I> Iterator for Group<'_, I>
where
    I: Iterator<Item = Result<Row>>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_in_group().transpose()
    }
}

/// Group a table that is already sorted by `key`.
pub fn group_by(source: &dyn Table, key: &KeySpec) -> Result<(Header, GroupedRows<RowStream>)> {
    let scan = source.scan()?;
    let positions = key.resolve(&scan.header)?;
    Ok((scan.header, GroupedRows::new(scan.rows, positions)))
}

/// Sort `source` by `key` (unless presorted) and open a group cursor on it.
pub(crate) fn sorted_groups(
    source: &TableRef,
    key: &KeySpec,
    presorted: bool,
    opts: &SortOptions,
) -> Result<(Header, GroupedRows<RowStream>)> {
    if presorted {
        return group_by(source.as_ref(), key);
    }
    let view = sorted(source.clone(), key.clone(), false, opts);
    group_by(view.as_ref(), key)
}

/// Maps every owned group to zero or more output rows.
pub(crate) struct GroupMap<F> {
    groups: GroupedRows<RowStream>,
    f: F,
    pending: VecDeque<Row>,
    failed: bool,
}

impl<F> GroupMap<F>
where
    F: FnMut(Key, Vec<Row>) -> Result<Vec<Row>>,
{
    pub(crate) fn new(groups: GroupedRows<RowStream>, f: F) -> Self {
        Self {
            groups,
            f,
            pending: VecDeque::new(),
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some((key, rows)) = self.groups.next_owned()? else {
                return Ok(None);
            };
            self.pending.extend((self.f)(key, rows)?);
        }
    }
}

impl<F> Iterator for GroupMap<F>
where
    F: FnMut(Key, Vec<Row>) -> Result<Vec<Row>>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(row) => row.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Names of the key fields, in key order.
pub(crate) fn key_names(header: &Header, positions: &KeyPositions) -> Vec<String> {
    positions
        .positions()
        .unwrap_or_default()
        .iter()
        .map(|&p| header.name(p).unwrap_or_default().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use tabula_core::row;

    fn grouped(rows: Vec<Row>) -> GroupedRows<std::vec::IntoIter<Result<Row>>> {
        let rows: Vec<Result<Row>> = rows.into_iter().map(Ok).collect();
        GroupedRows::new(rows.into_iter(), KeyPositions::Fields(vec![0]))
    }

    #[test]
    fn groups_consecutive_equal_keys() {
        let mut g = grouped(vec![row!["a", 1], row!["a", 2], row!["b", 3]]);
        let (k, rows) = g.next_owned().unwrap().unwrap();
        assert_eq!(k, Key(row!["a"]));
        assert_eq!(rows.len(), 2);
        let (k, rows) = g.next_owned().unwrap().unwrap();
        assert_eq!(k, Key(row!["b"]));
        assert_eq!(rows, vec![row!["b", 3]]);
        assert!(g.next_owned().unwrap().is_none());
    }

    #[test]
    fn unconsumed_rows_are_skipped() {
        let mut g = grouped(vec![row![1], row![1], row![1], row![2], row![3], row![3]]);
        {
            let mut first = g.next_group().unwrap().unwrap();
            assert_eq!(first.key(), &Key(row![1]));
            assert!(first.next().is_some());
        }
        assert_eq!(g.next_key().unwrap(), Some(Key(row![2])));
        assert_eq!(g.next_counted().unwrap(), Some((Key(row![3]), 2)));
        assert_eq!(g.next_key().unwrap(), None);
    }

    #[test]
    fn group_sizes_from_table() {
        let t = MemTable::new(["k"], vec![row!["x"], row!["x"], row!["y"]]);
        let (_, mut g) = group_by(&t, &KeySpec::from("k")).unwrap();
        let mut sizes = Vec::new();
        while let Some((_, n)) = g.next_counted().unwrap() {
            sizes.push(n);
        }
        assert_eq!(sizes, vec![2, 1]);
    }
}
