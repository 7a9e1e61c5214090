//! Sort-merge join.
//!
//! Both inputs are sorted by their join keys (unless declared presorted) and
//! walked as key groups. At each step the current left and right keys are
//! compared: a smaller left key advances the left side, a smaller right key
//! advances the right side, and equal keys emit the product of the two
//! groups. The right group is buffered since it is replayed once per left
//! row; left rows stream through the group cursor.

use std::cmp::Ordering;
use std::collections::VecDeque;

use serde::Serialize;
use tabula_core::hash::Cachetag;
use tabula_core::key::{Key, KeyPositions, KeySpec};
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::group::GroupedRows;
use crate::sort::{sorted, SortOptions};
use crate::traits::{OpenedScan, Result, RowStream, Scan, Table, TableRef};

use super::{JoinKeys, JoinLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with no match on the right, unchanged.
    Anti,
    /// Left outer join using only the first right row per key.
    Lookup,
}

impl JoinKind {
    fn keeps_left_only(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full | JoinKind::Anti | JoinKind::Lookup)
    }

    fn keeps_right_only(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }
}

pub struct Join {
    left: TableRef,
    right: TableRef,
    kind: JoinKind,
    keys: JoinKeys,
    missing: Value,
    lprefix: Option<String>,
    rprefix: Option<String>,
    presorted: bool,
    sort: SortOptions,
}

impl Join {
    pub fn new(left: TableRef, right: TableRef, kind: JoinKind) -> Self {
        Self {
            left,
            right,
            kind,
            keys: JoinKeys::default(),
            missing: Value::Null,
            lprefix: None,
            rprefix: None,
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    /// Same key fields on both sides.
    pub fn key(mut self, key: impl Into<KeySpec>) -> Self {
        let key = key.into();
        self.keys.lkey = Some(key.clone());
        self.keys.rkey = Some(key);
        self
    }

    pub fn lkey(mut self, key: impl Into<KeySpec>) -> Self {
        self.keys.lkey = Some(key.into());
        self
    }

    pub fn rkey(mut self, key: impl Into<KeySpec>) -> Self {
        self.keys.rkey = Some(key.into());
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    pub fn lprefix(mut self, prefix: impl Into<String>) -> Self {
        self.lprefix = Some(prefix.into());
        self
    }

    pub fn rprefix(mut self, prefix: impl Into<String>) -> Self {
        self.rprefix = Some(prefix.into());
        self
    }

    pub fn presorted(mut self, presorted: bool) -> Self {
        self.presorted = presorted;
        self
    }

    pub fn sort_options(mut self, opts: SortOptions) -> Self {
        self.sort = opts;
        self
    }

    fn layout(&self, lhdr: &Header, rhdr: &Header, lpos: &[usize], rpos: &[usize]) -> JoinLayout {
        JoinLayout::new(
            lhdr,
            rhdr,
            lpos.to_vec(),
            rpos.to_vec(),
            self.lprefix.as_deref(),
            self.rprefix.as_deref(),
            self.missing.clone(),
        )
    }

    fn input(&self, scan: Scan, positions: &[usize]) -> Result<RowStream> {
        if self.presorted {
            return Ok(scan.rows);
        }
        let key = KeySpec::Fields(positions.iter().map(|&p| FieldRef::Index(p)).collect());
        Ok(sorted(OpenedScan::table(scan), key, false, &self.sort).scan()?.rows)
    }
}

impl Table for Join {
    fn name(&self) -> &'static str {
        "join"
    }

    fn scan(&self) -> Result<Scan> {
        let lscan = self.left.scan()?;
        let rscan = self.right.scan()?;
        let lhdr = lscan.header.clone();
        let (lpos, rpos) = self.keys.resolve(&lhdr, &rscan.header)?;
        let layout = self.layout(&lhdr, &rscan.header, &lpos, &rpos);

        let lrows = self.input(lscan, &lpos)?;
        let rrows = self.input(rscan, &rpos)?;

        let header = if self.kind == JoinKind::Anti {
            lhdr
        } else {
            layout.header.clone()
        };
        Ok(Scan::new(
            header,
            MergeJoinStream {
                left: GroupedRows::new(lrows, KeyPositions::Fields(lpos)),
                right: GroupedRows::new(rrows, KeyPositions::Fields(rpos)),
                layout,
                kind: self.kind,
                lkey: None,
                rkey: None,
                started: false,
                mode: Mode::Compare,
                right_group: Vec::new(),
                pending: VecDeque::new(),
                failed: false,
            },
        ))
    }

    fn header(&self) -> Result<Header> {
        let lhdr = self.left.header()?;
        if self.kind == JoinKind::Anti {
            return Ok(lhdr);
        }
        let rhdr = self.right.header()?;
        let (lpos, rpos) = self.keys.resolve(&lhdr, &rhdr)?;
        Ok(self.layout(&lhdr, &rhdr, &lpos, &rpos).header)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder("join")
            .tag(&self.left.cachetag()?)
            .tag(&self.right.cachetag()?)
            .param(&(self.kind, &self.keys, &self.missing))
            .ok()?
            .param(&(&self.lprefix, &self.rprefix, self.presorted))
            .ok()
            .map(|b| b.finish())
    }
}

enum Mode {
    Compare,
    /// Streaming the current left group against the buffered right group.
    Match,
    LeftOnly,
    RightOnly,
}

struct MergeJoinStream {
    left: GroupedRows<RowStream>,
    right: GroupedRows<RowStream>,
    layout: JoinLayout,
    kind: JoinKind,
    lkey: Option<Key>,
    rkey: Option<Key>,
    started: bool,
    mode: Mode,
    right_group: Vec<Row>,
    pending: VecDeque<Row>,
    failed: bool,
}

impl MergeJoinStream {
    fn step(&mut self) -> Result<Option<Row>> {
        if !self.started {
            self.lkey = self.left.next_key()?;
            self.rkey = self.right.next_key()?;
            self.started = true;
        }
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            match self.mode {
                Mode::Match => {
                    match self.left.next_in_group()? {
                        Some(l) => {
                            for r in &self.right_group {
                                self.pending.push_back(self.layout.joined(&l, r));
                            }
                        }
                        None => {
                            self.right_group.clear();
                            self.lkey = self.left.next_key()?;
                            self.rkey = self.right.next_key()?;
                            self.mode = Mode::Compare;
                        }
                    }
                }
                Mode::LeftOnly => match self.left.next_in_group()? {
                    Some(l) if self.kind == JoinKind::Anti => return Ok(Some(l)),
                    Some(l) => return Ok(Some(self.layout.left_only(l))),
                    None => {
                        self.lkey = self.left.next_key()?;
                        self.mode = Mode::Compare;
                    }
                },
                Mode::RightOnly => match self.right.next_in_group()? {
                    Some(r) => return Ok(Some(self.layout.right_only(&r))),
                    None => {
                        self.rkey = self.right.next_key()?;
                        self.mode = Mode::Compare;
                    }
                },
                Mode::Compare => {
                    let order = match (&self.lkey, &self.rkey) {
                        (None, None) => return Ok(None),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (Some(l), Some(r)) => l.cmp(r),
                    };
                    match order {
                        Ordering::Less => {
                            if self.kind.keeps_left_only() {
                                self.mode = Mode::LeftOnly;
                            } else if self.rkey.is_none() {
                                // Nothing left to match against.
                                return Ok(None);
                            } else {
                                self.lkey = self.left.next_key()?;
                            }
                        }
                        Ordering::Greater => {
                            if self.kind.keeps_right_only() {
                                self.mode = Mode::RightOnly;
                            } else if self.lkey.is_none() {
                                return Ok(None);
                            } else {
                                self.rkey = self.right.next_key()?;
                            }
                        }
                        Ordering::Equal if self.kind == JoinKind::Anti => {
                            self.lkey = self.left.next_key()?;
                            self.rkey = self.right.next_key()?;
                        }
                        Ordering::Equal => {
                            if self.kind == JoinKind::Lookup {
                                if let Some(first) = self.right.next_in_group()? {
                                    self.right_group.push(first);
                                }
                            } else {
                                while let Some(r) = self.right.next_in_group()? {
                                    self.right_group.push(r);
                                }
                            }
                            self.mode = Mode::Match;
                        }
                    }
                }
            }
        }
    }
}

impl Iterator for MergeJoinStream {
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
