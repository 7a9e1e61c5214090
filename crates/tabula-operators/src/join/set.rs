//! Whole-row set operators with multiset semantics.
//!
//! `Complement(a, b)` yields each row of `a` `max(0, count_a - count_b)`
//! times, `Intersection(a, b)` yields it `min(count_a, count_b)` times. The
//! sort-merge forms sort both inputs on the whole row; the hash forms keep a
//! multiset of `b` and preserve `a`'s order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tabula_core::hash::Cachetag;
use tabula_core::key::{Key, KeyPositions, KeySpec};
use tabula_core::schema::Header;
use tabula_core::types::Row;

use crate::group::GroupedRows;
use crate::sort::{sorted, SortOptions};
use crate::traits::{OpError, Result, RowStream, Scan, Table, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    Complement,
    Intersection,
}

impl SetOp {
    fn name(self) -> &'static str {
        match self {
            SetOp::Complement => "complement",
            SetOp::Intersection => "intersection",
        }
    }

    /// Whether the `nth` (1-based) copy of a row in `a` survives when `b`
    /// holds `count_b` copies.
    fn keeps(self, nth: usize, count_b: usize) -> bool {
        match self {
            SetOp::Complement => nth > count_b,
            SetOp::Intersection => nth <= count_b,
        }
    }
}

struct SortedSet {
    a: TableRef,
    b: TableRef,
    op: SetOp,
    presorted: bool,
    sort: SortOptions,
}

impl SortedSet {
    fn scan(&self) -> Result<Scan> {
        let (a, b) = if self.presorted {
            (self.a.clone(), self.b.clone())
        } else {
            (
                sorted(self.a.clone(), KeySpec::Row, false, &self.sort),
                sorted(self.b.clone(), KeySpec::Row, false, &self.sort),
            )
        };
        let ascan = a.scan()?;
        let bscan = b.scan()?;
        Ok(Scan::new(
            ascan.header,
            SetStream {
                a: GroupedRows::new(ascan.rows, KeyPositions::Row),
                b: GroupedRows::new(bscan.rows, KeyPositions::Row),
                op: self.op,
                bkey: None,
                started: false,
                in_group: false,
                count_b: 0,
                nth: 0,
                failed: false,
            },
        ))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder(self.op.name())
            .tag(&self.a.cachetag()?)
            .tag(&self.b.cachetag()?)
            .param(&self.presorted)
            .ok()
            .map(|b| b.finish())
    }
}

struct SetStream {
    a: GroupedRows<RowStream>,
    b: GroupedRows<RowStream>,
    op: SetOp,
    bkey: Option<Key>,
    started: bool,
    in_group: bool,
    count_b: usize,
    nth: usize,
    failed: bool,
}

impl SetStream {
    fn step(&mut self) -> Result<Option<Row>> {
        if !self.started {
            self.bkey = self.b.next_key()?;
            self.started = true;
        }
        loop {
            if !self.in_group {
                let Some(key) = self.a.next_key()? else {
                    return Ok(None);
                };
                while matches!(&self.bkey, Some(bk) if bk < &key) {
                    self.bkey = self.b.next_key()?;
                }
                self.count_b = 0;
                if self.bkey.as_ref() == Some(&key) {
                    self.count_b = self.b.skip_group()?;
                    self.bkey = self.b.next_key()?;
                }
                self.nth = 0;
                self.in_group = true;
            }
            match self.a.next_in_group()? {
                Some(row) => {
                    self.nth += 1;
                    if self.op.keeps(self.nth, self.count_b) {
                        return Ok(Some(row));
                    }
                }
                None => self.in_group = false,
            }
        }
    }
}

impl Iterator for SetStream {
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

macro_rules! sorted_set_view {
    ($name:ident, $op:expr) => {
        pub struct $name(SortedSet);

        impl $name {
            pub fn new(a: TableRef, b: TableRef) -> Self {
                Self(SortedSet {
                    a,
                    b,
                    op: $op,
                    presorted: false,
                    sort: SortOptions::default(),
                })
            }

            /// Both inputs are already sorted on the whole row.
            pub fn presorted(mut self, presorted: bool) -> Self {
                self.0.presorted = presorted;
                self
            }

            pub fn sort_options(mut self, opts: SortOptions) -> Self {
                self.0.sort = opts;
                self
            }
        }

        impl Table for $name {
            fn name(&self) -> &'static str {
                self.0.op.name()
            }

            fn scan(&self) -> Result<Scan> {
                self.0.scan()
            }

            fn header(&self) -> Result<Header> {
                self.0.a.header()
            }

            fn cachetag(&self) -> Option<Cachetag> {
                self.0.cachetag()
            }
        }
    };
}

sorted_set_view!(Complement, SetOp::Complement);
sorted_set_view!(Intersection, SetOp::Intersection);

/// Rows added and removed going from `a` to `b`: `(b - a, a - b)`.
pub fn diff(a: TableRef, b: TableRef) -> (Complement, Complement) {
    (Complement::new(b.clone(), a.clone()), Complement::new(a, b))
}

struct HashedSet {
    a: TableRef,
    b: TableRef,
    op: SetOp,
    counts: Mutex<Option<(Cachetag, Arc<HashMap<Row, usize>>)>>,
}

impl HashedSet {
    fn counts(&self) -> Result<Arc<HashMap<Row, usize>>> {
        let tag = self.b.cachetag();
        let mut guard = self
            .counts
            .lock()
            .map_err(|_| OpError::Exec("set cache lock poisoned".into()))?;
        if let (Some(tag), Some((cached, counts))) = (&tag, guard.as_ref()) {
            if cached == tag {
                return Ok(Arc::clone(counts));
            }
        }
        let mut counts: HashMap<Row, usize> = HashMap::new();
        for row in self.b.scan()?.rows {
            *counts.entry(row?).or_default() += 1;
        }
        let counts = Arc::new(counts);
        if let Some(tag) = tag {
            *guard = Some((tag, Arc::clone(&counts)));
        }
        Ok(counts)
    }

    fn scan(&self) -> Result<Scan> {
        // Each pass consumes its own copy of the multiset.
        let mut remaining = (*self.counts()?).clone();
        let op = self.op;
        let scan = self.a.scan()?;
        let rows = scan.rows.filter_map(move |row| {
            let row = match row {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let matched = match remaining.get_mut(&row) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            let keep = match op {
                SetOp::Complement => !matched,
                SetOp::Intersection => matched,
            };
            keep.then_some(Ok(row))
        });
        Ok(Scan::new(scan.header, rows))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let op = match self.op {
            SetOp::Complement => "hashcomplement",
            SetOp::Intersection => "hashintersection",
        };
        Some(
            Cachetag::builder(op)
                .tag(&self.a.cachetag()?)
                .tag(&self.b.cachetag()?)
                .finish(),
        )
    }
}

macro_rules! hashed_set_view {
    ($name:ident, $op:expr, $label:literal) => {
        pub struct $name(HashedSet);

        impl $name {
            pub fn new(a: TableRef, b: TableRef) -> Self {
                Self(HashedSet {
                    a,
                    b,
                    op: $op,
                    counts: Mutex::new(None),
                })
            }
        }

        impl Table for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn scan(&self) -> Result<Scan> {
                self.0.scan()
            }

            fn header(&self) -> Result<Header> {
                self.0.a.header()
            }

            fn cachetag(&self) -> Option<Cachetag> {
                self.0.cachetag()
            }
        }
    };
}

hashed_set_view!(HashComplement, SetOp::Complement, "hashcomplement");
hashed_set_view!(HashIntersection, SetOp::Intersection, "hashintersection");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    fn a() -> TableRef {
        Arc::new(MemTable::new(
            ["x", "y"],
            vec![row!["a", 1], row!["b", 2], row!["a", 1], row!["c", 3], row!["a", 1]],
        ))
    }

    fn b() -> TableRef {
        Arc::new(MemTable::new(
            ["x", "y"],
            vec![row!["a", 1], row!["c", 3], row!["d", 4]],
        ))
    }

    fn rows(t: &dyn Table) -> Vec<Row> {
        materialize(t).unwrap().1
    }

    #[test]
    fn sorted_complement_respects_multiplicity() {
        assert_eq!(
            rows(&Complement::new(a(), b())),
            vec![row!["a", 1], row!["a", 1], row!["b", 2]]
        );
        assert_eq!(rows(&Intersection::new(a(), b())), vec![row!["a", 1], row!["c", 3]]);
    }

    #[test]
    fn hash_forms_keep_input_order() {
        assert_eq!(
            rows(&HashComplement::new(a(), b())),
            vec![row!["b", 2], row!["a", 1], row!["a", 1]]
        );
        assert_eq!(
            rows(&HashIntersection::new(a(), b())),
            vec![row!["a", 1], row!["c", 3]]
        );
    }

    #[test]
    fn hash_complement_is_repeatable() {
        let c = HashComplement::new(a(), b());
        assert_eq!(rows(&c), rows(&c));
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let (added, removed) = diff(a(), b());
        assert_eq!(rows(&added), vec![row!["d", 4]]);
        assert_eq!(rows(&removed).len(), 3);
    }
}
