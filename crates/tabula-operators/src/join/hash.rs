//! Hash joins: build an in-memory table from one side, stream the other.
//!
//! Inner, left and lookup joins build from the right side; right joins build
//! from the left; anti joins keep only a key set. The built table is cached
//! across scans for as long as the build side's fingerprint holds. Output
//! follows the streamed side's order and neither input is sorted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tabula_core::hash::Cachetag;
use tabula_core::key::{Key, KeyPositions, KeySpec};
use tabula_core::schema::Header;
use tabula_core::types::{Row, Value};

use crate::traits::{OpError, Result, Scan, Table, TableRef};

use super::{JoinKeys, JoinLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HashJoinKind {
    Inner,
    Left,
    /// Left outer join keeping only the first right row per key.
    Lookup,
    Right,
    Anti,
}

enum Built {
    Groups(HashMap<Key, Vec<Row>>),
    Keys(HashSet<Key>),
}

/// The build side's header together with its hash table.
struct BuildSide {
    header: Header,
    table: Built,
}

pub struct HashJoin {
    left: TableRef,
    right: TableRef,
    kind: HashJoinKind,
    keys: JoinKeys,
    missing: Value,
    lprefix: Option<String>,
    rprefix: Option<String>,
    cache: bool,
    built: Mutex<Option<(Cachetag, Arc<BuildSide>)>>,
}

impl HashJoin {
    pub fn new(left: TableRef, right: TableRef, kind: HashJoinKind) -> Self {
        Self {
            left,
            right,
            kind,
            keys: JoinKeys::default(),
            missing: Value::Null,
            lprefix: None,
            rprefix: None,
            cache: true,
            built: Mutex::new(None),
        }
    }

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

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    fn build_side(&self) -> &TableRef {
        match self.kind {
            HashJoinKind::Right => &self.left,
            _ => &self.right,
        }
    }

    fn streamed_side(&self) -> &TableRef {
        match self.kind {
            HashJoinKind::Right => &self.right,
            _ => &self.left,
        }
    }

    /// Orders the streamed and build headers as (left, right).
    fn sides<'a>(&self, streamed: &'a Header, build: &'a Header) -> (&'a Header, &'a Header) {
        match self.kind {
            HashJoinKind::Right => (build, streamed),
            _ => (streamed, build),
        }
    }

    fn build_tag(&self, streamed: &Header) -> Option<Cachetag> {
        if !self.cache {
            return None;
        }
        Cachetag::builder("hashjoin-build")
            .tag(&self.build_side().cachetag()?)
            .param(&(self.kind, &self.keys))
            .ok()?
            .param(streamed)
            .ok()
            .map(|b| b.finish())
    }

    /// Scan the build side into its hash table, or reuse the cached one.
    fn build(&self, streamed: &Header) -> Result<Arc<BuildSide>> {
        let tag = self.build_tag(streamed);
        let mut guard = self
            .built
            .lock()
            .map_err(|_| OpError::Exec("hash join cache lock poisoned".into()))?;
        if let (Some(tag), Some((cached, built))) = (&tag, guard.as_ref()) {
            if cached == tag {
                tracing::debug!(kind = ?self.kind, "hash join table cache hit");
                return Ok(Arc::clone(built));
            }
        }

        let Scan { header, rows } = self.build_side().scan()?;
        let (lhdr, rhdr) = self.sides(streamed, &header);
        let (lpos, rpos) = self.keys.resolve(lhdr, rhdr)?;
        let positions = KeyPositions::Fields(match self.kind {
            HashJoinKind::Right => lpos,
            _ => rpos,
        });
        let table = match self.kind {
            HashJoinKind::Anti => {
                let mut keys = HashSet::new();
                for row in rows {
                    keys.insert(positions.key_of(&row?)?);
                }
                Built::Keys(keys)
            }
            kind => {
                let mut groups: HashMap<Key, Vec<Row>> = HashMap::new();
                for row in rows {
                    let row = row?;
                    let group = groups.entry(positions.key_of(&row)?).or_default();
                    if kind != HashJoinKind::Lookup || group.is_empty() {
                        group.push(row);
                    }
                }
                Built::Groups(groups)
            }
        };
        tracing::debug!(
            kind = ?self.kind,
            keys = match &table {
                Built::Groups(g) => g.len(),
                Built::Keys(k) => k.len(),
            },
            "built hash join table"
        );
        let built = Arc::new(BuildSide { header, table });
        if let Some(tag) = tag {
            *guard = Some((tag, Arc::clone(&built)));
        }
        Ok(built)
    }
}

impl Table for HashJoin {
    fn name(&self) -> &'static str {
        "hashjoin"
    }

    fn scan(&self) -> Result<Scan> {
        let streamed = self.streamed_side().scan()?;
        let side = self.build(&streamed.header)?;
        let (lhdr, rhdr) = self.sides(&streamed.header, &side.header);
        let (lpos, rpos) = self.keys.resolve(lhdr, rhdr)?;
        let layout = JoinLayout::new(
            lhdr,
            rhdr,
            lpos.clone(),
            rpos.clone(),
            self.lprefix.as_deref(),
            self.rprefix.as_deref(),
            self.missing.clone(),
        );
        let lpos = KeyPositions::Fields(lpos);
        let rpos = KeyPositions::Fields(rpos);
        let kind = self.kind;

        if kind == HashJoinKind::Right {
            let header = layout.header.clone();
            let rows = streamed.rows.flat_map(move |row| {
                let out: Vec<Result<Row>> = match match_right(&side.table, &layout, &rpos, row) {
                    Ok(rows) => rows.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                out
            });
            return Ok(Scan::new(header, rows));
        }

        let header = if kind == HashJoinKind::Anti {
            streamed.header
        } else {
            layout.header.clone()
        };
        let rows = streamed.rows.flat_map(move |row| {
            let out: Vec<Result<Row>> = match match_left(kind, &side.table, &layout, &lpos, row) {
                Ok(rows) => rows.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            out
        });
        Ok(Scan::new(header, rows))
    }

    fn header(&self) -> Result<Header> {
        let lhdr = self.left.header()?;
        if self.kind == HashJoinKind::Anti {
            return Ok(lhdr);
        }
        let rhdr = self.right.header()?;
        let (lpos, rpos) = self.keys.resolve(&lhdr, &rhdr)?;
        Ok(JoinLayout::new(
            &lhdr,
            &rhdr,
            lpos,
            rpos,
            self.lprefix.as_deref(),
            self.rprefix.as_deref(),
            self.missing.clone(),
        )
        .header)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder("hashjoin")
            .tag(&self.left.cachetag()?)
            .tag(&self.right.cachetag()?)
            .param(&(self.kind, &self.keys, &self.missing))
            .ok()?
            .param(&(&self.lprefix, &self.rprefix))
            .ok()
            .map(|b| b.finish())
    }
}

/// Output rows for one streamed left row.
fn match_left(
    kind: HashJoinKind,
    built: &Built,
    layout: &JoinLayout,
    positions: &KeyPositions,
    row: Result<Row>,
) -> Result<Vec<Row>> {
    let row = row?;
    let key = positions.key_of(&row)?;
    Ok(match built {
        Built::Keys(keys) => {
            if keys.contains(&key) {
                Vec::new()
            } else {
                vec![row]
            }
        }
        Built::Groups(groups) => match groups.get(&key) {
            Some(matches) => matches.iter().map(|r| layout.joined(&row, r)).collect(),
            None if kind == HashJoinKind::Inner => Vec::new(),
            None => vec![layout.left_only(row)],
        },
    })
}

/// Output rows for one streamed right row of a right join.
fn match_right(
    built: &Built,
    layout: &JoinLayout,
    positions: &KeyPositions,
    row: Result<Row>,
) -> Result<Vec<Row>> {
    let row = row?;
    let key = positions.key_of(&row)?;
    Ok(match built {
        Built::Groups(groups) => match groups.get(&key) {
            Some(matches) => matches.iter().map(|l| layout.joined(l, &row)).collect(),
            None => vec![layout.right_only(&row)],
        },
        Built::Keys(_) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    fn left() -> TableRef {
        Arc::new(MemTable::new(
            ["id", "colour"],
            vec![row![2, "red"], row![1, "blue"], row![3, "green"]],
        ))
    }

    fn right() -> TableRef {
        Arc::new(MemTable::new(
            ["id", "shape"],
            vec![row![1, "circle"], row![1, "square"], row![4, "ellipse"]],
        ))
    }

    fn run(kind: HashJoinKind) -> Vec<Row> {
        materialize(&HashJoin::new(left(), right(), kind).key("id")).unwrap().1
    }

    #[test]
    fn inner_and_left_follow_left_order() {
        assert_eq!(
            run(HashJoinKind::Inner),
            vec![row![1, "blue", "circle"], row![1, "blue", "square"]]
        );
        assert_eq!(
            run(HashJoinKind::Left),
            vec![
                row![2, "red", None::<i64>],
                row![1, "blue", "circle"],
                row![1, "blue", "square"],
                row![3, "green", None::<i64>],
            ]
        );
    }

    #[test]
    fn lookup_keeps_first_right_row() {
        assert_eq!(
            run(HashJoinKind::Lookup),
            vec![
                row![2, "red", None::<i64>],
                row![1, "blue", "circle"],
                row![3, "green", None::<i64>],
            ]
        );
    }

    #[test]
    fn right_join_builds_from_left() {
        assert_eq!(
            run(HashJoinKind::Right),
            vec![
                row![1, "blue", "circle"],
                row![1, "blue", "square"],
                row![4, None::<i64>, "ellipse"],
            ]
        );
    }

    #[test]
    fn anti_join_uses_key_set() {
        let j = HashJoin::new(left(), right(), HashJoinKind::Anti).key("id");
        let (hdr, rows) = materialize(&j).unwrap();
        assert_eq!(hdr, Header::new(["id", "colour"]));
        assert_eq!(rows, vec![row![2, "red"], row![3, "green"]]);
    }

    #[test]
    fn build_table_is_cached() {
        let j = HashJoin::new(left(), right(), HashJoinKind::Inner).key("id");
        let first = materialize(&j).unwrap();
        assert!(j.built.lock().unwrap().is_some());
        assert_eq!(materialize(&j).unwrap(), first);
    }
}
