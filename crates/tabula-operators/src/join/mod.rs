//! Joins and whole-row set operators.
//!
//! - `merge`: sort-merge equi-joins (inner, outer, anti, lookup).
//! - `hash`: the same joins over an in-memory hash table, no sorting.
//! - `set`: complement and intersection with multiset semantics.
//! - `cross`: Cartesian product of any number of tables.

pub mod cross;
pub mod hash;
pub mod merge;
pub mod set;

pub use cross::CrossJoin;
pub use hash::{HashJoin, HashJoinKind};
pub use merge::{Join, JoinKind};
pub use set::{diff, Complement, HashComplement, HashIntersection, Intersection};

use serde::Serialize;
use tabula_core::key::KeySpec;
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::traits::{fit_row, value_at, OpError, Result};

/// Key fields of both sides, before resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinKeys {
    pub lkey: Option<KeySpec>,
    pub rkey: Option<KeySpec>,
}

impl JoinKeys {
    /// Resolve both keys to positions. With no key given the join is natural:
    /// the field names both headers share, in left header order.
    pub(crate) fn resolve(
        &self,
        left: &Header,
        right: &Header,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let (lrefs, rrefs) = match (&self.lkey, &self.rkey) {
            (None, None) => {
                let common: Vec<FieldRef> = left
                    .iter()
                    .filter(|f| right.contains(f))
                    .map(FieldRef::from)
                    .collect();
                if common.is_empty() {
                    return Err(OpError::contract(format!(
                        "natural join: no common fields between {left} and {right}"
                    )));
                }
                (common.clone(), common)
            }
            (Some(l), None) => (field_refs(l)?, field_refs(l)?),
            (None, Some(r)) => (field_refs(r)?, field_refs(r)?),
            (Some(l), Some(r)) => (field_refs(l)?, field_refs(r)?),
        };
        if lrefs.len() != rrefs.len() {
            return Err(OpError::contract(format!(
                "join key arity mismatch: {} left fields, {} right fields",
                lrefs.len(),
                rrefs.len()
            )));
        }
        Ok((left.resolve_all(&lrefs)?, right.resolve_all(&rrefs)?))
    }
}

fn field_refs(key: &KeySpec) -> Result<Vec<FieldRef>> {
    match key {
        KeySpec::Row => Err(OpError::contract("join keys must name fields")),
        _ => Ok(key.field_refs()),
    }
}

/// How joined, left-only and right-only rows are laid out.
///
/// Output header: the left header, then the right header without its key
/// fields. Prefixes, when given, apply to non-key fields.
#[derive(Debug, Clone)]
pub(crate) struct JoinLayout {
    pub header: Header,
    lwidth: usize,
    lpos: Vec<usize>,
    rpos: Vec<usize>,
    rrest: Vec<usize>,
    missing: Value,
}

impl JoinLayout {
    pub fn new(
        left: &Header,
        right: &Header,
        lpos: Vec<usize>,
        rpos: Vec<usize>,
        lprefix: Option<&str>,
        rprefix: Option<&str>,
        missing: Value,
    ) -> Self {
        let rrest: Vec<usize> = (0..right.len()).filter(|i| !rpos.contains(i)).collect();
        let mut fields = Vec::with_capacity(left.len() + rrest.len());
        for (i, f) in left.iter().enumerate() {
            match lprefix {
                Some(p) if !lpos.contains(&i) => fields.push(format!("{p}{f}")),
                _ => fields.push(f.to_string()),
            }
        }
        for &i in &rrest {
            let f = right.name(i).unwrap_or_default();
            fields.push(format!("{}{f}", rprefix.unwrap_or_default()));
        }
        Self {
            header: Header::from(fields),
            lwidth: left.len(),
            lpos,
            rpos,
            rrest,
            missing,
        }
    }

    pub fn joined(&self, left: &Row, right: &Row) -> Row {
        let mut out = fit_row(left.clone(), self.lwidth, &self.missing);
        out.extend(self.rrest.iter().map(|&i| value_at(right, i, &self.missing)));
        out
    }

    pub fn left_only(&self, left: Row) -> Row {
        let mut out = fit_row(left, self.lwidth, &self.missing);
        out.extend(self.rrest.iter().map(|_| self.missing.clone()));
        out
    }

    pub fn right_only(&self, right: &Row) -> Row {
        let mut out = vec![self.missing.clone(); self.lwidth];
        for (&l, &r) in self.lpos.iter().zip(&self.rpos) {
            out[l] = value_at(right, r, &self.missing);
        }
        out.extend(self.rrest.iter().map(|&i| value_at(right, i, &self.missing)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::row;

    #[test]
    fn natural_key_is_common_fields_in_left_order() {
        let keys = JoinKeys::default();
        let l = Header::new(["b", "a", "x"]);
        let r = Header::new(["a", "y", "b"]);
        assert_eq!(keys.resolve(&l, &r).unwrap(), (vec![0, 1], vec![2, 0]));
    }

    #[test]
    fn natural_join_without_common_fields_is_rejected() {
        let keys = JoinKeys::default();
        let err = keys.resolve(&Header::new(["a"]), &Header::new(["b"]));
        assert!(matches!(err, Err(OpError::Core(tabula_core::Error::Contract(_)))));
    }

    #[test]
    fn key_arity_mismatch_is_rejected() {
        let keys = JoinKeys {
            lkey: Some(KeySpec::from(["a", "b"])),
            rkey: Some(KeySpec::from("a")),
        };
        let h = Header::new(["a", "b"]);
        assert!(keys.resolve(&h, &h).is_err());
    }

    #[test]
    fn layout_places_keys_for_right_only_rows() {
        let l = Header::new(["id", "colour"]);
        let r = Header::new(["shape", "id"]);
        let layout = JoinLayout::new(&l, &r, vec![0], vec![1], None, Some("r_"), Value::Null);
        assert_eq!(layout.header, Header::new(["id", "colour", "r_shape"]));
        assert_eq!(layout.right_only(&row!["square", 4]), row![4, None::<i64>, "square"]);
        assert_eq!(layout.left_only(row![1]), row![1, None::<i64>, None::<i64>]);
        assert_eq!(
            layout.joined(&row![1, "blue"], &row!["circle", 1]),
            row![1, "blue", "circle"]
        );
    }
}
