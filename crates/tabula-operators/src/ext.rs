//! Fluent construction of view pipelines.
//!
//! `TableExt` hangs the common operators off a `TableRef` so pipelines read
//! left to right:
//!
//! ```ignore
//! let out = people.sort("age", false).join(&colours, "id").distinct();
//! ```
//!
//! Every method builds a view with default settings and returns it as a new
//! `TableRef`. Operators with more knobs return their builder instead
//! (`aggregate`, `join_with`), or can be constructed directly.

use std::sync::Arc;

use tabula_core::key::KeySpec;
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::aggregate::{Aggregate, AggregateBuilder};
use crate::cat::Cat;
use crate::dedup::{Conflicts, Distinct, Duplicates, MergeDuplicates, Unique};
use crate::join::{
    diff, Complement, CrossJoin, HashComplement, HashIntersection, HashJoin, HashJoinKind,
    Intersection, Join, JoinKind,
};
use crate::merge::MergeTables;
use crate::reshape::{Melt, Recast, Transpose};
use crate::sort::{SortOptions, SortView};
use crate::source::MemTable;
use crate::traits::{materialize, Result, Table, TableRef};

/// In-memory table as a `TableRef`.
pub fn from_rows(header: impl Into<Header>, rows: Vec<Row>) -> TableRef {
    Arc::new(MemTable::new(header, rows))
}

pub trait TableExt {
    fn table_ref(&self) -> TableRef;

    /// t.sort(key, reverse)
    fn sort(&self, key: impl Into<KeySpec>, reverse: bool) -> TableRef {
        Arc::new(SortView::new(self.table_ref(), key).reverse(reverse))
    }

    /// t.sort_with(key, reverse, opts): sort with spill/cache settings.
    fn sort_with(&self, key: impl Into<KeySpec>, reverse: bool, opts: SortOptions) -> TableRef {
        Arc::new(
            SortView::new(self.table_ref(), key)
                .reverse(reverse)
                .with_options(opts),
        )
    }

    /// t.cat(others): `t` followed by `others`, headers unioned.
    fn cat(&self, others: &[TableRef]) -> TableRef {
        let mut sources = vec![self.table_ref()];
        sources.extend(others.iter().cloned());
        Arc::new(Cat::new(sources))
    }

    /// t.mergesort(others, key): all inputs merged into one sorted table.
    fn mergesort(&self, others: &[TableRef], key: impl Into<KeySpec>) -> TableRef {
        let mut sources = vec![self.table_ref()];
        sources.extend(others.iter().cloned());
        Arc::new(MergeTables::new(sources, key))
    }

    /// t.join_with(right, kind): the sort-merge join builder.
    fn join_with(&self, right: &TableRef, kind: JoinKind) -> Join {
        Join::new(self.table_ref(), right.clone(), kind)
    }

    fn join(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Inner).key(key))
    }

    fn leftjoin(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Left).key(key))
    }

    fn rightjoin(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Right).key(key))
    }

    fn outerjoin(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Full).key(key))
    }

    fn antijoin(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Anti).key(key))
    }

    fn lookupjoin(&self, right: &TableRef, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(self.join_with(right, JoinKind::Lookup).key(key))
    }

    /// t.hashjoin(right, kind, key): hashes `right` (or `t` for a right
    /// join) in memory and streams the other side in its own order.
    fn hashjoin(&self, right: &TableRef, kind: HashJoinKind, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(HashJoin::new(self.table_ref(), right.clone(), kind).key(key))
    }

    fn crossjoin(&self, others: &[TableRef]) -> TableRef {
        let mut tables = vec![self.table_ref()];
        tables.extend(others.iter().cloned());
        Arc::new(CrossJoin::new(tables))
    }

    fn complement(&self, other: &TableRef) -> TableRef {
        Arc::new(Complement::new(self.table_ref(), other.clone()))
    }

    fn intersection(&self, other: &TableRef) -> TableRef {
        Arc::new(Intersection::new(self.table_ref(), other.clone()))
    }

    fn hashcomplement(&self, other: &TableRef) -> TableRef {
        Arc::new(HashComplement::new(self.table_ref(), other.clone()))
    }

    fn hashintersection(&self, other: &TableRef) -> TableRef {
        Arc::new(HashIntersection::new(self.table_ref(), other.clone()))
    }

    /// t.diff(other) -> (added, removed)
    fn diff(&self, other: &TableRef) -> (TableRef, TableRef) {
        let (added, removed) = diff(self.table_ref(), other.clone());
        (Arc::new(added), Arc::new(removed))
    }

    /// t.aggregate(key).field(..).build()
    fn aggregate(&self, key: impl Into<KeySpec>) -> AggregateBuilder {
        Aggregate::builder(self.table_ref(), key)
    }

    fn distinct(&self) -> TableRef {
        Arc::new(Distinct::new(self.table_ref()))
    }

    fn unique(&self, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(Unique::new(self.table_ref(), key))
    }

    fn duplicates(&self, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(Duplicates::new(self.table_ref(), key))
    }

    fn conflicts(&self, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(Conflicts::new(self.table_ref(), key))
    }

    fn mergeduplicates(&self, key: impl Into<KeySpec>) -> TableRef {
        Arc::new(MergeDuplicates::new(self.table_ref(), key))
    }

    /// t.melt(key): every non-key field becomes a variable.
    fn melt<I, F>(&self, key: I) -> TableRef
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        Arc::new(Melt::new(self.table_ref()).key(key))
    }

    /// t.recast(): inverse of `melt` with the default field names.
    fn recast(&self) -> TableRef {
        Arc::new(Recast::new(self.table_ref()))
    }

    fn transpose(&self) -> TableRef {
        Arc::new(Transpose::new(self.table_ref()))
    }

    /// Scan and collect the data rows.
    fn to_rows(&self) -> Result<Vec<Row>> {
        Ok(materialize(self.table_ref().as_ref())?.1)
    }

    /// Values of one field, in row order.
    fn values(&self, field: impl Into<FieldRef>) -> Result<Vec<Value>> {
        let scan = self.table_ref().scan()?;
        let pos = scan.header.resolve(&field.into())?;
        scan.rows
            .map(|row| row.map(|r| r.get(pos).cloned().unwrap_or_default()))
            .collect()
    }
}

impl TableExt for TableRef {
    fn table_ref(&self) -> TableRef {
        Arc::clone(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::funcs;
    use tabula_core::row;

    #[test]
    fn pipeline_reads_left_to_right() {
        let people = from_rows(
            ["id", "name"],
            vec![row![2, "bo"], row![1, "al"], row![3, "cy"], row![1, "al"]],
        );
        let colours = from_rows(["id", "colour"], vec![row![1, "red"], row![3, "blue"]]);

        let out = people.distinct().join(&colours, "id").sort("name", true);
        assert_eq!(
            out.to_rows().unwrap(),
            vec![row![3, "cy", "blue"], row![1, "al", "red"]]
        );
        assert_eq!(out.values("colour").unwrap(), row!["blue", "red"]);
    }

    #[test]
    fn aggregate_through_the_builder() {
        let t = from_rows(["k", "v"], vec![row!["a", 1], row!["b", 2], row!["a", 4]]);
        let agg: TableRef = Arc::new(t.aggregate("k").value("v", funcs::sum).build().unwrap());
        assert_eq!(agg.to_rows().unwrap(), vec![row!["a", 5], row!["b", 2]]);
    }

    #[test]
    fn diff_reports_both_directions() {
        let a = from_rows(["x"], vec![row![1], row![2]]);
        let b = from_rows(["x"], vec![row![2], row![3]]);
        let (added, removed) = a.diff(&b);
        assert_eq!(added.to_rows().unwrap(), vec![row![3]]);
        assert_eq!(removed.to_rows().unwrap(), vec![row![1]]);
    }
}
