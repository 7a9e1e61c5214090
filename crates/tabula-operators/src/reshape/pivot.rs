//! Two-field pivot with aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::key::{Key, KeySpec};
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::aggregate::ValuesFn;
use crate::group::{key_names, sorted_groups, GroupMap, GroupedRows};
use crate::sort::SortOptions;
use crate::traits::{
    instance_tag, value_at, OpError, OpenedScan, Result, RowStream, Scan, Table, TableRef,
};

use super::label;

/// Rows keyed by `f1`, one column per distinct value of `f2`, each cell the
/// aggregate of the `f3` values for that pair. Columns come from a full scan,
/// so nothing is lost; cells with no values hold `missing`.
pub struct Pivot {
    id: TableId,
    source: TableRef,
    f1: FieldRef,
    f2: FieldRef,
    f3: FieldRef,
    aggfn: ValuesFn,
    missing: Value,
    presorted: bool,
    sort: SortOptions,
}

impl Pivot {
    pub fn new<F>(
        source: TableRef,
        f1: impl Into<FieldRef>,
        f2: impl Into<FieldRef>,
        f3: impl Into<FieldRef>,
        aggfn: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: TableId::fresh(),
            source,
            f1: f1.into(),
            f2: f2.into(),
            f3: f3.into(),
            aggfn: Arc::new(aggfn),
            missing: Value::Null,
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    /// Input is already sorted by `f1`.
    pub fn presorted(mut self, presorted: bool) -> Self {
        self.presorted = presorted;
        self
    }

    pub fn sort_options(mut self, opts: SortOptions) -> Self {
        self.sort = opts;
        self
    }

    fn columns(&self) -> Result<(Header, Vec<Value>)> {
        let scan = self.source.scan()?;
        let f2 = scan.header.resolve(&self.f2)?;
        let mut seen = BTreeSet::new();
        for row in scan.rows {
            seen.insert(value_at(&row?, f2, &self.missing));
        }
        Ok((scan.header, seen.into_iter().collect()))
    }

    /// Sorts a single pass of the source by `f1`, collecting the `f2` values
    /// as the sort consumes it.
    fn sort_collecting(
        &self,
        key: &KeySpec,
    ) -> Result<(Header, GroupedRows<RowStream>, Vec<Value>)> {
        let scan = self.source.scan()?;
        let f2 = scan.header.resolve(&self.f2)?;
        let seen = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&seen);
        let missing = self.missing.clone();
        let rows = scan.rows.inspect(move |row| {
            if let (Ok(row), Ok(mut seen)) = (row, sink.lock()) {
                seen.insert(value_at(row, f2, &missing));
            }
        });
        let source = OpenedScan::table(Scan::new(scan.header, rows));
        // The sort drains its input before returning, so every value is seen.
        let (src, groups) = sorted_groups(&source, key, false, &self.sort)?;
        let columns = seen
            .lock()
            .map_err(|_| OpError::Exec("pivot column lock poisoned".into()))?
            .iter()
            .cloned()
            .collect();
        Ok((src, groups, columns))
    }

    fn out_header(&self, src: &Header, columns: &[Value]) -> Result<Header> {
        let key = KeySpec::Field(self.f1.clone());
        let mut fields = key_names(src, &key.resolve(src)?);
        fields.extend(columns.iter().map(label));
        Ok(Header::from(fields))
    }
}

impl Table for Pivot {
    fn name(&self) -> &'static str {
        "pivot"
    }

    fn scan(&self) -> Result<Scan> {
        let key = KeySpec::Field(self.f1.clone());
        let (src, groups, columns) = if self.presorted {
            let (_, columns) = self.columns()?;
            let (src, groups) = sorted_groups(&self.source, &key, true, &self.sort)?;
            (src, groups, columns)
        } else {
            self.sort_collecting(&key)?
        };
        let f2 = src.resolve(&self.f2)?;
        let f3 = src.resolve(&self.f3)?;
        let header = self.out_header(&src, &columns)?;

        let aggfn = self.aggfn.clone();
        let missing = self.missing.clone();
        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            let mut cells: BTreeMap<Value, Vec<Value>> = BTreeMap::new();
            for row in &rows {
                cells
                    .entry(value_at(row, f2, &missing))
                    .or_default()
                    .push(value_at(row, f3, &missing));
            }
            let mut out = key.into_values();
            for column in &columns {
                out.push(match cells.get(column) {
                    Some(values) => {
                        aggfn(values.as_slice()).map_err(|e| OpError::Aggregation {
                            field: label(column),
                            message: e.to_string(),
                        })?
                    }
                    None => missing.clone(),
                });
            }
            Ok(vec![out])
        });
        Ok(Scan::new(header, rows))
    }

    /// One unsorted pass for the column values.
    fn header(&self) -> Result<Header> {
        let (src, columns) = self.columns()?;
        self.out_header(&src, &columns)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        instance_tag("pivot", self.id, &[&self.source])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::funcs;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    #[test]
    fn pivot_sums_cells() {
        let t: TableRef = Arc::new(MemTable::new(
            ["region", "gender", "style", "units"],
            vec![
                row!["east", "boy", "tee", 12],
                row!["east", "boy", "golf", 14],
                row!["west", "boy", "tee", 12],
                row!["west", "girl", "tee", 8],
                row!["east", "girl", "golf", 3],
                row!["east", "boy", "tee", 1],
            ],
        ));
        let pivot = Pivot::new(t, "region", "gender", "units", funcs::sum);
        let (hdr, rows) = materialize(&pivot).unwrap();
        assert_eq!(hdr, Header::new(["region", "boy", "girl"]));
        assert_eq!(rows, vec![row!["east", 27, 3], row!["west", 12, 8]]);
    }

    #[test]
    fn empty_cells_get_missing() {
        let t: TableRef = Arc::new(MemTable::new(
            ["a", "b", "c"],
            vec![row![1, "x", 5], row![2, "y", 6]],
        ));
        let pivot = Pivot::new(t, "a", "b", "c", funcs::max).missing(0);
        assert_eq!(materialize(&pivot).unwrap().1, vec![row![1, 5, 0], row![2, 0, 6]]);
    }
}
