//! Group-wise aggregation over key-sorted input.
//!
//! - `Aggregate`: named output fields, each computed from a group's values
//!   for one field or from the group's whole rows. Built with
//!   `AggregateBuilder`; the view is immutable once built.
//! - `RowReduce`: arbitrary reducer from a group to one output row.
//! - `Fold`: left fold of a binary function over one field's values.
//! - `range`: the same three over fixed-width numeric bins.
//!
//! Inputs are sorted by the key first unless declared presorted.

pub mod funcs;
pub mod range;

pub use range::{RangeAggregate, RangeCounts, RangeRowReduce};

use std::sync::Arc;

use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::key::{Key, KeySpec};
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::group::{key_names, sorted_groups, GroupMap};
use crate::sort::SortOptions;
use crate::traits::{instance_tag, value_at, OpError, Result, Scan, Table, TableRef};

pub type ValuesFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
pub type RowsFn = Arc<dyn Fn(&[Row]) -> Result<Value> + Send + Sync>;
pub type ReduceFn = Arc<dyn Fn(&Key, &[Row]) -> Result<Row> + Send + Sync>;
pub type FoldFn = Arc<dyn Fn(Value, Value) -> Result<Value> + Send + Sync>;

/// How one output field is computed from a group.
#[derive(Clone)]
pub enum Aggregator {
    Values { src: FieldRef, f: ValuesFn },
    Rows(RowsFn),
}

enum Resolved {
    Values { pos: usize, f: ValuesFn },
    Rows(RowsFn),
}

/// Named aggregators with the fail-soft setting, resolved once per scan.
#[derive(Clone, Default)]
pub(crate) struct AggSpec {
    pub fields: Vec<(String, Aggregator)>,
    pub errorvalue: Option<Value>,
    pub missing: Value,
}

pub(crate) struct ResolvedSpec {
    fields: Vec<(String, Resolved)>,
    errorvalue: Option<Value>,
    missing: Value,
}

impl AggSpec {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn resolve(&self, header: &Header) -> Result<ResolvedSpec> {
        let fields = self
            .fields
            .iter()
            .map(|(name, agg)| -> Result<(String, Resolved)> {
                let resolved = match agg {
                    Aggregator::Values { src, f } => Resolved::Values {
                        pos: header.resolve(src)?,
                        f: f.clone(),
                    },
                    Aggregator::Rows(f) => Resolved::Rows(f.clone()),
                };
                Ok((name.clone(), resolved))
            })
            .collect::<Result<_>>()?;
        Ok(ResolvedSpec {
            fields,
            errorvalue: self.errorvalue.clone(),
            missing: self.missing.clone(),
        })
    }
}

impl ResolvedSpec {
    /// One value per aggregator for this group.
    pub fn apply(&self, rows: &[Row]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for (name, agg) in &self.fields {
            let result = match agg {
                Resolved::Values { pos, f } => {
                    let values: Vec<Value> =
                        rows.iter().map(|r| value_at(r, *pos, &self.missing)).collect();
                    f(&values)
                }
                Resolved::Rows(f) => f(rows),
            };
            let value = match (result, &self.errorvalue) {
                (Ok(v), _) => v,
                (Err(_), Some(errorvalue)) => errorvalue.clone(),
                (Err(OpError::Aggregation { message, .. }), None) => {
                    return Err(OpError::Aggregation {
                        field: name.clone(),
                        message,
                    })
                }
                (Err(e), None) => {
                    return Err(OpError::Aggregation {
                        field: name.clone(),
                        message: e.to_string(),
                    })
                }
            };
            out.push(value);
        }
        Ok(out)
    }
}

/// Accumulates output field specs, then builds an immutable `Aggregate`.
pub struct AggregateBuilder {
    source: TableRef,
    key: KeySpec,
    spec: AggSpec,
    presorted: bool,
    sort: SortOptions,
}

impl AggregateBuilder {
    pub fn new(source: TableRef, key: impl Into<KeySpec>) -> Self {
        Self {
            source,
            key: key.into(),
            spec: AggSpec::default(),
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    /// Output field `out` = `f` over the group's values of `src`.
    pub fn field<F>(mut self, out: impl Into<String>, src: impl Into<FieldRef>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.spec.fields.push((
            out.into(),
            Aggregator::Values {
                src: src.into(),
                f: Arc::new(f),
            },
        ));
        self
    }

    /// Output field `out` = `f` over the group's whole rows.
    pub fn rows<F>(mut self, out: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Row]) -> Result<Value> + Send + Sync + 'static,
    {
        self.spec.fields.push((out.into(), Aggregator::Rows(Arc::new(f))));
        self
    }

    /// Single aggregator written to a field named `value`.
    pub fn value<F>(self, src: impl Into<FieldRef>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.field("value", src, f)
    }

    /// Substitute `value` for any aggregator that fails instead of failing
    /// the scan.
    pub fn errorvalue(mut self, value: impl Into<Value>) -> Self {
        self.spec.errorvalue = Some(value.into());
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.spec.missing = missing.into();
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

    pub fn build(self) -> Result<Aggregate> {
        if self.key.is_row() {
            return Err(OpError::contract("aggregate key must name fields"));
        }
        if self.spec.fields.is_empty() {
            return Err(OpError::contract("aggregate needs at least one output field"));
        }
        Ok(Aggregate {
            id: TableId::fresh(),
            source: self.source,
            key: self.key,
            spec: self.spec,
            presorted: self.presorted,
            sort: self.sort,
        })
    }
}

/// Output header: key fields, then one field per aggregator.
pub struct Aggregate {
    id: TableId,
    source: TableRef,
    key: KeySpec,
    spec: AggSpec,
    presorted: bool,
    sort: SortOptions,
}

impl Aggregate {
    pub fn builder(source: TableRef, key: impl Into<KeySpec>) -> AggregateBuilder {
        AggregateBuilder::new(source, key)
    }

    fn out_header(&self, src: &Header) -> Result<Header> {
        let positions = self.key.resolve(src)?;
        let mut fields = key_names(src, &positions);
        fields.extend(self.spec.names().map(String::from));
        Ok(Header::from(fields))
    }
}

impl Table for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn scan(&self) -> Result<Scan> {
        let (src, groups) = sorted_groups(&self.source, &self.key, self.presorted, &self.sort)?;
        let header = self.out_header(&src)?;
        let spec = self.spec.resolve(&src)?;
        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            let mut out = key.into_values();
            out.extend(spec.apply(&rows)?);
            Ok(vec![out])
        });
        Ok(Scan::new(header, rows))
    }

    fn header(&self) -> Result<Header> {
        self.out_header(&self.source.header()?)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        instance_tag("aggregate", self.id, &[&self.source])
    }
}

/// Reduces each key group to one row; `header` names the reducer's output.
pub struct RowReduce {
    id: TableId,
    source: TableRef,
    key: KeySpec,
    reducer: ReduceFn,
    header: Header,
    presorted: bool,
    sort: SortOptions,
}

impl RowReduce {
    pub fn new<F>(
        source: TableRef,
        key: impl Into<KeySpec>,
        reducer: F,
        header: impl Into<Header>,
    ) -> Self
    where
        F: Fn(&Key, &[Row]) -> Result<Row> + Send + Sync + 'static,
    {
        Self {
            id: TableId::fresh(),
            source,
            key: key.into(),
            reducer: Arc::new(reducer),
            header: header.into(),
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    pub fn presorted(mut self, presorted: bool) -> Self {
        self.presorted = presorted;
        self
    }

    pub fn sort_options(mut self, opts: SortOptions) -> Self {
        self.sort = opts;
        self
    }
}

impl Table for RowReduce {
    fn name(&self) -> &'static str {
        "rowreduce"
    }

    fn scan(&self) -> Result<Scan> {
        let (_, groups) = sorted_groups(&self.source, &self.key, self.presorted, &self.sort)?;
        let reducer = self.reducer.clone();
        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            Ok(vec![reducer(&key, &rows)?])
        });
        Ok(Scan::new(self.header.clone(), rows))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }

    fn cachetag(&self) -> Option<Cachetag> {
        instance_tag("rowreduce", self.id, &[&self.source])
    }
}

/// Left fold of `f` over each group's values of one field. Output header:
/// key fields, then `value`.
pub struct Fold {
    id: TableId,
    source: TableRef,
    key: KeySpec,
    field: FieldRef,
    f: FoldFn,
    missing: Value,
    presorted: bool,
    sort: SortOptions,
}

impl Fold {
    pub fn new<F>(
        source: TableRef,
        key: impl Into<KeySpec>,
        field: impl Into<FieldRef>,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(Value, Value) -> Result<Value> + Send + Sync + 'static,
    {
        let key = key.into();
        if key.is_row() {
            return Err(OpError::contract("fold key must name fields"));
        }
        Ok(Self {
            id: TableId::fresh(),
            source,
            key,
            field: field.into(),
            f: Arc::new(f),
            missing: Value::Null,
            presorted: false,
            sort: SortOptions::default(),
        })
    }

    /// Value folded in place of a row too short to hold the field.
    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
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

    fn out_header(&self, src: &Header) -> Result<Header> {
        let positions = self.key.resolve(src)?;
        let mut fields = key_names(src, &positions);
        fields.push("value".to_string());
        Ok(Header::from(fields))
    }
}

impl Table for Fold {
    fn name(&self) -> &'static str {
        "fold"
    }

    fn scan(&self) -> Result<Scan> {
        let (src, groups) = sorted_groups(&self.source, &self.key, self.presorted, &self.sort)?;
        let header = self.out_header(&src)?;
        let pos = src.resolve(&self.field)?;
        let f = self.f.clone();
        let missing = self.missing.clone();
        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            let mut values = rows.iter().map(|r| value_at(r, pos, &missing));
            let mut acc = values.next().unwrap_or_default();
            for v in values {
                acc = f(acc, v)?;
            }
            let mut out = key.into_values();
            out.push(acc);
            Ok(vec![out])
        });
        Ok(Scan::new(header, rows))
    }

    fn header(&self) -> Result<Header> {
        self.out_header(&self.source.header()?)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        instance_tag("fold", self.id, &[&self.source])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    fn table() -> TableRef {
        Arc::new(MemTable::new(
            ["k", "v"],
            vec![row!["b", 2], row!["a", 3], row!["a", 7]],
        ))
    }

    #[test]
    fn single_value_aggregation() {
        let agg = Aggregate::builder(table(), 0usize).value(1usize, funcs::sum).build().unwrap();
        let (hdr, rows) = materialize(&agg).unwrap();
        assert_eq!(hdr, Header::new(["k", "value"]));
        assert_eq!(rows, vec![row!["a", 10], row!["b", 2]]);
    }

    #[test]
    fn several_named_fields() {
        let agg = Aggregate::builder(table(), "k")
            .rows("n", funcs::count_rows)
            .field("lo", "v", funcs::min)
            .field("all", "v", funcs::list)
            .build()
            .unwrap();
        let (hdr, rows) = materialize(&agg).unwrap();
        assert_eq!(hdr, Header::new(["k", "n", "lo", "all"]));
        assert_eq!(
            rows,
            vec![
                row!["a", 2, 3, Value::List(row![3, 7])],
                row!["b", 1, 2, Value::List(row![2])],
            ]
        );
    }

    #[test]
    fn failing_aggregator_is_labelled_or_substituted() {
        let t: TableRef = Arc::new(MemTable::new(["k", "v"], vec![row!["a", "x"]]));
        let strict = Aggregate::builder(t.clone(), "k")
            .field("total", "v", funcs::sum)
            .build()
            .unwrap();
        let err = materialize(&strict).unwrap_err();
        assert!(matches!(err, OpError::Aggregation { ref field, .. } if field == "total"));

        let soft = Aggregate::builder(t, "k")
            .field("total", "v", funcs::sum)
            .errorvalue("ERR")
            .build()
            .unwrap();
        assert_eq!(materialize(&soft).unwrap().1, vec![row!["a", "ERR"]]);
    }

    #[test]
    fn whole_row_key_is_rejected() {
        assert!(Aggregate::builder(table(), KeySpec::Row)
            .value(1usize, funcs::count)
            .build()
            .is_err());
    }

    #[test]
    fn row_reduce_and_fold() {
        let reduce = RowReduce::new(
            table(),
            "k",
            |key: &Key, rows: &[Row]| {
                let mut out = key.values().to_vec();
                out.push(Value::from(rows.len()));
                Ok(out)
            },
            ["k", "count"],
        );
        assert_eq!(materialize(&reduce).unwrap().1, vec![row!["a", 2], row!["b", 1]]);

        let fold = Fold::new(table(), "k", "v", |a: Value, b: Value| {
            Ok(Value::from(a.as_i64().unwrap_or(0) * b.as_i64().unwrap_or(0)))
        })
        .unwrap();
        let (hdr, rows) = materialize(&fold).unwrap();
        assert_eq!(hdr, Header::new(["k", "value"]));
        assert_eq!(rows, vec![row!["a", 21], row!["b", 2]]);
    }

    #[test]
    fn fold_fills_short_rows_and_needs_a_field_key() {
        let t: TableRef = Arc::new(MemTable::new(
            ["k", "v"],
            vec![row!["a", 4], row!["a"], row!["b"]],
        ));
        let add = |a: Value, b: Value| -> Result<Value> {
            Ok(Value::from(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
        };
        let fold = Fold::new(t.clone(), "k", "v", add).unwrap().missing(10);
        let (_, rows) = materialize(&fold).unwrap();
        assert_eq!(rows, vec![row!["a", 14], row!["b", 10]]);

        let err = Fold::new(t, KeySpec::Row, "v", add).err().unwrap();
        assert!(matches!(err, OpError::Core(tabula_core::Error::Contract(_))));
    }
}
