//! Aggregation over fixed-width numeric bins of one field.
//!
//! Bins are half-open `[lo, lo + width)`. The first bin starts at `minv`, or
//! at the smallest value when no minimum is given; rows below `minv` are
//! skipped. With a `maxv`, bins stop at the one whose upper edge reaches it,
//! that last bin is closed on its right and its upper edge is clipped to
//! `maxv`, and empty bins up to `maxv` are still emitted. Without one, bins
//! run until the input is exhausted. Empty bins between populated ones are
//! always emitted. Edges are integers when width and bounds are integers.
//!
//! Output columns: `minv`, `maxv`, then the aggregated fields.

use std::sync::Arc;

use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::key::KeySpec;
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::sort::{sorted, SortOptions};
use crate::traits::{instance_tag, OpError, Result, RowStream, Scan, Table, TableRef};

use super::{funcs, AggSpec, Aggregator};

pub type BinReduceFn = Arc<dyn Fn(&Value, &Value, &[Row]) -> Result<Row> + Send + Sync>;

/// Parameters shared by the range views.
#[derive(Clone)]
struct RangeParams {
    source: TableRef,
    field: FieldRef,
    width: Value,
    minv: Option<Value>,
    maxv: Option<Value>,
    presorted: bool,
    sort: SortOptions,
}

impl RangeParams {
    fn new(source: TableRef, field: FieldRef, width: Value) -> Self {
        Self {
            source,
            field,
            width,
            minv: None,
            maxv: None,
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    fn bins(&self) -> Result<BinStream> {
        let width = self
            .width
            .as_f64()
            .filter(|w| *w > 0.0 && w.is_finite())
            .ok_or_else(|| {
                OpError::contract(format!("bin width must be positive, got {}", self.width))
            })?;
        let bound = |v: &Option<Value>, name: &str| -> Result<Option<f64>> {
            match v {
                None => Ok(None),
                Some(v) => v
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| OpError::contract(format!("{name} must be numeric, got {v}"))),
            }
        };
        let minv = bound(&self.minv, "minv")?;
        let maxv = bound(&self.maxv, "maxv")?;

        let input = if self.presorted {
            self.source.clone()
        } else {
            sorted(self.source.clone(), KeySpec::Field(self.field.clone()), false, &self.sort)
        };
        let scan = input.scan()?;
        let pos = scan.header.resolve(&self.field)?;

        let ints = matches!(self.width, Value::Int(_))
            && !matches!(self.minv, Some(Value::Float(_)))
            && !matches!(self.maxv, Some(Value::Float(_)));
        Ok(BinStream {
            rows: Some(scan.rows),
            header: scan.header,
            pos,
            width,
            maxv,
            edges: minv.map(|m| Edges::new(m, ints && matches!(self.minv, Some(Value::Int(_))))),
            ints,
            current: 0,
            group: Vec::new(),
            pending: None,
        })
    }

    fn tag_params(&self) -> Option<Cachetag> {
        Cachetag::builder("range")
            .tag(&self.source.cachetag()?)
            .param(&(&self.field, &self.width, &self.minv, &self.maxv, self.presorted))
            .ok()
            .map(|b| b.finish())
    }
}

/// Lower edge of the first bin and whether edges are reported as integers.
#[derive(Debug, Clone, Copy)]
struct Edges {
    start: f64,
    ints: bool,
}

impl Edges {
    fn new(start: f64, ints: bool) -> Self {
        Self { start, ints }
    }

    fn edge(&self, i: u64, width: f64) -> f64 {
        self.start + i as f64 * width
    }

    fn value(&self, x: f64) -> Value {
        if self.ints {
            Value::Int(x as i64)
        } else {
            Value::Float(x)
        }
    }
}

/// Number of bins needed to reach `maxv` from `start`, at least one.
fn bin_count(start: f64, maxv: f64, width: f64) -> u64 {
    (((maxv - start) / width).ceil() as u64).max(1)
}

/// One bin at a time: `(lo, hi, rows)`.
struct BinStream {
    rows: Option<RowStream>,
    header: Header,
    pos: usize,
    width: f64,
    maxv: Option<f64>,
    edges: Option<Edges>,
    ints: bool,
    current: u64,
    group: Vec<Row>,
    pending: Option<(u64, Row)>,
}

impl BinStream {
    fn last_bin(&self) -> Option<u64> {
        match (self.edges, self.maxv) {
            (Some(e), Some(m)) if m >= e.start => Some(bin_count(e.start, m, self.width) - 1),
            _ => None,
        }
    }

    fn emit(&mut self) -> Option<(Value, Value, Vec<Row>)> {
        let edges = self.edges?;
        let lo = edges.edge(self.current, self.width);
        let mut hi = edges.edge(self.current + 1, self.width);
        if let Some(m) = self.maxv {
            hi = hi.min(m);
        }
        self.current += 1;
        Some((edges.value(lo), edges.value(hi), std::mem::take(&mut self.group)))
    }

    /// Pull the next usable row and its bin index, or `None` at the end.
    fn pull(&mut self) -> Result<Option<(u64, Row)>> {
        loop {
            let Some(rows) = self.rows.as_mut() else {
                return Ok(None);
            };
            let row = match rows.next() {
                None => {
                    self.rows = None;
                    return Ok(None);
                }
                Some(row) => row?,
            };
            let value = row.get(self.pos).cloned().unwrap_or_default();
            if value.is_null() {
                continue;
            }
            let v = value.as_f64().ok_or_else(|| {
                let field = self.header.name(self.pos).unwrap_or_default().to_string();
                OpError::Aggregation {
                    field,
                    message: format!("range: non-numeric value {value}"),
                }
            })?;
            let edges = *self
                .edges
                .get_or_insert_with(|| Edges::new(v, self.ints && matches!(value, Value::Int(_))));
            if v < edges.start {
                continue;
            }
            if let Some(m) = self.maxv {
                if v > m {
                    // Input is sorted: nothing further can land in a bin.
                    self.rows = None;
                    return Ok(None);
                }
            }
            let mut idx = ((v - edges.start) / self.width).floor() as u64;
            if let Some(last) = self.last_bin() {
                idx = idx.min(last);
            }
            return Ok(Some((idx, row)));
        }
    }

    fn next_bin(&mut self) -> Result<Option<(Value, Value, Vec<Row>)>> {
        loop {
            if let Some((idx, row)) = self.pending.take() {
                if idx == self.current {
                    self.group.push(row);
                } else {
                    self.pending = Some((idx, row));
                    return Ok(self.emit());
                }
            }
            match self.pull()? {
                Some(next) => self.pending = Some(next),
                None => {
                    let more = match self.last_bin() {
                        Some(last) => self.current <= last,
                        None => !self.group.is_empty(),
                    };
                    return Ok(if more { self.emit() } else { None });
                }
            }
        }
    }
}

struct Binned<F> {
    bins: BinStream,
    f: F,
    failed: bool,
}

impl<F> Iterator for Binned<F>
where
    F: FnMut(Value, Value, Vec<Row>) -> Result<Row>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let out = match self.bins.next_bin() {
            Ok(Some((lo, hi, rows))) => (self.f)(lo, hi, rows),
            Ok(None) => return None,
            Err(e) => Err(e),
        };
        if out.is_err() {
            self.failed = true;
        }
        Some(out)
    }
}

/// Aggregated fields per bin.
pub struct RangeAggregate {
    id: TableId,
    params: RangeParams,
    spec: AggSpec,
}

impl RangeAggregate {
    pub fn new(source: TableRef, field: impl Into<FieldRef>, width: impl Into<Value>) -> Self {
        Self {
            id: TableId::fresh(),
            params: RangeParams::new(source, field.into(), width.into()),
            spec: AggSpec::default(),
        }
    }

    pub fn minv(mut self, minv: impl Into<Value>) -> Self {
        self.params.minv = Some(minv.into());
        self
    }

    pub fn maxv(mut self, maxv: impl Into<Value>) -> Self {
        self.params.maxv = Some(maxv.into());
        self
    }

    pub fn presorted(mut self, presorted: bool) -> Self {
        self.params.presorted = presorted;
        self
    }

    pub fn sort_options(mut self, opts: SortOptions) -> Self {
        self.params.sort = opts;
        self
    }

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

    pub fn rows<F>(mut self, out: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Row]) -> Result<Value> + Send + Sync + 'static,
    {
        self.spec.fields.push((out.into(), Aggregator::Rows(Arc::new(f))));
        self
    }

    pub fn errorvalue(mut self, value: impl Into<Value>) -> Self {
        self.spec.errorvalue = Some(value.into());
        self
    }
}

impl Table for RangeAggregate {
    fn name(&self) -> &'static str {
        "rangeaggregate"
    }

    fn scan(&self) -> Result<Scan> {
        if self.spec.fields.is_empty() {
            return Err(OpError::contract("range aggregate needs at least one output field"));
        }
        let bins = self.params.bins()?;
        let spec = self.spec.resolve(&bins.header)?;
        let header = self.header()?;
        let rows = Binned {
            bins,
            f: move |lo: Value, hi: Value, rows: Vec<Row>| -> Result<Row> {
                let mut out = vec![lo, hi];
                out.extend(spec.apply(&rows)?);
                Ok(out)
            },
            failed: false,
        };
        Ok(Scan::new(header, rows))
    }

    fn header(&self) -> Result<Header> {
        let mut fields = vec!["minv".to_string(), "maxv".to_string()];
        fields.extend(self.spec.names().map(String::from));
        Ok(Header::from(fields))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let params = self.params.tag_params()?;
        Some(
            Cachetag::builder("rangeaggregate")
                .tag(&params)
                .tag(&instance_tag("rangeaggregate", self.id, &[&self.params.source])?)
                .finish(),
        )
    }
}

/// Number of rows per bin: `minv`, `maxv`, `count`.
pub struct RangeCounts(RangeAggregate);

impl RangeCounts {
    pub fn new(source: TableRef, field: impl Into<FieldRef>, width: impl Into<Value>) -> Self {
        Self(RangeAggregate::new(source, field, width).rows("count", funcs::count_rows))
    }

    pub fn minv(self, minv: impl Into<Value>) -> Self {
        Self(self.0.minv(minv))
    }

    pub fn maxv(self, maxv: impl Into<Value>) -> Self {
        Self(self.0.maxv(maxv))
    }

    pub fn presorted(self, presorted: bool) -> Self {
        Self(self.0.presorted(presorted))
    }
}

impl Table for RangeCounts {
    fn name(&self) -> &'static str {
        "rangecounts"
    }

    fn scan(&self) -> Result<Scan> {
        self.0.scan()
    }

    fn header(&self) -> Result<Header> {
        self.0.header()
    }

    fn cachetag(&self) -> Option<Cachetag> {
        self.0.params.tag_params()
    }
}

/// Reduces each bin with `reducer(lo, hi, rows)`; `header` names its output.
pub struct RangeRowReduce {
    id: TableId,
    params: RangeParams,
    reducer: BinReduceFn,
    header: Header,
}

impl RangeRowReduce {
    pub fn new<F>(
        source: TableRef,
        field: impl Into<FieldRef>,
        width: impl Into<Value>,
        reducer: F,
        header: impl Into<Header>,
    ) -> Self
    where
        F: Fn(&Value, &Value, &[Row]) -> Result<Row> + Send + Sync + 'static,
    {
        Self {
            id: TableId::fresh(),
            params: RangeParams::new(source, field.into(), width.into()),
            reducer: Arc::new(reducer),
            header: header.into(),
        }
    }

    pub fn minv(mut self, minv: impl Into<Value>) -> Self {
        self.params.minv = Some(minv.into());
        self
    }

    pub fn maxv(mut self, maxv: impl Into<Value>) -> Self {
        self.params.maxv = Some(maxv.into());
        self
    }

    pub fn presorted(mut self, presorted: bool) -> Self {
        self.params.presorted = presorted;
        self
    }
}

impl Table for RangeRowReduce {
    fn name(&self) -> &'static str {
        "rangerowreduce"
    }

    fn scan(&self) -> Result<Scan> {
        let reducer = self.reducer.clone();
        let rows = Binned {
            bins: self.params.bins()?,
            f: move |lo: Value, hi: Value, rows: Vec<Row>| -> Result<Row> {
                reducer(&lo, &hi, &rows)
            },
            failed: false,
        };
        Ok(Scan::new(self.header.clone(), rows))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let params = self.params.tag_params()?;
        Some(
            Cachetag::builder("rangerowreduce")
                .tag(&params)
                .tag(&instance_tag("rangerowreduce", self.id, &[&self.params.source])?)
                .finish(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use tabula_core::row;

    fn values() -> TableRef {
        Arc::new(MemTable::new(
            ["x", "tag"],
            vec![row![7, "c"], row![1, "a"], row![3, "b"], row![12, "d"], row![10, "e"]],
        ))
    }

    #[test]
    fn counts_with_gaps_and_open_end() {
        let (hdr, rows) = materialize(&RangeCounts::new(values(), "x", 3)).unwrap();
        assert_eq!(hdr, Header::new(["minv", "maxv", "count"]));
        assert_eq!(
            rows,
            vec![
                row![1, 4, 2],
                row![4, 7, 0],
                row![7, 10, 1],
                row![10, 13, 2],
            ]
        );
    }

    #[test]
    fn bounded_bins_close_on_maxv() {
        let counts = RangeCounts::new(values(), "x", 5).minv(0).maxv(10);
        let (_, rows) = materialize(&counts).unwrap();
        // 10 lands in the last, closed bin; 12 is beyond maxv.
        assert_eq!(rows, vec![row![0, 5, 2], row![5, 10, 2]]);
    }

    #[test]
    fn trailing_empty_bins_up_to_maxv() {
        let counts = RangeCounts::new(values(), "x", 5).minv(0).maxv(24);
        let (_, rows) = materialize(&counts).unwrap();
        assert_eq!(
            rows,
            vec![
                row![0, 5, 2],
                row![5, 10, 1],
                row![10, 15, 2],
                row![15, 20, 0],
                row![20, 24, 0],
            ]
        );
    }

    #[test]
    fn aggregate_fields_and_float_edges() {
        let agg = RangeAggregate::new(values(), "x", 2.5)
            .minv(0)
            .maxv(5)
            .field("tags", "tag", funcs::list);
        let (hdr, rows) = materialize(&agg).unwrap();
        assert_eq!(hdr, Header::new(["minv", "maxv", "tags"]));
        assert_eq!(
            rows,
            vec![
                row![0.0, 2.5, Value::List(row!["a"])],
                row![2.5, 5.0, Value::List(row!["b"])],
            ]
        );
    }

    #[test]
    fn row_reduce_per_bin() {
        let reduce = RangeRowReduce::new(
            values(),
            "x",
            10,
            |lo: &Value, _hi: &Value, rows: &[Row]| Ok(vec![lo.clone(), Value::from(rows.len())]),
            ["from", "n"],
        );
        assert_eq!(materialize(&reduce).unwrap().1, vec![row![1, 4], row![11, 1]]);
    }

    #[test]
    fn rows_below_minv_are_skipped() {
        let counts = RangeCounts::new(values(), "x", 5).minv(5);
        let (_, rows) = materialize(&counts).unwrap();
        assert_eq!(rows, vec![row![5, 10, 1], row![10, 15, 2]]);
    }

    #[test]
    fn maxv_without_minv_starts_at_smallest_value() {
        let counts = RangeCounts::new(values(), "x", 5).maxv(10);
        let (_, rows) = materialize(&counts).unwrap();
        // Bins [1, 6) and [6, 10]; 12 lies beyond maxv.
        assert_eq!(rows, vec![row![1, 6, 2], row![6, 10, 2]]);
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(RangeCounts::new(values(), "x", 0).scan().is_err());
    }

    #[test]
    fn non_numeric_values_fail() {
        let t: TableRef = Arc::new(MemTable::new(["x"], vec![row![1], row!["q"]]));
        assert!(materialize(&RangeCounts::new(t, "x", 1)).is_err());
    }
}
