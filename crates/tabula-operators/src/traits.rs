//! The table contract every source and operator implements.
//!
//! A table is a re-iterable producer of a header followed by data rows.
//! `scan` opens a fresh pass; the returned stream owns everything it needs
//! (source streams, cached rows, spill readers), so it can outlive the view
//! that produced it and releases its resources when dropped, whether it ran to
//! completion or was abandoned.
//!
//! Views are cheap to build: nothing is read until `scan` is called.

use std::sync::{Arc, Mutex};

use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::schema::Header;
use tabula_core::types::{Row, Value};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

/// A lazily produced stream of data rows.
pub type RowStream = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// Shared handle on a table; views hold these for their sources.
pub type TableRef = Arc<dyn Table>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Core(#[from] tabula_core::Error),

    #[error(transparent)]
    Spill(#[from] tabula_mem::Error),

    #[error(transparent)]
    Io(#[from] tabula_io::Error),

    /// A single-pass table was scanned a second time.
    #[error("table '{0}' is single-pass and has already been scanned")]
    NotReproducible(&'static str),

    #[error("aggregation '{field}' failed: {message}")]
    Aggregation { field: String, message: String },

    #[error("recast: variable '{0}' was not among the sampled columns")]
    UnseenVariable(String),

    #[error("execution error: {0}")]
    Exec(String),
}

impl OpError {
    /// Programmer error: invalid arity, unsupported combination.
    pub fn contract(msg: impl Into<String>) -> Self {
        OpError::Core(tabula_core::Error::Contract(msg.into()))
    }
}

/// One pass over a table.
pub struct Scan {
    pub header: Header,
    pub rows: RowStream,
}

impl Scan {
    pub fn new<I>(header: Header, rows: I) -> Self
    where
        I: Iterator<Item = Result<Row>> + Send + 'static,
    {
        Self {
            header,
            rows: Box::new(rows),
        }
    }

    pub fn empty(header: Header) -> Self {
        Self::new(header, std::iter::empty())
    }

    /// Drain the pass into memory.
    pub fn collect_rows(self) -> Result<(Header, Vec<Row>)> {
        let rows = self.rows.collect::<Result<Vec<_>>>()?;
        Ok((self.header, rows))
    }
}

/// Trait that all tables and views implement.
///
/// Invariants:
/// - Two scans of the same table yield the same sequence, unless the table is
///   single-pass, in which case the second `scan` fails with
///   `OpError::NotReproducible`.
/// - Views never mutate their sources.
pub trait Table: Send + Sync {
    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    /// Open a fresh pass: header plus lazy rows.
    fn scan(&self) -> Result<Scan>;

    /// The header alone. Views override this when it can be derived from
    /// their sources' headers without running the operator.
    fn header(&self) -> Result<Header> {
        Ok(self.scan()?.header)
    }

    /// Fingerprint of what `scan` would currently produce. `None` means the
    /// table is uncacheable, which only disables caching downstream.
    fn cachetag(&self) -> Option<Cachetag> {
        None
    }
}

/// Scan `table` and drain it into memory.
pub fn materialize(table: &dyn Table) -> Result<(Header, Vec<Row>)> {
    table.scan()?.collect_rows()
}

/// Fingerprint for views whose behaviour includes caller-supplied functions.
/// Functions cannot be hashed, so the view's own instance id stands in for
/// them; the tag still changes whenever a source's tag does.
pub(crate) fn instance_tag(op: &str, id: TableId, sources: &[&TableRef]) -> Option<Cachetag> {
    let mut b = Cachetag::builder(op).bytes(&id.get().to_le_bytes());
    for s in sources {
        b = b.tag(&s.cachetag()?);
    }
    Some(b.finish())
}

/// Value at `idx`, or `missing` for positions past a short row's end.
pub(crate) fn value_at(row: &Row, idx: usize, missing: &Value) -> Value {
    row.get(idx).cloned().unwrap_or_else(|| missing.clone())
}

/// Pad (or cut) a row to exactly `width` values.
pub(crate) fn fit_row(mut row: Row, width: usize, missing: &Value) -> Row {
    if row.len() < width {
        row.resize(width, missing.clone());
    } else {
        row.truncate(width);
    }
    row
}

/// A pass that has already been opened, exposed as a table so it can feed
/// another view (a sort, a header-aligning `Cat`) without scanning the
/// original source a second time.
pub(crate) struct OpenedScan {
    header: Header,
    rows: Mutex<Option<RowStream>>,
}

impl OpenedScan {
    pub(crate) fn table(scan: Scan) -> TableRef {
        Arc::new(Self {
            header: scan.header,
            rows: Mutex::new(Some(scan.rows)),
        })
    }
}

impl Table for OpenedScan {
    fn name(&self) -> &'static str {
        "opened scan"
    }

    fn scan(&self) -> Result<Scan> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| OpError::Exec("opened scan lock poisoned".into()))?
            .take()
            .ok_or(OpError::NotReproducible("opened scan"))?;
        Ok(Scan {
            header: self.header.clone(),
            rows,
        })
    }

    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }
}

/// Iterator over rows shared through an `Arc`, used to replay cached or
/// materialized results without copying the whole vector.
pub(crate) struct SharedRows {
    rows: Arc<Vec<Row>>,
    pos: usize,
}

impl SharedRows {
    pub(crate) fn new(rows: Arc<Vec<Row>>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl Iterator for SharedRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.rows.len().saturating_sub(self.pos);
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::row;

    #[test]
    fn fit_row_pads_and_truncates() {
        let missing = Value::Null;
        assert_eq!(fit_row(row![1], 3, &missing), row![1, None::<i64>, None::<i64>]);
        assert_eq!(fit_row(row![1, 2, 3], 2, &missing), row![1, 2]);
    }

    #[test]
    fn opened_scan_yields_its_rows_once() {
        let scan = Scan::new(Header::new(["a"]), vec![Ok(row![1]), Ok(row![2])].into_iter());
        let t = OpenedScan::table(scan);
        assert_eq!(t.header().unwrap(), Header::new(["a"]));
        assert_eq!(materialize(t.as_ref()).unwrap().1, vec![row![1], row![2]]);
        assert!(matches!(t.scan(), Err(OpError::NotReproducible(_))));
    }

    #[test]
    fn shared_rows_replays_in_order() {
        let rows = Arc::new(vec![row![1], row![2]]);
        let out: Vec<Row> = SharedRows::new(rows).collect::<Result<_>>().unwrap();
        assert_eq!(out, vec![row![1], row![2]]);
    }
}
