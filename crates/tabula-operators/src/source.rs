//! In-memory table sources.

use std::sync::{Arc, Mutex};

use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::schema::Header;
use tabula_core::types::Row;

use crate::traits::{OpError, Result, Scan, SharedRows, Table};

/// Owned rows; re-iterable and cacheable.
///
/// The cachetag derives from a process-unique id, so two tables built from
/// equal rows still fingerprint differently. Cloning shares the rows and the id.
#[derive(Debug, Clone)]
pub struct MemTable {
    id: TableId,
    header: Header,
    rows: Arc<Vec<Row>>,
}

impl MemTable {
    pub fn new(header: impl Into<Header>, rows: Vec<Row>) -> Self {
        Self {
            id: TableId::fresh(),
            header: header.into(),
            rows: Arc::new(rows),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Table for MemTable {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn scan(&self) -> Result<Scan> {
        Ok(Scan::new(
            self.header.clone(),
            SharedRows::new(Arc::clone(&self.rows)),
        ))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Some(
            Cachetag::builder("mem")
                .bytes(&self.id.get().to_le_bytes())
                .finish(),
        )
    }
}

type BoxedRows = Box<dyn Iterator<Item = Row> + Send>;

/// Wraps a live iterator. The first scan consumes it; any later scan fails
/// with `OpError::NotReproducible` instead of returning partial data.
pub struct IterTable {
    header: Header,
    rows: Mutex<Option<BoxedRows>>,
}

impl IterTable {
    pub fn new<I>(header: impl Into<Header>, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'static,
    {
        Self {
            header: header.into(),
            rows: Mutex::new(Some(Box::new(rows.into_iter()))),
        }
    }
}

impl Table for IterTable {
    fn name(&self) -> &'static str {
        "iter"
    }

    fn scan(&self) -> Result<Scan> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| OpError::Exec("iter table lock poisoned".into()))?
            .take()
            .ok_or(OpError::NotReproducible("iter"))?;
        Ok(Scan::new(self.header.clone(), rows.map(Ok)))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::materialize;
    use tabula_core::row;

    #[test]
    fn mem_table_is_reiterable() {
        let t = MemTable::new(["a", "b"], vec![row![1, "x"], row![2, "y"]]);
        let first = materialize(&t).unwrap();
        let second = materialize(&t).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.0, Header::new(["a", "b"]));
        assert_eq!(first.1.len(), 2);
    }

    #[test]
    fn mem_tables_with_equal_rows_have_distinct_tags() {
        let a = MemTable::new(["a"], vec![row![1]]);
        let b = MemTable::new(["a"], vec![row![1]]);
        assert_ne!(a.cachetag(), b.cachetag());
        assert_eq!(a.cachetag(), a.clone().cachetag());
    }

    #[test]
    fn iter_table_signals_second_pass() {
        let t = IterTable::new(["a"], vec![row![1], row![2]]);
        assert_eq!(t.header().unwrap().len(), 1);
        assert_eq!(materialize(&t).unwrap().1.len(), 2);
        assert!(matches!(t.scan(), Err(OpError::NotReproducible("iter"))));
        assert!(t.cachetag().is_none());
    }
}
