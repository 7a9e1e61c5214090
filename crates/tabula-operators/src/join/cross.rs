//! Cartesian product of any number of tables.
//!
//! Every pairing must be re-enumerable, so all inputs are buffered in memory
//! for the duration of a scan.

use std::sync::Arc;

use tabula_core::hash::Cachetag;
use tabula_core::schema::Header;
use tabula_core::types::{Row, Value};

use crate::traits::{fit_row, materialize, OpError, Result, Scan, Table, TableRef};

pub struct CrossJoin {
    tables: Vec<TableRef>,
    prefix: bool,
    missing: Value,
}

impl CrossJoin {
    pub fn new(tables: Vec<TableRef>) -> Self {
        Self {
            tables,
            prefix: false,
            missing: Value::Null,
        }
    }

    /// Prefix every field with its table's 1-based position: `1_foo`.
    pub fn prefix(mut self, prefix: bool) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    fn combine(&self, headers: &[Header]) -> Header {
        let mut fields = Vec::new();
        for (n, hdr) in headers.iter().enumerate() {
            for f in hdr.iter() {
                if self.prefix {
                    fields.push(format!("{}_{f}", n + 1));
                } else {
                    fields.push(f.to_string());
                }
            }
        }
        Header::from(fields)
    }
}

impl Table for CrossJoin {
    fn name(&self) -> &'static str {
        "crossjoin"
    }

    fn scan(&self) -> Result<Scan> {
        if self.tables.is_empty() {
            return Err(OpError::contract("cross join needs at least one table"));
        }
        let mut headers = Vec::with_capacity(self.tables.len());
        let mut inputs = Vec::with_capacity(self.tables.len());
        for t in &self.tables {
            let (hdr, rows) = materialize(t.as_ref())?;
            let width = hdr.len();
            inputs.push(
                rows.into_iter()
                    .map(|r| fit_row(r, width, &self.missing))
                    .collect::<Vec<_>>(),
            );
            headers.push(hdr);
        }
        let header = self.combine(&headers);
        let done = inputs.iter().any(Vec::is_empty);
        Ok(Scan::new(
            header,
            Odometer {
                positions: vec![0; inputs.len()],
                inputs: Arc::new(inputs),
                done,
            },
        ))
    }

    fn header(&self) -> Result<Header> {
        let headers = self
            .tables
            .iter()
            .map(|t| t.header())
            .collect::<Result<Vec<_>>>()?;
        Ok(self.combine(&headers))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let mut b = Cachetag::builder("crossjoin")
            .param(&(self.prefix, &self.missing))
            .ok()?;
        for t in &self.tables {
            b = b.tag(&t.cachetag()?);
        }
        Some(b.finish())
    }
}

/// Enumerates every combination, last table varying fastest.
struct Odometer {
    inputs: Arc<Vec<Vec<Row>>>,
    positions: Vec<usize>,
    done: bool,
}

impl Iterator for Odometer {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let row: Row = self
            .inputs
            .iter()
            .zip(&self.positions)
            .flat_map(|(rows, &p)| rows[p].iter().cloned())
            .collect();

        // Advance from the rightmost table, carrying leftwards.
        let mut i = self.positions.len();
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            self.positions[i] += 1;
            if self.positions[i] < self.inputs[i].len() {
                break;
            }
            self.positions[i] = 0;
        }
        Some(Ok(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use tabula_core::row;

    #[test]
    fn product_of_three_tables() {
        let a: TableRef = Arc::new(MemTable::new(["id", "c"], vec![row![1, "r"], row![2, "b"]]));
        let b: TableRef = Arc::new(MemTable::new(["id", "s"], vec![row![1, "o"], row![3, "x"]]));
        let c: TableRef = Arc::new(MemTable::new(["z"], vec![row![true]]));
        let (hdr, rows) = materialize(&CrossJoin::new(vec![a, b, c]).prefix(true)).unwrap();
        assert_eq!(hdr, Header::new(["1_id", "1_c", "2_id", "2_s", "3_z"]));
        assert_eq!(
            rows,
            vec![
                row![1, "r", 1, "o", true],
                row![1, "r", 3, "x", true],
                row![2, "b", 1, "o", true],
                row![2, "b", 3, "x", true],
            ]
        );
    }

    #[test]
    fn empty_input_yields_no_rows() {
        let a: TableRef = Arc::new(MemTable::new(["a"], vec![row![1]]));
        let b: TableRef = Arc::new(MemTable::new(["b"], vec![]));
        let (hdr, rows) = materialize(&CrossJoin::new(vec![a, b])).unwrap();
        assert_eq!(hdr.len(), 2);
        assert!(rows.is_empty());
    }

    #[test]
    fn short_rows_are_padded() {
        let a: TableRef = Arc::new(MemTable::new(["a", "b"], vec![row![1]]));
        let b: TableRef = Arc::new(MemTable::new(["c"], vec![row![2]]));
        let (_, rows) = materialize(&CrossJoin::new(vec![a, b]).missing("-")).unwrap();
        assert_eq!(rows, vec![row![1, "-", 2]]);
    }
}
