//! Structural reshapes: transpose, flatten, unflatten.

use std::sync::Arc;

use tabula_core::hash::Cachetag;
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::traits::{materialize, value_at, OpError, Result, RowStream, Scan, Table, TableRef};

use super::label;

/// Columns become rows. The header is treated as the first row, so the
/// output header is the first column (its field name followed by its
/// values). The whole input is buffered.
pub struct Transpose {
    source: TableRef,
    missing: Value,
}

impl Transpose {
    pub fn new(source: TableRef) -> Self {
        Self {
            source,
            missing: Value::Null,
        }
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }
}

impl Table for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn scan(&self) -> Result<Scan> {
        let (src, rows) = materialize(self.source.as_ref())?;
        let mut columns = src.iter().enumerate().map(|(i, name)| {
            let mut out: Row = Vec::with_capacity(rows.len() + 1);
            out.push(Value::from(name));
            out.extend(rows.iter().map(|r| value_at(r, i, &self.missing)));
            out
        });
        let Some(first) = columns.next() else {
            return Ok(Scan::empty(Header::default()));
        };
        let header = Header::from(first.iter().map(label).collect::<Vec<_>>());
        let rest: Vec<Row> = columns.collect();
        Ok(Scan::new(header, rest.into_iter().map(Ok)))
    }

    /// Only the first column is needed, so nothing is buffered.
    fn header(&self) -> Result<Header> {
        let scan = self.source.scan()?;
        let Some(name) = scan.header.iter().next() else {
            return Ok(Header::default());
        };
        let mut fields = vec![label(&Value::from(name))];
        for row in scan.rows {
            fields.push(label(&value_at(&row?, 0, &self.missing)));
        }
        Ok(Header::from(fields))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder("transpose")
            .tag(&self.source.cachetag()?)
            .param(&self.missing)
            .ok()
            .map(|b| b.finish())
    }
}

/// Every data value, row by row.
pub fn flatten(table: &dyn Table) -> Result<impl Iterator<Item = Result<Value>> + Send> {
    let scan = table.scan()?;
    Ok(scan.rows.flat_map(|row| -> Box<dyn Iterator<Item = Result<Value>> + Send> {
        match row {
            Ok(row) => Box::new(row.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }))
}

/// Regroups the values of one field into rows of `period` values, fields
/// `f0`..`f{period-1}`. A short final row is padded with `missing`.
pub struct Unflatten {
    source: TableRef,
    field: FieldRef,
    period: usize,
    missing: Value,
}

impl Unflatten {
    pub fn new(source: TableRef, field: impl Into<FieldRef>, period: usize) -> Self {
        Self {
            source,
            field: field.into(),
            period,
            missing: Value::Null,
        }
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    fn out_header(&self) -> Header {
        Header::from((0..self.period).map(|i| format!("f{i}")).collect::<Vec<_>>())
    }
}

impl Table for Unflatten {
    fn name(&self) -> &'static str {
        "unflatten"
    }

    fn scan(&self) -> Result<Scan> {
        if self.period == 0 {
            return Err(OpError::contract("unflatten period must be at least 1"));
        }
        let scan = self.source.scan()?;
        let pos = scan.header.resolve(&self.field)?;
        Ok(Scan::new(
            self.out_header(),
            Chunked {
                rows: scan.rows,
                pos,
                period: self.period,
                missing: self.missing.clone(),
                done: false,
            },
        ))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.out_header())
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder("unflatten")
            .tag(&self.source.cachetag()?)
            .param(&(&self.field, self.period, &self.missing))
            .ok()
            .map(|b| b.finish())
    }
}

struct Chunked {
    rows: RowStream,
    pos: usize,
    period: usize,
    missing: Value,
    done: bool,
}

impl Iterator for Chunked {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut out = Vec::with_capacity(self.period);
        while out.len() < self.period {
            match self.rows.next() {
                Some(Ok(row)) => out.push(value_at(&row, self.pos, &self.missing)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if out.is_empty() {
            return None;
        }
        out.resize(self.period, self.missing.clone());
        Some(Ok(out))
    }
}

/// Wraps a list of values as a single-column table named `value`, the usual
/// input to `Unflatten`.
pub fn values_table(values: Vec<Value>) -> TableRef {
    Arc::new(crate::source::MemTable::new(
        ["value"],
        values.into_iter().map(|v| vec![v]).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use tabula_core::row;

    fn table() -> TableRef {
        Arc::new(MemTable::new(
            ["id", "colour"],
            vec![row![1, "blue"], row![2, "red"], row![3, "purple"]],
        ))
    }

    #[test]
    fn transpose_swaps_rows_and_columns() {
        let (hdr, rows) = materialize(&Transpose::new(table())).unwrap();
        assert_eq!(hdr, Header::new(["id", "1", "2", "3"]));
        assert_eq!(rows, vec![row!["colour", "blue", "red", "purple"]]);
    }

    #[test]
    fn flatten_then_unflatten_restores_rows() {
        let values: Vec<Value> = flatten(table().as_ref())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(values, row![1, "blue", 2, "red", 3, "purple"]);

        let back = Unflatten::new(values_table(values), "value", 2);
        let (hdr, rows) = materialize(&back).unwrap();
        assert_eq!(hdr, Header::new(["f0", "f1"]));
        assert_eq!(rows, vec![row![1, "blue"], row![2, "red"], row![3, "purple"]]);
    }

    #[test]
    fn unflatten_pads_last_row() {
        let t = values_table(row![1, 2, 3]);
        let rows = materialize(&Unflatten::new(t, 0usize, 2).missing(0)).unwrap().1;
        assert_eq!(rows, vec![row![1, 2], row![3, 0]]);
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(Unflatten::new(table(), "id", 0).scan().is_err());
    }
}
