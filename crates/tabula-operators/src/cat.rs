//! Concatenation with header reconciliation.
//!
//! The output header is the union of all input fields in order of first
//! appearance. Each source row is remapped by field name onto that header;
//! fields a source lacks, and positions past a short row's end, are filled
//! with the missing value. `MergeTables` reuses the same rule.

use tabula_core::hash::Cachetag;
use tabula_core::schema::Header;
use tabula_core::types::{Row, Value};

use crate::traits::{value_at, Result, RowStream, Scan, Table, TableRef};

/// Union of the sources' field names, first appearance wins.
pub fn union_header(headers: &[Header]) -> Header {
    let mut out = Header::default();
    for hdr in headers {
        for f in hdr.iter() {
            if !out.contains(f) {
                out.fields.push(f.to_string());
            }
        }
    }
    out
}

/// For every output field, its position in `src` (if present).
pub(crate) fn column_map(out: &Header, src: &Header) -> Vec<Option<usize>> {
    out.iter().map(|f| src.index_of(f)).collect()
}

pub(crate) fn remap_row(row: &Row, map: &[Option<usize>], missing: &Value) -> Row {
    map.iter()
        .map(|pos| match pos {
            Some(p) => value_at(row, *p, missing),
            None => missing.clone(),
        })
        .collect()
}

pub struct Cat {
    sources: Vec<TableRef>,
    header: Option<Header>,
    missing: Value,
}

impl Cat {
    pub fn new(sources: Vec<TableRef>) -> Self {
        Self {
            sources,
            header: None,
            missing: Value::Null,
        }
    }

    /// Use `header` as the output header instead of the union.
    pub fn with_header(mut self, header: impl Into<Header>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }
}

impl Table for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn scan(&self) -> Result<Scan> {
        let scans = self
            .sources
            .iter()
            .map(|s| s.scan())
            .collect::<Result<Vec<_>>>()?;
        let out = match &self.header {
            Some(h) => h.clone(),
            None => union_header(&scans.iter().map(|s| s.header.clone()).collect::<Vec<_>>()),
        };
        let mut streams: Vec<RowStream> = Vec::with_capacity(scans.len());
        for scan in scans {
            let map = column_map(&out, &scan.header);
            let missing = self.missing.clone();
            streams.push(Box::new(
                scan.rows
                    .map(move |row| row.map(|r| remap_row(&r, &map, &missing))),
            ));
        }
        Ok(Scan::new(out, streams.into_iter().flatten()))
    }

    fn header(&self) -> Result<Header> {
        if let Some(h) = &self.header {
            return Ok(h.clone());
        }
        let headers = self
            .sources
            .iter()
            .map(|s| s.header())
            .collect::<Result<Vec<_>>>()?;
        Ok(union_header(&headers))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let mut b = Cachetag::builder("cat")
            .param(&self.header)
            .ok()?
            .param(&self.missing)
            .ok()?;
        for s in &self.sources {
            b = b.tag(&s.cachetag()?);
        }
        Some(b.finish())
    }
}
