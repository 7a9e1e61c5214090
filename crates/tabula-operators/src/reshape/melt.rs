//! Wide to long.

use std::collections::VecDeque;

use tabula_core::hash::Cachetag;
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::traits::{value_at, OpError, Result, RowStream, Scan, Table, TableRef};

use super::positions_or_rest;

/// Fans each row out into one row per variable field: the key fields, the
/// variable's name, then its value. When only one of `key` and `variables`
/// is given, the other is every remaining field.
pub struct Melt {
    source: TableRef,
    key: Option<Vec<FieldRef>>,
    variables: Option<Vec<FieldRef>>,
    variablefield: String,
    valuefield: String,
    missing: Value,
}

impl Melt {
    pub fn new(source: TableRef) -> Self {
        Self {
            source,
            key: None,
            variables: None,
            variablefield: "variable".to_string(),
            valuefield: "value".to_string(),
            missing: Value::Null,
        }
    }

    pub fn key<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn variables<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.variables = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn variablefield(mut self, name: impl Into<String>) -> Self {
        self.variablefield = name.into();
        self
    }

    pub fn valuefield(mut self, name: impl Into<String>) -> Self {
        self.valuefield = name.into();
        self
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    /// Key positions, variable positions, output header.
    fn layout(&self, src: &Header) -> Result<(Vec<usize>, Vec<usize>, Header)> {
        let (key, vars) = match (&self.key, &self.variables) {
            (None, None) => {
                return Err(OpError::contract("melt needs a key or a list of variables"));
            }
            (Some(k), v) => {
                let key = src.resolve_all(k)?;
                let vars = positions_or_rest(src, v.as_deref(), &key)?;
                (key, vars)
            }
            (None, Some(v)) => {
                let vars = src.resolve_all(v)?;
                let key = positions_or_rest(src, None, &vars)?;
                (key, vars)
            }
        };
        let mut fields: Vec<String> = key
            .iter()
            .map(|&p| src.name(p).unwrap_or_default().to_string())
            .collect();
        fields.push(self.variablefield.clone());
        fields.push(self.valuefield.clone());
        Ok((key, vars, Header::from(fields)))
    }
}

impl Table for Melt {
    fn name(&self) -> &'static str {
        "melt"
    }

    fn scan(&self) -> Result<Scan> {
        let scan = self.source.scan()?;
        let (key, vars, header) = self.layout(&scan.header)?;
        let vars = vars
            .into_iter()
            .map(|p| (Value::from(scan.header.name(p).unwrap_or_default()), p))
            .collect();
        Ok(Scan::new(
            header,
            MeltStream {
                rows: scan.rows,
                key,
                vars,
                missing: self.missing.clone(),
                pending: VecDeque::new(),
            },
        ))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.layout(&self.source.header()?)?.2)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        Cachetag::builder("melt")
            .tag(&self.source.cachetag()?)
            .param(&(
                &self.key,
                &self.variables,
                &self.variablefield,
                &self.valuefield,
                &self.missing,
            ))
            .ok()
            .map(|b| b.finish())
    }
}

struct MeltStream {
    rows: RowStream,
    key: Vec<usize>,
    vars: Vec<(Value, usize)>,
    missing: Value,
    pending: VecDeque<Row>,
}

impl Iterator for MeltStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let key: Row = self
                .key
                .iter()
                .map(|&p| value_at(&row, p, &self.missing))
                .collect();
            for (name, p) in &self.vars {
                let mut out = key.clone();
                out.push(name.clone());
                out.push(value_at(&row, *p, &self.missing));
                self.pending.push_back(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTable;
    use crate::traits::materialize;
    use std::sync::Arc;
    use tabula_core::row;

    fn wide() -> TableRef {
        Arc::new(MemTable::new(
            ["id", "gender", "age"],
            vec![row![1, "F", 12], row![2, "M", 17]],
        ))
    }

    #[test]
    fn melt_by_key() {
        let (hdr, rows) = materialize(&Melt::new(wide()).key(["id"])).unwrap();
        assert_eq!(hdr, Header::new(["id", "variable", "value"]));
        assert_eq!(
            rows,
            vec![
                row![1, "gender", "F"],
                row![1, "age", 12],
                row![2, "gender", "M"],
                row![2, "age", 17],
            ]
        );
    }

    #[test]
    fn melt_by_variables_with_custom_names() {
        let melt = Melt::new(wide())
            .variables(["age"])
            .variablefield("what")
            .valuefield("v");
        let (hdr, rows) = materialize(&melt).unwrap();
        assert_eq!(hdr, Header::new(["id", "gender", "what", "v"]));
        assert_eq!(rows, vec![row![1, "F", "age", 12], row![2, "M", "age", 17]]);
    }

    #[test]
    fn melt_needs_key_or_variables() {
        assert!(Melt::new(wide()).scan().is_err());
    }
}
