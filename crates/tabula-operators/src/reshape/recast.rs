//! Long to wide.
//!
//! Output columns are discovered from the first `sample_size` rows only.
//! A variable first appearing after the sample has no column; `UnseenPolicy`
//! decides whether its values are dropped or end the scan with an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tabula_core::config::EngineConfig;
use tabula_core::hash::Cachetag;
use tabula_core::id::TableId;
use tabula_core::key::{Key, KeySpec};
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::aggregate::ValuesFn;
use crate::group::{key_names, sorted_groups, GroupMap};
use crate::sort::SortOptions;
use crate::traits::{instance_tag, value_at, OpError, OpenedScan, Result, Scan, Table, TableRef};

use super::label;

/// What to do with a variable that was not among the sampled columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnseenPolicy {
    #[default]
    Drop,
    Error,
}

pub struct Recast {
    id: TableId,
    source: TableRef,
    key: Option<Vec<FieldRef>>,
    variablefield: FieldRef,
    valuefield: FieldRef,
    sample_size: usize,
    reducers: HashMap<String, ValuesFn>,
    unseen: UnseenPolicy,
    missing: Value,
    presorted: bool,
    sort: SortOptions,
}

impl Recast {
    pub fn new(source: TableRef) -> Self {
        Self {
            id: TableId::fresh(),
            source,
            key: None,
            variablefield: FieldRef::from("variable"),
            valuefield: FieldRef::from("value"),
            sample_size: EngineConfig::default().recast_sample_size,
            reducers: HashMap::new(),
            unseen: UnseenPolicy::default(),
            missing: Value::Null,
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    /// Take the sample size and sort settings from `cfg`.
    pub fn configure(mut self, cfg: &EngineConfig) -> Result<Self> {
        self.sample_size = cfg.recast_sample_size;
        self.sort = SortOptions::from_config(cfg)?;
        Ok(self)
    }

    /// Key fields; defaults to every field but the variable and value fields.
    pub fn key<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn variablefield(mut self, field: impl Into<FieldRef>) -> Self {
        self.variablefield = field.into();
        self
    }

    pub fn valuefield(mut self, field: impl Into<FieldRef>) -> Self {
        self.valuefield = field.into();
        self
    }

    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n;
        self
    }

    /// Reduce the values of `variable` when a group holds more than one;
    /// without a reducer they are collected into a list.
    pub fn reducer<F>(mut self, variable: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.reducers.insert(variable.into(), Arc::new(f));
        self
    }

    pub fn unseen(mut self, policy: UnseenPolicy) -> Self {
        self.unseen = policy;
        self
    }

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

    fn key_spec(&self, src: &Header) -> Result<KeySpec> {
        if let Some(fields) = &self.key {
            return Ok(KeySpec::Fields(fields.clone()));
        }
        let var = src.resolve(&self.variablefield)?;
        let val = src.resolve(&self.valuefield)?;
        let rest: Vec<FieldRef> = (0..src.len())
            .filter(|p| *p != var && *p != val)
            .map(FieldRef::Index)
            .collect();
        if rest.is_empty() {
            return Err(OpError::contract("recast needs at least one key field"));
        }
        Ok(KeySpec::Fields(rest))
    }

    /// Distinct variables in the first `sample_size` rows, in value order.
    /// The sampled rows are put back in front of the rest of the pass.
    fn sample(&self, scan: Scan) -> Result<(Vec<Value>, Scan)> {
        let var = scan.header.resolve(&self.variablefield)?;
        let mut rows = scan.rows;
        let mut head = Vec::new();
        for row in rows.by_ref().take(self.sample_size) {
            head.push(row?);
        }
        let seen: BTreeSet<Value> =
            head.iter().map(|r| value_at(r, var, &self.missing)).collect();
        let rest = head.into_iter().map(Ok).chain(rows);
        Ok((seen.into_iter().collect(), Scan::new(scan.header, rest)))
    }

    fn out_header(&self, src: &Header, variables: &[Value]) -> Result<Header> {
        let key = self.key_spec(src)?;
        let mut fields = key_names(src, &key.resolve(src)?);
        fields.extend(variables.iter().map(label));
        Ok(Header::from(fields))
    }
}

impl Table for Recast {
    fn name(&self) -> &'static str {
        "recast"
    }

    fn scan(&self) -> Result<Scan> {
        let (variables, scan) = self.sample(self.source.scan()?)?;
        let key = self.key_spec(&scan.header)?;
        let source = OpenedScan::table(scan);
        let (src, groups) = sorted_groups(&source, &key, self.presorted, &self.sort)?;
        let var = src.resolve(&self.variablefield)?;
        let val = src.resolve(&self.valuefield)?;
        let header = self.out_header(&src, &variables)?;
        tracing::debug!(columns = variables.len(), "recast: discovered variables");

        let column: BTreeMap<Value, usize> =
            variables.iter().cloned().enumerate().map(|(i, v)| (v, i)).collect();
        let reducers: Vec<Option<ValuesFn>> = variables
            .iter()
            .map(|v| self.reducers.get(&label(v)).cloned())
            .collect();
        let unseen = self.unseen;
        let missing = self.missing.clone();

        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            let mut cells: Vec<Vec<Value>> = vec![Vec::new(); column.len()];
            for row in &rows {
                let variable = value_at(row, var, &missing);
                match column.get(&variable) {
                    Some(&i) => cells[i].push(value_at(row, val, &missing)),
                    None if unseen == UnseenPolicy::Error => {
                        return Err(OpError::UnseenVariable(label(&variable)));
                    }
                    None => {}
                }
            }
            let mut out = key.into_values();
            for (values, reducer) in cells.into_iter().zip(&reducers) {
                out.push(match (values.len(), reducer) {
                    (0, _) => missing.clone(),
                    (1, _) => values.into_iter().next().unwrap_or_default(),
                    (_, Some(f)) => f(values.as_slice())?,
                    (_, None) => Value::List(values),
                });
            }
            Ok(vec![out])
        });
        Ok(Scan::new(header, rows))
    }

    /// Reads only the sample rows.
    fn header(&self) -> Result<Header> {
        let (variables, scan) = self.sample(self.source.scan()?)?;
        self.out_header(&scan.header, &variables)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        instance_tag("recast", self.id, &[&self.source])
    }
}
