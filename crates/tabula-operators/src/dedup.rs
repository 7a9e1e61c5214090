//! Deduplication over key runs.
//!
//! Every operator here sorts its input by the key (whole row when no key is
//! given) unless declared presorted, then looks at one key run at a time.

use std::collections::BTreeSet;
use std::sync::Arc;

use tabula_core::hash::Cachetag;
use tabula_core::key::{Key, KeySpec};
use tabula_core::schema::{FieldRef, Header};
use tabula_core::types::{Row, Value};

use crate::cat::Cat;
use crate::group::{key_names, sorted_groups, GroupMap};
use crate::sort::SortOptions;
use crate::traits::{value_at, OpError, Result, Scan, Table, TableRef};

/// Source, key and sort settings shared by the dedup views.
#[derive(Clone)]
struct KeyRuns {
    source: TableRef,
    key: KeySpec,
    presorted: bool,
    sort: SortOptions,
}

impl KeyRuns {
    fn new(source: TableRef, key: KeySpec) -> Self {
        Self {
            source,
            key,
            presorted: false,
            sort: SortOptions::default(),
        }
    }

    fn tag<P: serde::Serialize>(&self, op: &str, params: &P) -> Option<Cachetag> {
        Cachetag::builder(op)
            .tag(&self.source.cachetag()?)
            .param(&(&self.key, self.presorted, params))
            .ok()
            .map(|b| b.finish())
    }
}

macro_rules! key_run_builders {
    ($name:ident) => {
        impl $name {
            /// Input is already sorted by the key.
            pub fn presorted(mut self, presorted: bool) -> Self {
                self.runs.presorted = presorted;
                self
            }

            pub fn sort_options(mut self, opts: SortOptions) -> Self {
                self.runs.sort = opts;
                self
            }
        }
    };
}

/// First row of each key run; without a key, removes repeated whole rows.
/// With `count`, appends a field holding the run length.
pub struct Distinct {
    runs: KeyRuns,
    count: Option<String>,
}

impl Distinct {
    pub fn new(source: TableRef) -> Self {
        Self {
            runs: KeyRuns::new(source, KeySpec::Row),
            count: None,
        }
    }

    pub fn key(mut self, key: impl Into<KeySpec>) -> Self {
        self.runs.key = key.into();
        self
    }

    pub fn count(mut self, field: impl Into<String>) -> Self {
        self.count = Some(field.into());
        self
    }

    fn out_header(&self, src: Header) -> Header {
        match &self.count {
            Some(c) => {
                let mut fields = src.fields;
                fields.push(c.clone());
                Header::from(fields)
            }
            None => src,
        }
    }
}

key_run_builders!(Distinct);

impl Table for Distinct {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn scan(&self) -> Result<Scan> {
        let r = &self.runs;
        let (src, groups) = sorted_groups(&r.source, &r.key, r.presorted, &r.sort)?;
        let counted = self.count.is_some();
        let rows = GroupMap::new(groups, move |_: Key, rows: Vec<Row>| {
            let n = rows.len();
            let mut first: Vec<Row> = rows.into_iter().take(1).collect();
            if counted {
                if let Some(row) = first.first_mut() {
                    row.push(Value::from(n));
                }
            }
            Ok(first)
        });
        Ok(Scan::new(self.out_header(src), rows))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.out_header(self.runs.source.header()?))
    }

    fn cachetag(&self) -> Option<Cachetag> {
        self.runs.tag("distinct", &self.count)
    }
}

/// Whether a key run survives `Unique` or `Duplicates`.
#[derive(Debug, Clone, Copy)]
enum RunFilter {
    Singletons,
    Repeated,
}

impl RunFilter {
    fn keeps(self, len: usize) -> bool {
        match self {
            RunFilter::Singletons => len == 1,
            RunFilter::Repeated => len > 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            RunFilter::Singletons => "unique",
            RunFilter::Repeated => "duplicates",
        }
    }
}

fn filter_runs(runs: &KeyRuns, filter: RunFilter) -> Result<Scan> {
    let (src, groups) = sorted_groups(&runs.source, &runs.key, runs.presorted, &runs.sort)?;
    let rows = GroupMap::new(groups, move |_: Key, rows: Vec<Row>| {
        Ok(if filter.keeps(rows.len()) { rows } else { Vec::new() })
    });
    Ok(Scan::new(src, rows))
}

macro_rules! run_filter_view {
    ($(#[$doc:meta])* $name:ident, $filter:expr) => {
        $(#[$doc])*
        pub struct $name {
            runs: KeyRuns,
        }

        impl $name {
            pub fn new(source: TableRef, key: impl Into<KeySpec>) -> Self {
                Self {
                    runs: KeyRuns::new(source, key.into()),
                }
            }
        }

        key_run_builders!($name);

        impl Table for $name {
            fn name(&self) -> &'static str {
                $filter.name()
            }

            fn scan(&self) -> Result<Scan> {
                filter_runs(&self.runs, $filter)
            }

            fn header(&self) -> Result<Header> {
                self.runs.source.header()
            }

            fn cachetag(&self) -> Option<Cachetag> {
                self.runs.tag($filter.name(), &())
            }
        }
    };
}

run_filter_view!(
    /// Rows whose key occurs exactly once.
    Unique,
    RunFilter::Singletons
);
run_filter_view!(
    /// Every row whose key occurs more than once.
    Duplicates,
    RunFilter::Repeated
);

/// Non-missing values of `pos` across a run.
fn present_values(rows: &[Row], pos: usize, missing: &Value) -> BTreeSet<Value> {
    rows.iter()
        .map(|r| value_at(r, pos, missing))
        .filter(|v| v != missing)
        .collect()
}

/// Rows of every key run that disagrees on a non-missing value in some
/// checked field. Key fields are never checked; `include` narrows the checked
/// fields, `exclude` removes from them.
pub struct Conflicts {
    runs: KeyRuns,
    missing: Value,
    include: Option<Vec<FieldRef>>,
    exclude: Vec<FieldRef>,
}

impl Conflicts {
    pub fn new(source: TableRef, key: impl Into<KeySpec>) -> Self {
        Self {
            runs: KeyRuns::new(source, key.into()),
            missing: Value::Null,
            include: None,
            exclude: Vec::new(),
        }
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    pub fn include<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    fn checked(&self, header: &Header) -> Result<Vec<usize>> {
        let key = self.runs.key.resolve(header)?;
        let candidates = match &self.include {
            Some(fields) => header.resolve_all(fields)?,
            None => (0..header.len()).collect(),
        };
        let excluded = header.resolve_all(&self.exclude)?;
        Ok(candidates
            .into_iter()
            .filter(|p| !key.contains(*p) && !excluded.contains(p))
            .collect())
    }
}

key_run_builders!(Conflicts);

impl Table for Conflicts {
    fn name(&self) -> &'static str {
        "conflicts"
    }

    fn scan(&self) -> Result<Scan> {
        if self.runs.key.is_row() {
            return Err(OpError::contract("conflicts key must name fields"));
        }
        let r = &self.runs;
        let (src, groups) = sorted_groups(&r.source, &r.key, r.presorted, &r.sort)?;
        let checked = self.checked(&src)?;
        let missing = self.missing.clone();
        let rows = GroupMap::new(groups, move |_: Key, rows: Vec<Row>| {
            let conflicted = rows.len() > 1
                && checked
                    .iter()
                    .any(|&p| present_values(&rows, p, &missing).len() > 1);
            Ok(if conflicted { rows } else { Vec::new() })
        });
        Ok(Scan::new(src, rows))
    }

    fn header(&self) -> Result<Header> {
        self.runs.source.header()
    }

    fn cachetag(&self) -> Option<Cachetag> {
        self.runs
            .tag("conflicts", &(&self.missing, &self.include, &self.exclude))
    }
}

/// Collapses each key run into one row: key fields first, then every other
/// field in source order. A field keeps its single agreed value, becomes
/// `missing` when no row has one, and a `Value::Conflict` otherwise.
pub struct MergeDuplicates {
    runs: KeyRuns,
    missing: Value,
}

impl MergeDuplicates {
    pub fn new(source: TableRef, key: impl Into<KeySpec>) -> Self {
        Self {
            runs: KeyRuns::new(source, key.into()),
            missing: Value::Null,
        }
    }

    pub fn missing(mut self, missing: impl Into<Value>) -> Self {
        self.missing = missing.into();
        self
    }

    /// Key positions, then the remaining positions in source order.
    fn layout(&self, src: &Header) -> Result<(Header, Vec<usize>)> {
        if self.runs.key.is_row() {
            return Err(OpError::contract("merge duplicates key must name fields"));
        }
        let key = self.runs.key.resolve(src)?;
        let rest: Vec<usize> = (0..src.len()).filter(|p| !key.contains(*p)).collect();
        let mut fields = key_names(src, &key);
        fields.extend(rest.iter().map(|&p| src.name(p).unwrap_or_default().to_string()));
        Ok((Header::from(fields), rest))
    }
}

key_run_builders!(MergeDuplicates);

impl Table for MergeDuplicates {
    fn name(&self) -> &'static str {
        "mergeduplicates"
    }

    fn scan(&self) -> Result<Scan> {
        let r = &self.runs;
        let (src, groups) = sorted_groups(&r.source, &r.key, r.presorted, &r.sort)?;
        let (header, rest) = self.layout(&src)?;
        let missing = self.missing.clone();
        let rows = GroupMap::new(groups, move |key: Key, rows: Vec<Row>| {
            let mut out = key.into_values();
            for &p in &rest {
                let mut values = present_values(&rows, p, &missing);
                out.push(match values.len() {
                    0 => missing.clone(),
                    1 => values.pop_first().unwrap_or_default(),
                    _ => Value::Conflict(values),
                });
            }
            Ok(vec![out])
        });
        Ok(Scan::new(header, rows))
    }

    fn header(&self) -> Result<Header> {
        Ok(self.layout(&self.runs.source.header()?)?.0)
    }

    fn cachetag(&self) -> Option<Cachetag> {
        self.runs.tag("mergeduplicates", &self.missing)
    }
}

/// Concatenate `tables` and merge duplicates on `key`.
pub fn merge(tables: Vec<TableRef>, key: impl Into<KeySpec>) -> MergeDuplicates {
    MergeDuplicates::new(Arc::new(Cat::new(tables)), key)
}
