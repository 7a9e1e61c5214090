//! Key specs, their resolution against a header, and key extraction.
//!
//! A key spec is resolved once per scan into `KeyPositions`; extraction then
//! only indexes into rows. Keys compare element-wise through `Value`'s total
//! order, so compound and heterogeneous keys never fail to compare.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{FieldRef, Header};
use crate::types::{Row, Value};

/// Which part of a row forms the sort/group/join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeySpec {
    /// The whole row, compared lexically.
    #[default]
    Row,
    Field(FieldRef),
    /// Compound key, compared element-wise in the given order.
    Fields(Vec<FieldRef>),
}

impl KeySpec {
    pub fn field(f: impl Into<FieldRef>) -> Self {
        KeySpec::Field(f.into())
    }

    pub fn fields<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        KeySpec::Fields(fields.into_iter().map(Into::into).collect())
    }

    pub fn is_row(&self) -> bool {
        matches!(self, KeySpec::Row)
    }

    /// Field references named by this spec (empty for whole-row keys).
    pub fn field_refs(&self) -> Vec<FieldRef> {
        match self {
            KeySpec::Row => Vec::new(),
            KeySpec::Field(f) => vec![f.clone()],
            KeySpec::Fields(fs) => fs.clone(),
        }
    }

    pub fn resolve(&self, header: &Header) -> Result<KeyPositions> {
        match self {
            KeySpec::Row => Ok(KeyPositions::Row),
            KeySpec::Field(f) => Ok(KeyPositions::Fields(vec![header.resolve(f)?])),
            KeySpec::Fields(fs) => {
                if fs.is_empty() {
                    return Err(Error::Contract("compound key with no fields".into()));
                }
                Ok(KeyPositions::Fields(header.resolve_all(fs)?))
            }
        }
    }
}

impl From<&str> for KeySpec {
    fn from(s: &str) -> Self {
        KeySpec::field(s)
    }
}

impl From<String> for KeySpec {
    fn from(s: String) -> Self {
        KeySpec::field(s)
    }
}

impl From<usize> for KeySpec {
    fn from(i: usize) -> Self {
        KeySpec::field(i)
    }
}

impl From<FieldRef> for KeySpec {
    fn from(f: FieldRef) -> Self {
        KeySpec::Field(f)
    }
}

impl From<Vec<&str>> for KeySpec {
    fn from(v: Vec<&str>) -> Self {
        KeySpec::fields(v)
    }
}

impl<const N: usize> From<[&str; N]> for KeySpec {
    fn from(v: [&str; N]) -> Self {
        KeySpec::fields(v)
    }
}

impl From<Vec<FieldRef>> for KeySpec {
    fn from(v: Vec<FieldRef>) -> Self {
        KeySpec::Fields(v)
    }
}

/// A key spec resolved against a concrete header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPositions {
    Row,
    Fields(Vec<usize>),
}

impl KeyPositions {
    /// Extract the key of `row`. Indexing past a short row's end is the one
    /// place short rows are an error rather than padded.
    pub fn key_of(&self, row: &Row) -> Result<Key> {
        match self {
            KeyPositions::Row => Ok(Key(row.clone())),
            KeyPositions::Fields(positions) => {
                let mut values = Vec::with_capacity(positions.len());
                for &p in positions {
                    let v = row.get(p).ok_or(Error::ShortRow {
                        position: p,
                        len: row.len(),
                    })?;
                    values.push(v.clone());
                }
                Ok(Key(values))
            }
        }
    }

    pub fn positions(&self) -> Option<&[usize]> {
        match self {
            KeyPositions::Row => None,
            KeyPositions::Fields(p) => Some(p),
        }
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.positions().map(|p| p.contains(&pos)).unwrap_or(true)
    }
}

/// An extracted key: one value per key field, or the whole row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Key(pub Vec<Value>);

impl Key {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Collapse to a single value: the value itself for single-field keys,
    /// a list for compound keys.
    pub fn into_value(mut self) -> Value {
        if self.0.len() == 1 {
            self.0.pop().unwrap_or_default()
        } else {
            Value::List(self.0)
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::List(self.0.clone()))
    }
}
