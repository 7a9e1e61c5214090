//! Headers and field references.
//!
//! A header is the first row of every table: an ordered list of field names.
//! Operators select fields either by name or by position.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Header {
    pub fields: Vec<String>,
}

impl Header {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Resolve one field reference to a position in this header.
    pub fn resolve(&self, field: &FieldRef) -> Result<usize> {
        match field {
            FieldRef::Name(name) => self
                .index_of(name)
                .ok_or_else(|| Error::FieldSelection(name.clone())),
            FieldRef::Index(idx) if *idx < self.len() => Ok(*idx),
            FieldRef::Index(idx) => Err(Error::FieldSelection(format!(
                "position {idx} (header has {} fields)",
                self.len()
            ))),
        }
    }

    pub fn resolve_all(&self, fields: &[FieldRef]) -> Result<Vec<usize>> {
        fields.iter().map(|f| self.resolve(f)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Header {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Header::new(iter)
    }
}

impl<const N: usize> From<[&str; N]> for Header {
    fn from(fields: [&str; N]) -> Self {
        Header::new(fields)
    }
}

impl From<Vec<&str>> for Header {
    fn from(fields: Vec<&str>) -> Self {
        Header::new(fields)
    }
}

impl From<Vec<String>> for Header {
    fn from(fields: Vec<String>) -> Self {
        Header { fields }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.fields.join(", "))
    }
}

/// A field identified by name or by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldRef {
    Name(String),
    Index(usize),
}

impl From<&str> for FieldRef {
    fn from(s: &str) -> Self {
        FieldRef::Name(s.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(s: String) -> Self {
        FieldRef::Name(s)
    }
}

impl From<usize> for FieldRef {
    fn from(i: usize) -> Self {
        FieldRef::Index(i)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Name(n) => write!(f, "{n}"),
            FieldRef::Index(i) => write!(f, "#{i}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_by_name_and_position() {
        let hdr = Header::new(["foo", "bar"]);
        assert_eq!(hdr.resolve(&"bar".into()).unwrap(), 1);
        assert_eq!(hdr.resolve(&FieldRef::Index(0)).unwrap(), 0);
    }

    #[test]
    fn missing_field_is_field_selection_error() {
        let hdr = Header::new(["foo"]);
        assert!(matches!(
            hdr.resolve(&"baz".into()),
            Err(Error::FieldSelection(name)) if name == "baz"
        ));
        assert!(matches!(
            hdr.resolve(&FieldRef::Index(3)),
            Err(Error::FieldSelection(_))
        ));
    }
}
