//! Stable hashing helpers for cachetags.
//!
//! A cachetag fingerprints "what a table would currently produce". Sources
//! derive it from their identity, views from their parameters plus their
//! sources' tags. A table that cannot produce one is uncacheable.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Cachetag(pub [u8; 32]);

impl Cachetag {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// Start fingerprinting a view of kind `op`.
    pub fn builder(op: &str) -> TagBuilder {
        let mut h = Hasher::new();
        h.update(op.as_bytes());
        h.update(&[0]);
        TagBuilder { hasher: h }
    }
}

impl std::fmt::Display for Cachetag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental fingerprint of a view: its kind, parameters and source tags.
pub struct TagBuilder {
    hasher: Hasher,
}

impl TagBuilder {
    pub fn tag(mut self, tag: &Cachetag) -> Self {
        self.hasher.update(&tag.0);
        self
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Mix in any serde-serializable parameter (via JSON).
    pub fn param<T: Serialize>(self, v: &T) -> Result<Self, crate::error::Error> {
        let bytes = serde_json::to_vec(v)?;
        Ok(self.bytes(&bytes))
    }

    pub fn finish(self) -> Cachetag {
        Cachetag(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_is_sensitive_to_params_and_sources() {
        let src = Cachetag::builder("source").finish();
        let a = Cachetag::builder("sort").tag(&src).param(&true).unwrap().finish();
        let b = Cachetag::builder("sort").tag(&src).param(&false).unwrap().finish();
        let c = Cachetag::builder("sort").tag(&src).param(&true).unwrap().finish();
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_hex().len(), 64);
    }
}
