//! Deterministic row generators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tabula::prelude::*;

/// Small linear congruential generator; good enough to shuffle test data
/// reproducibly without pulling in a randomness crate.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> i64 {
        (self.next_u64() % n) as i64
    }
}

/// `rows` rows of `(key, seq, label)` with keys drawn from `0..keys`. `seq`
/// is the row's input position, so stability can be checked after sorting.
pub fn keyed_rows(rows: usize, keys: u64, seed: u64) -> Vec<Row> {
    let mut rng = Lcg::new(seed);
    (0..rows)
        .map(|i| {
            let k = rng.below(keys);
            row![k, i, format!("v{}", k % 3)]
        })
        .collect()
}

pub fn keyed_table(rows: usize, keys: u64, seed: u64) -> TableRef {
    Arc::new(MemTable::new(["key", "seq", "label"], keyed_rows(rows, keys, seed)))
}

/// Whole rows with their multiplicities.
pub fn multiset(rows: &[Row]) -> std::collections::BTreeMap<Row, usize> {
    let mut out = std::collections::BTreeMap::new();
    for r in rows {
        *out.entry(r.clone()).or_insert(0) += 1;
    }
    out
}
