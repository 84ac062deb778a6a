//! Key similarity scoring for fuzzy matching.
//!
//! A key's score is the mean of its per-component scores. Two string
//! components score their normalized Levenshtein similarity; every other
//! combination scores 1.0 when equal and 0.0 otherwise. Keys reaching the
//! matcher are already case-folded when matching is case-insensitive.

use crate::model::{Key, Value};

/// Similarity of two components in [0, 1].
pub fn component_similarity(a: &Value, b: &Value) -> f64 {
    match (a, b) {
        (Value::String(x), Value::String(y)) => strsim::normalized_levenshtein(x, y),
        _ if a == b => 1.0,
        _ => 0.0,
    }
}

/// Mean component similarity of two keys in [0, 1]. Keys of unequal length score 0.
pub fn key_similarity(a: &Key, b: &Key) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let total: f64 = a
        .components()
        .iter()
        .zip(b.components())
        .map(|(x, y)| component_similarity(x, y))
        .sum();
    total / a.len() as f64
}
