//! Z-order keys: interleaved bits of rank-normalized column values.
//!
//! Each key column is mapped to its rank among the distinct values present,
//! scaled to a fixed number of bits, and the bits of all columns are
//! interleaved most significant first. Sorting by the resulting key keeps
//! rows with nearby values in every key column close together.

use std::cmp::Ordering;

use crate::rows::Value;

const KEY_BITS: u32 = 128;
const MAX_BITS_PER_COLUMN: u32 = 32;

/// Total order for ranking; floats use IEEE total ordering so that `-0.0`,
/// `0.0` and NaNs each get a stable rank.
fn rank_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Float64(x), Value::Float64(y)) => x.total_cmp(y),
        _ => a.sort_cmp(b),
    }
}

fn scaled_ranks(rows: &[Vec<Value>], column: usize, bits: u32) -> Vec<u128> {
    let mut distinct: Vec<&Value> = rows.iter().map(|r| &r[column]).collect();
    distinct.sort_by(|a, b| rank_cmp(a, b));
    distinct.dedup_by(|a, b| rank_cmp(a, b) == Ordering::Equal);

    let top = distinct.len().saturating_sub(1).max(1) as u128;
    let max_scaled = (1u128 << bits) - 1;

    rows.iter()
        .map(|r| {
            let rank = distinct
                .binary_search_by(|candidate| rank_cmp(candidate, &r[column]))
                .unwrap_or_else(|i| i) as u128;
            rank * max_scaled / top
        })
        .collect()
}

fn interleave(values: &[u128], bits: u32) -> u128 {
    let mut key = 0u128;
    for bit in (0..bits).rev() {
        for v in values {
            key = (key << 1) | ((v >> bit) & 1);
        }
    }
    key
}

/// Z-order key of every row over `columns` (indices into each row).
pub(crate) fn zorder_keys(rows: &[Vec<Value>], columns: &[usize]) -> Vec<u128> {
    if columns.is_empty() {
        return vec![0; rows.len()];
    }
    let bits = (KEY_BITS / columns.len() as u32).min(MAX_BITS_PER_COLUMN);
    let ranks: Vec<Vec<u128>> = columns
        .iter()
        .map(|c| scaled_ranks(rows, *c, bits))
        .collect();

    (0..rows.len())
        .map(|i| {
            let point: Vec<u128> = ranks.iter().map(|r| r[i]).collect();
            interleave(&point, bits)
        })
        .collect()
}

/// Sort rows by their Z-order key over `columns`. Ties keep input order.
pub(crate) fn zorder_sort(rows: Vec<Vec<Value>>, columns: &[usize]) -> Vec<Vec<Value>> {
    let keys = zorder_keys(&rows, columns);
    let mut keyed: Vec<(u128, Vec<Value>)> = keys.into_iter().zip(rows).collect();
    keyed.sort_by_key(|(k, _)| *k);
    keyed.into_iter().map(|(_, r)| r).collect()
}
