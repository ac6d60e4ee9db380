#![forbid(unsafe_code)]

//! Conformance harness for the statistics and sorting engine.
//!
//! Holds naive oracle implementations written independently of the
//! production code paths (linear scans instead of binary search, full
//! materialization instead of streaming) plus a deterministic data
//! generator, so the property and end-to-end suites under `tests/` can
//! compare optimized results against an obviously-correct reference.

use std::cmp::Ordering;
use std::collections::HashMap;

use gs_sort::{SortComparator, SortKeys};

/// Deterministic pseudo-random generator (SplitMix64). Seeded streams
/// make every conformance failure reproducible from the seed alone.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut h = self.state;
        h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        h ^ (h >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1_u64 << 53) as f64
    }

    pub fn next_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u64() % bound as u64) as usize
    }

    /// A numeric column with roughly `missing_per_mille`/1000 NaN holes.
    pub fn numeric_column(&mut self, len: usize, missing_per_mille: usize) -> Vec<f64> {
        (0..len)
            .map(|_| {
                if self.next_below(1000) < missing_per_mille {
                    f64::NAN
                } else {
                    self.next_f64() * 200.0 - 100.0
                }
            })
            .collect()
    }
}

/// Quantile by the same interpolation rule as production, but computed
/// from scratch over an unsorted slice.
#[must_use]
pub fn oracle_quantile(values: &[f64], p: f64) -> f64 {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let target = (valid.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = target.floor() as usize;
    let upper = target.ceil() as usize;
    if lower == upper {
        valid[lower]
    } else {
        let frac = target - lower as f64;
        valid[lower] * (1.0 - frac) + valid[upper] * frac
    }
}

/// Histogram counts by a per-value linear scan over the bin edges,
/// with the same catch-all rules at both domain boundaries.
#[must_use]
pub fn oracle_histogram(values: &[f64], min: f64, max: f64, bin_count: usize) -> Vec<u64> {
    let bin_count = bin_count.max(1);
    let width = (max - min) / bin_count as f64;
    let mut counts = vec![0_u64; bin_count];
    for &value in values {
        if value.is_nan() {
            continue;
        }
        let mut slot = bin_count - 1;
        for i in 0..bin_count {
            let upper = if i + 1 == bin_count {
                max
            } else {
                min + width * (i + 1) as f64
            };
            if value < upper {
                slot = i;
                break;
            }
        }
        if value >= min + width * (bin_count - 1) as f64 {
            slot = bin_count - 1;
        }
        counts[slot] += 1;
    }
    counts
}

/// Top-N frequencies: count descending, alphabetical tie-break.
#[must_use]
pub fn oracle_top_n(values: &[Option<&str>], n: usize) -> Vec<(String, u64)> {
    let mut frequencies: HashMap<&str, u64> = HashMap::new();
    for value in values.iter().flatten() {
        *frequencies.entry(value).or_insert(0) += 1;
    }
    let mut entries: Vec<(String, u64)> = frequencies
        .into_iter()
        .map(|(value, count)| (value.to_owned(), count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Key for one row of one comparator, with missing keys (NaN, absent
/// text, indices past the key array) separated out so they can rank
/// after every present key in either direction.
fn oracle_key(lookup: &SortKeys, row: usize) -> Option<OracleKey<'_>> {
    match lookup {
        SortKeys::Number(keys) => keys
            .get(row)
            .filter(|value| !value.is_nan())
            .map(|value| OracleKey::Number(*value)),
        SortKeys::Text(keys) => keys
            .get(row)
            .and_then(|value| value.as_deref())
            .map(OracleKey::Text),
    }
}

enum OracleKey<'a> {
    Number(f64),
    Text(&'a str),
}

fn oracle_compare(comparator: &SortComparator, a: usize, b: usize) -> Ordering {
    match (oracle_key(&comparator.lookup, a), oracle_key(&comparator.lookup, b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            let ordering = match (left, right) {
                (OracleKey::Number(l), OracleKey::Number(r)) => {
                    l.partial_cmp(&r).unwrap_or(Ordering::Equal)
                }
                (OracleKey::Text(l), OracleKey::Text(r)) => l.cmp(r),
                _ => Ordering::Equal,
            };
            if comparator.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

/// Multi-key sort over plain `usize` indices: comparators in priority
/// order, first non-zero result wins, missing keys last per comparator,
/// original index as final tie-break.
#[must_use]
pub fn oracle_sort(indices: &[usize], comparators: &[SortComparator]) -> Vec<usize> {
    let mut out = indices.to_vec();
    if out.len() < 2 {
        return out;
    }
    out.sort_by(|&a, &b| {
        for comparator in comparators {
            let ordering = oracle_compare(comparator, a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.cmp(&b)
    });
    out
}

#[must_use]
pub fn oracle_mean(values: &[f64]) -> f64 {
    let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.iter().sum::<f64>() / valid.len() as f64
}
