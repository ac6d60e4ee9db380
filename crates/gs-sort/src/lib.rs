#![forbid(unsafe_code)]

use std::cmp::Ordering;

use gs_columnar::IndexBuffer;
use serde::{Deserialize, Serialize};

/// Parallel array of sort keys, indexed by row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum SortKeys {
    Number(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl SortKeys {
    /// A row with no usable key: NaN, missing text, or an index past the
    /// end of the key array.
    fn is_missing(&self, row: usize) -> bool {
        match self {
            Self::Number(keys) => keys.get(row).is_none_or(|value| value.is_nan()),
            Self::Text(keys) => !matches!(keys.get(row), Some(Some(_))),
        }
    }

    /// Order two rows by their key values. Rows without a usable key rank
    /// after every keyed row, in both directions; `ascending` only flips
    /// comparisons between keyed rows. Ranking missing keys consistently
    /// (rather than calling them ties) keeps the comparator a total order,
    /// which `sort_by` requires.
    #[must_use]
    pub fn compare(&self, left: usize, right: usize, ascending: bool) -> Ordering {
        match (self.is_missing(left), self.is_missing(right)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ordering = match self {
                    Self::Number(keys) => {
                        keys[left].partial_cmp(&keys[right]).unwrap_or(Ordering::Equal)
                    }
                    Self::Text(keys) => keys[left].cmp(&keys[right]),
                };
                if ascending { ordering } else { ordering.reverse() }
            }
        }
    }
}

/// One `(lookup, direction)` pair of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortComparator {
    pub lookup: SortKeys,
    pub ascending: bool,
}

impl SortComparator {
    #[must_use]
    pub fn ascending(lookup: SortKeys) -> Self {
        Self {
            lookup,
            ascending: true,
        }
    }

    #[must_use]
    pub fn descending(lookup: SortKeys) -> Self {
        Self {
            lookup,
            ascending: false,
        }
    }

    fn compare(&self, left: usize, right: usize) -> Ordering {
        self.lookup.compare(left, right, self.ascending)
    }
}

/// Sort an index buffer by up to N comparators in declared priority order,
/// first non-zero result winning. Every path falls back to comparing the
/// original index values when all keys tie, so the result is deterministic
/// regardless of the sort algorithm's stability. Buffers shorter than two
/// elements are returned unchanged.
///
/// The buffer is consumed, sorted in place and returned; ownership
/// round-trips without a copy.
#[must_use]
pub fn sort_complex(mut indices: IndexBuffer, comparators: &[SortComparator]) -> IndexBuffer {
    if indices.len() < 2 {
        return indices;
    }
    match comparators {
        [] => indices.sort_by_value(|a, b| a.cmp(&b)),
        // One- and two-key sorts are the common case; dedicated closures
        // avoid iterating a comparator list per element pair.
        [only] => indices.sort_by_value(|a, b| only.compare(a, b).then_with(|| a.cmp(&b))),
        [first, second] => indices.sort_by_value(|a, b| {
            first
                .compare(a, b)
                .then_with(|| second.compare(a, b))
                .then_with(|| a.cmp(&b))
        }),
        _ => indices.sort_by_value(|a, b| {
            for comparator in comparators {
                let ordering = comparator.compare(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.cmp(&b)
        }),
    }
    indices
}
