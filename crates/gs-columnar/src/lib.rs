#![forbid(unsafe_code)]

use gs_types::ColumnKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColumnError {
    #[error("expected a {expected:?} payload but the column holds {actual:?}")]
    KindMismatch {
        expected: ColumnKind,
        actual: ColumnKind,
    },
}

/// Element width of an [`IndexBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexWidth {
    U8,
    U16,
    U32,
}

impl IndexWidth {
    /// Narrowest width able to represent `max_value`.
    #[must_use]
    pub fn for_max_value(max_value: usize) -> Self {
        if max_value <= u8::MAX as usize {
            Self::U8
        } else if max_value <= u16::MAX as usize {
            Self::U16
        } else {
            Self::U32
        }
    }
}

/// A contiguous unsigned-integer index array, sized to its value domain.
///
/// Used both as a row permutation (sort output) and as a selected row
/// subset (filtered stats input). The width is fixed at construction;
/// `push`/`get` operate in `usize` space regardless of width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "width", content = "values", rename_all = "snake_case")]
pub enum IndexBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// Empty buffer whose width can represent `max_value`, with room for
    /// `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize, max_value: usize) -> Self {
        match IndexWidth::for_max_value(max_value) {
            IndexWidth::U8 => Self::U8(Vec::with_capacity(capacity)),
            IndexWidth::U16 => Self::U16(Vec::with_capacity(capacity)),
            IndexWidth::U32 => Self::U32(Vec::with_capacity(capacity)),
        }
    }

    /// The identity permutation `0..len`, sized to `len - 1`.
    #[must_use]
    pub fn identity(len: usize) -> Self {
        let max_value = len.saturating_sub(1);
        match IndexWidth::for_max_value(max_value) {
            IndexWidth::U8 => Self::U8((0..len).map(|i| i as u8).collect()),
            IndexWidth::U16 => Self::U16((0..len).map(|i| i as u16).collect()),
            IndexWidth::U32 => Self::U32((0..len).map(|i| i as u32).collect()),
        }
    }

    #[must_use]
    pub fn from_indices(indices: &[usize]) -> Self {
        let max_value = indices.iter().copied().max().unwrap_or(0);
        let mut buffer = Self::with_capacity(indices.len(), max_value);
        for &idx in indices {
            buffer.push(idx);
        }
        buffer
    }

    /// Concatenate buffers into one of the first input's width, preserving
    /// relative order within each input and across inputs. An empty list
    /// yields an empty `U8` buffer; a single input is returned unchanged.
    #[must_use]
    pub fn concat(buffers: Vec<IndexBuffer>) -> Self {
        let mut buffers = buffers;
        if buffers.is_empty() {
            return Self::U8(Vec::new());
        }
        if buffers.len() == 1 {
            return buffers.remove(0);
        }

        let total: usize = buffers.iter().map(Self::len).sum();
        let mut out = buffers.remove(0);
        out.reserve(total - out.len());
        for buffer in buffers {
            for value in buffer.iter() {
                debug_assert!(
                    value <= out.max_representable(),
                    "concat input exceeds the first buffer's width"
                );
                out.push(value);
            }
        }
        out
    }

    #[must_use]
    pub fn width(&self) -> IndexWidth {
        match self {
            Self::U8(_) => IndexWidth::U8,
            Self::U16(_) => IndexWidth::U16,
            Self::U32(_) => IndexWidth::U32,
        }
    }

    #[must_use]
    pub fn max_representable(&self) -> usize {
        match self {
            Self::U8(_) => u8::MAX as usize,
            Self::U16(_) => u16::MAX as usize,
            Self::U32(_) => u32::MAX as usize,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<usize> {
        match self {
            Self::U8(v) => v.get(idx).map(|&x| x as usize),
            Self::U16(v) => v.get(idx).map(|&x| x as usize),
            Self::U32(v) => v.get(idx).map(|&x| x as usize),
        }
    }

    /// Append a value. Values above the buffer's width are truncated to it,
    /// so callers must size the buffer from the true maximum up front.
    pub fn push(&mut self, value: usize) {
        debug_assert!(
            value <= self.max_representable(),
            "index {value} does not fit the buffer width"
        );
        match self {
            Self::U8(v) => v.push(value as u8),
            Self::U16(v) => v.push(value as u16),
            Self::U32(v) => v.push(value as u32),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            Self::U8(v) => v.reserve(additional),
            Self::U16(v) => v.reserve(additional),
            Self::U32(v) => v.reserve(additional),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(|i| self.get(i).unwrap_or(0))
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Sort in place by a caller-supplied comparison over element values.
    ///
    /// The closure receives the two index values being ordered, in `usize`
    /// space. Hook point for the multi-key sorter.
    pub fn sort_by_value(&mut self, mut compare: impl FnMut(usize, usize) -> std::cmp::Ordering) {
        match self {
            Self::U8(v) => v.sort_by(|&a, &b| compare(a as usize, b as usize)),
            Self::U16(v) => v.sort_by(|&a, &b| compare(a as usize, b as usize)),
            Self::U32(v) => v.sort_by(|&a, &b| compare(a as usize, b as usize)),
        }
    }
}

/// A typed column payload as shipped to the worker.
///
/// Numbers use NaN as the missing marker; dates and categories carry the
/// sentinel codes from `gs-types`; text carries options directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    Number(Vec<f64>),
    Date(Vec<i64>),
    Category(Vec<u32>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Number(_) => ColumnKind::Number,
            Self::Date(_) => ColumnKind::Date,
            Self::Category(_) => ColumnKind::Category,
            Self::Text(_) => ColumnKind::Text,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Number(v) => v.len(),
            Self::Date(v) => v.len(),
            Self::Category(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numbers(&self) -> Result<&[f64], ColumnError> {
        match self {
            Self::Number(v) => Ok(v),
            other => Err(ColumnError::KindMismatch {
                expected: ColumnKind::Number,
                actual: other.kind(),
            }),
        }
    }

    pub fn as_dates(&self) -> Result<&[i64], ColumnError> {
        match self {
            Self::Date(v) => Ok(v),
            other => Err(ColumnError::KindMismatch {
                expected: ColumnKind::Date,
                actual: other.kind(),
            }),
        }
    }

    pub fn as_categories(&self) -> Result<&[u32], ColumnError> {
        match self {
            Self::Category(v) => Ok(v),
            other => Err(ColumnError::KindMismatch {
                expected: ColumnKind::Category,
                actual: other.kind(),
            }),
        }
    }

    pub fn as_text(&self) -> Result<&[Option<String>], ColumnError> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(ColumnError::KindMismatch {
                expected: ColumnKind::Text,
                actual: other.kind(),
            }),
        }
    }
}
