#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel for a missing date inside an `i64` code buffer.
///
/// No representable timestamp encodes to this value, so the code space
/// stays unambiguous.
pub const MISSING_DATE: i64 = i64::MIN;

/// Sentinel for a missing category inside a `u32` code buffer.
pub const MISSING_CATEGORY: u32 = u32::MAX;

#[must_use]
pub fn is_missing_number(value: f64) -> bool {
    value.is_nan()
}

#[must_use]
pub fn is_missing_date(code: i64) -> bool {
    code == MISSING_DATE
}

#[must_use]
pub fn is_missing_category(code: u32) -> bool {
    code == MISSING_CATEGORY
}

/// Calendar bucket width of a date histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Year,
    Month,
    Day,
}

/// The value kind a column payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Number,
    Date,
    Category,
    Text,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("category label {label:?} is declared more than once")]
    DuplicateCategory { label: String },
}

// ── Date codec ─────────────────────────────────────────────────────────

/// Encode a timestamp as epoch milliseconds; `None` becomes [`MISSING_DATE`].
///
/// Sub-millisecond precision is dropped, so `decode_datetime` round-trips
/// at millisecond resolution.
#[must_use]
pub fn encode_datetime(value: Option<NaiveDateTime>) -> i64 {
    match value {
        Some(ts) => ts.and_utc().timestamp_millis(),
        None => MISSING_DATE,
    }
}

/// Decode an epoch-millisecond code back into a timestamp.
///
/// The missing sentinel and codes outside the representable range decode
/// to `None`.
#[must_use]
pub fn decode_datetime(code: i64) -> Option<NaiveDateTime> {
    if is_missing_date(code) {
        return None;
    }
    DateTime::from_timestamp_millis(code).map(|ts| ts.naive_utc())
}

// ── Category codec ─────────────────────────────────────────────────────

/// Reversible mapping between declared category labels and dense `u32`
/// codes, assigned `0..n` in declared order.
///
/// Unknown labels encode to [`MISSING_CATEGORY`]: the codec is strict, so
/// a coded buffer only ever contains declared codes or the sentinel.
/// Dirty-data tolerance lives in the label-level stats builder instead.
#[derive(Debug, Clone)]
pub struct CategoryCodec {
    labels: Vec<String>,
    positions: HashMap<String, u32>,
}

impl CategoryCodec {
    pub fn new<I, S>(labels: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(labels.len());
        for (code, label) in labels.iter().enumerate() {
            if positions.insert(label.clone(), code as u32).is_some() {
                return Err(CodecError::DuplicateCategory {
                    label: label.clone(),
                });
            }
        }
        Ok(Self { labels, positions })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn encode(&self, label: Option<&str>) -> u32 {
        label
            .and_then(|l| self.positions.get(l).copied())
            .unwrap_or(MISSING_CATEGORY)
    }

    /// Encode a whole column of labels into a dense code buffer.
    pub fn encode_all<'a, I>(&self, labels: I) -> Vec<u32>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        labels.into_iter().map(|l| self.encode(l)).collect()
    }

    #[must_use]
    pub fn decode(&self, code: u32) -> Option<&str> {
        if is_missing_category(code) {
            return None;
        }
        self.labels.get(code as usize).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{
        CategoryCodec, CodecError, MISSING_CATEGORY, MISSING_DATE, decode_datetime,
        encode_datetime, is_missing_date, is_missing_number,
    };

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .expect("valid date")
            .and_hms_opt(h, min, s)
            .expect("valid time")
    }

    #[test]
    fn missing_number_is_nan_only() {
        assert!(is_missing_number(f64::NAN));
        assert!(!is_missing_number(0.0));
        assert!(!is_missing_number(f64::INFINITY));
    }

    #[test]
    fn date_codec_round_trips_at_millisecond_precision() {
        let value = ts(2021, 6, 15, 12, 30, 45);
        let code = encode_datetime(Some(value));
        assert_eq!(decode_datetime(code), Some(value));
    }

    #[test]
    fn date_codec_handles_pre_epoch_timestamps() {
        let value = ts(1969, 12, 31, 23, 59, 59);
        let code = encode_datetime(Some(value));
        assert!(code < 0);
        assert_eq!(decode_datetime(code), Some(value));
    }

    #[test]
    fn missing_date_encodes_to_sentinel() {
        let code = encode_datetime(None);
        assert_eq!(code, MISSING_DATE);
        assert!(is_missing_date(code));
        assert_eq!(decode_datetime(code), None);
    }

    #[test]
    fn category_codec_assigns_codes_in_declared_order() {
        let codec = CategoryCodec::new(["low", "mid", "high"]).expect("codec");
        assert_eq!(codec.encode(Some("low")), 0);
        assert_eq!(codec.encode(Some("mid")), 1);
        assert_eq!(codec.encode(Some("high")), 2);
        assert_eq!(codec.decode(1), Some("mid"));
    }

    #[test]
    fn category_codec_unknown_label_encodes_missing() {
        let codec = CategoryCodec::new(["a", "b"]).expect("codec");
        assert_eq!(codec.encode(Some("zebra")), MISSING_CATEGORY);
        assert_eq!(codec.encode(None), MISSING_CATEGORY);
        assert_eq!(codec.decode(MISSING_CATEGORY), None);
        assert_eq!(codec.decode(7), None);
    }

    #[test]
    fn category_codec_rejects_duplicate_labels() {
        let err = CategoryCodec::new(["x", "y", "x"]).expect_err("must fail");
        assert_eq!(
            err,
            CodecError::DuplicateCategory {
                label: "x".to_owned()
            }
        );
    }

    #[test]
    fn encode_all_maps_a_full_column() {
        let codec = CategoryCodec::new(["x", "y"]).expect("codec");
        let codes = codec.encode_all([Some("y"), None, Some("x"), Some("?")]);
        assert_eq!(codes, vec![1, MISSING_CATEGORY, 0, MISSING_CATEGORY]);
    }
}
