#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use gs_types::{Granularity, decode_datetime, encode_datetime, is_missing_category, is_missing_date};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_KDE_SAMPLES: usize = 100;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Sturges' rule: `ceil(log2 n) + 1`, never below 1.
#[must_use]
pub fn default_bin_count(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    (n as f64).log2().ceil() as usize + 1
}

/// Quantile `p` of an ascending-sorted slice by linear interpolation between
/// adjacent order statistics. `p = 0` yields the minimum, `p = 1` the
/// maximum; an empty slice yields NaN.
#[must_use]
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let target = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = target.floor() as usize;
    let frac = target - lower as f64;
    if frac == 0.0 || lower + 1 >= sorted.len() {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[lower + 1] - sorted[lower]) * frac
    }
}

// ── Number stats ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub x0: f64,
    pub x1: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberStatistics {
    pub count: u64,
    pub missing: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub bins: Vec<HistogramBin>,
    pub max_bin_count: u64,
}

/// Streaming histogram accumulator over a fixed numeric domain.
///
/// The domain and bin count are fixed at construction; every finite value
/// lands in some bin thanks to catch-all rules at both ends, even when it
/// falls outside the nominal domain.
#[derive(Debug, Clone)]
pub struct NumberStatsBuilder {
    upper_edges: Vec<f64>,
    bins: Vec<HistogramBin>,
    count: u64,
    missing: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl NumberStatsBuilder {
    #[must_use]
    pub fn new(domain_min: f64, domain_max: f64, bin_count: usize) -> Self {
        let bin_count = bin_count.max(1);
        let width = (domain_max - domain_min) / bin_count as f64;
        let mut bins = Vec::with_capacity(bin_count);
        let mut upper_edges = Vec::with_capacity(bin_count);
        for i in 0..bin_count {
            let x0 = domain_min + width * i as f64;
            // The last edge is pinned so the final bin closes exactly on the
            // domain maximum instead of a float-accumulated approximation.
            let x1 = if i + 1 == bin_count {
                domain_max
            } else {
                domain_min + width * (i + 1) as f64
            };
            bins.push(HistogramBin { x0, x1, count: 0 });
            upper_edges.push(x1);
        }
        Self {
            upper_edges,
            bins,
            count: 0,
            missing: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if value.is_nan() {
            self.missing += 1;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        let slot = self.locate(value);
        self.bins[slot].count += 1;
    }

    pub fn push_many(&mut self, values: impl IntoIterator<Item = f64>) {
        for value in values {
            self.push(value);
        }
    }

    // O(log bin_count): two boundary fast paths, then binary search over
    // the bin upper edges.
    fn locate(&self, value: f64) -> usize {
        let last = self.bins.len() - 1;
        if value < self.upper_edges[0] {
            return 0;
        }
        if value >= self.bins[last].x0 {
            return last;
        }
        self.upper_edges.partition_point(|edge| *edge <= value)
    }

    #[must_use]
    pub fn build(self) -> NumberStatistics {
        let valid = self.count - self.missing;
        if valid == 0 {
            return NumberStatistics {
                count: self.count,
                missing: self.missing,
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                bins: self.bins,
                max_bin_count: 0,
            };
        }
        let max_bin_count = self.bins.iter().map(|b| b.count).max().unwrap_or(0);
        NumberStatistics {
            count: self.count,
            missing: self.missing,
            min: self.min,
            max: self.max,
            mean: self.sum / valid as f64,
            bins: self.bins,
            max_bin_count,
        }
    }
}

// ── Date stats ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateBin {
    pub x0: NaiveDateTime,
    pub x1: NaiveDateTime,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateStatistics {
    pub count: u64,
    pub missing: u64,
    pub min: Option<NaiveDateTime>,
    pub max: Option<NaiveDateTime>,
    pub bins: Vec<DateBin>,
    pub max_bin_count: u64,
    pub granularity: Granularity,
}

fn truncate_to(granularity: Granularity, ts: NaiveDateTime) -> NaiveDateTime {
    let date = ts.date();
    let truncated = match granularity {
        Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        Granularity::Day => Some(date),
    };
    truncated.unwrap_or(date).and_time(NaiveTime::MIN)
}

fn next_boundary(granularity: Granularity, ts: NaiveDateTime) -> Option<NaiveDateTime> {
    let date = ts.date();
    let next = match granularity {
        Granularity::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        Granularity::Month => {
            if date.month() == 12 {
                NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
            }
        }
        Granularity::Day => date.succ_opt(),
    };
    next.map(|d| d.and_time(NaiveTime::MIN))
}

/// Accumulator for calendar-bucketed date histograms.
///
/// Valid codes are buffered and binned at `build()`, because the bucket
/// layout depends on the observed range unless a template supplies it.
#[derive(Debug, Clone)]
pub struct DateStatsBuilder {
    template: Option<(Vec<DateBin>, Granularity)>,
    codes: Vec<i64>,
    count: u64,
    missing: u64,
    min_code: i64,
    max_code: i64,
}

impl Default for DateStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DateStatsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            template: None,
            codes: Vec::new(),
            count: 0,
            missing: 0,
            min_code: i64::MAX,
            max_code: i64::MIN,
        }
    }

    /// Reuse the bucket layout of a previous build over the same column,
    /// skipping granularity inference.
    ///
    /// Codes outside the template's overall range are absorbed by the
    /// boundary buckets rather than rejected, the same clamping the
    /// number builder applies at its domain edges.
    #[must_use]
    pub fn with_template(template: &DateStatistics) -> Self {
        let bins = template
            .bins
            .iter()
            .map(|b| DateBin {
                x0: b.x0,
                x1: b.x1,
                count: 0,
            })
            .collect();
        Self {
            template: Some((bins, template.granularity)),
            ..Self::new()
        }
    }

    pub fn push(&mut self, value: Option<NaiveDateTime>) {
        self.push_code(encode_datetime(value));
    }

    pub fn push_code(&mut self, code: i64) {
        self.count += 1;
        if is_missing_date(code) {
            self.missing += 1;
            return;
        }
        self.min_code = self.min_code.min(code);
        self.max_code = self.max_code.max(code);
        self.codes.push(code);
    }

    pub fn push_many(&mut self, values: impl IntoIterator<Item = Option<NaiveDateTime>>) {
        for value in values {
            self.push(value);
        }
    }

    pub fn push_codes(&mut self, codes: impl IntoIterator<Item = i64>) {
        for code in codes {
            self.push_code(code);
        }
    }

    fn infer_granularity(min: NaiveDateTime, max: NaiveDateTime, span_ms: i64) -> Granularity {
        if max.year() - min.year() >= 2 {
            Granularity::Year
        } else if span_ms <= 31 * MILLIS_PER_DAY {
            Granularity::Day
        } else {
            Granularity::Month
        }
    }

    fn layout(min: NaiveDateTime, max: NaiveDateTime, granularity: Granularity) -> Vec<DateBin> {
        let mut bins = Vec::new();
        let mut start = truncate_to(granularity, min);
        loop {
            let Some(end) = next_boundary(granularity, start) else {
                break;
            };
            bins.push(DateBin {
                x0: start,
                x1: end,
                count: 0,
            });
            if end > max {
                break;
            }
            start = end;
        }
        bins
    }

    #[must_use]
    pub fn build(self) -> DateStatistics {
        let valid = self.count - self.missing;
        let mut granularity = self
            .template
            .as_ref()
            .map_or(Granularity::Year, |(_, g)| *g);
        let mut bins = self.template.map(|(bins, _)| bins).unwrap_or_default();

        if valid == 0 {
            return DateStatistics {
                count: self.count,
                missing: self.missing,
                min: None,
                max: None,
                bins,
                max_bin_count: 0,
                granularity,
            };
        }

        let min = decode_datetime(self.min_code);
        let max = decode_datetime(self.max_code);
        if bins.is_empty() {
            if let (Some(lo), Some(hi)) = (min, max) {
                granularity = Self::infer_granularity(lo, hi, self.max_code - self.min_code);
                bins = Self::layout(lo, hi, granularity);
            }
        }

        if !bins.is_empty() {
            let upper_edges: Vec<i64> = bins.iter().map(|b| encode_datetime(Some(b.x1))).collect();
            let last = bins.len() - 1;
            let last_start = encode_datetime(Some(bins[last].x0));
            for code in self.codes {
                // Same two fast paths as the number builder; out-of-range
                // codes land in a boundary bucket.
                let slot = if code < upper_edges[0] {
                    0
                } else if code >= last_start {
                    last
                } else {
                    upper_edges.partition_point(|edge| *edge <= code)
                };
                bins[slot].count += 1;
            }
        }

        let max_bin_count = bins.iter().map(|b| b.count).max().unwrap_or(0);
        DateStatistics {
            count: self.count,
            missing: self.missing,
            min,
            max,
            bins,
            max_bin_count,
            granularity,
        }
    }
}

// ── Categorical stats ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBin {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoricalStatistics {
    pub count: u64,
    pub missing: u64,
    pub bins: Vec<CategoryBin>,
    pub max_bin_count: u64,
}

/// Frequency accumulator over a declared category set.
///
/// Bins are created up front so absent categories still report zero.
/// Undeclared labels are tolerated (dirty data) and appended after the
/// declared bins in first-seen order.
#[derive(Debug, Clone)]
pub struct CategoricalStatsBuilder {
    bins: Vec<CategoryBin>,
    positions: HashMap<String, usize>,
    declared: usize,
    count: u64,
    missing: u64,
}

impl CategoricalStatsBuilder {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bins: Vec<CategoryBin> = categories
            .into_iter()
            .map(|c| CategoryBin {
                category: c.into(),
                count: 0,
            })
            .collect();
        let positions = bins
            .iter()
            .enumerate()
            .map(|(i, b)| (b.category.clone(), i))
            .collect();
        let declared = bins.len();
        Self {
            bins,
            positions,
            declared,
            count: 0,
            missing: 0,
        }
    }

    pub fn push(&mut self, value: Option<&str>) {
        self.count += 1;
        let Some(label) = value else {
            self.missing += 1;
            return;
        };
        if let Some(&slot) = self.positions.get(label) {
            self.bins[slot].count += 1;
            return;
        }
        let slot = self.bins.len();
        self.bins.push(CategoryBin {
            category: label.to_owned(),
            count: 1,
        });
        self.positions.insert(label.to_owned(), slot);
    }

    /// Accept a dense code produced by `CategoryCodec` over the same
    /// declared set. Codes past the declared range are a caller contract
    /// violation; they count as missing in release builds.
    pub fn push_code(&mut self, code: u32) {
        self.count += 1;
        if is_missing_category(code) {
            self.missing += 1;
            return;
        }
        let slot = code as usize;
        if slot < self.declared {
            self.bins[slot].count += 1;
        } else {
            debug_assert!(false, "code {code} is not a declared category");
            self.missing += 1;
        }
    }

    pub fn push_many<'a>(&mut self, values: impl IntoIterator<Item = Option<&'a str>>) {
        for value in values {
            self.push(value);
        }
    }

    pub fn push_codes(&mut self, codes: impl IntoIterator<Item = u32>) {
        for code in codes {
            self.push_code(code);
        }
    }

    #[must_use]
    pub fn build(self) -> CategoricalStatistics {
        let max_bin_count = self.bins.iter().map(|b| b.count).max().unwrap_or(0);
        CategoricalStatistics {
            count: self.count,
            missing: self.missing,
            bins: self.bins,
            max_bin_count,
        }
    }
}

// ── String stats ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringStatistics {
    pub count: u64,
    pub missing: u64,
    pub top_n: Vec<FrequencyEntry>,
    pub unique_count: u64,
}

/// Open frequency accumulator for free-form text columns.
///
/// Either truncates to the `top_n` most frequent values at `build()`
/// (count descending, alphabetical tie-break) or, when seeded with a
/// fixed vocabulary, reports exactly that vocabulary in declared order.
#[derive(Debug, Clone)]
pub struct StringStatsBuilder {
    vocabulary: Option<Vec<String>>,
    frequencies: HashMap<String, u64>,
    top_n: usize,
    count: u64,
    missing: u64,
}

impl Default for StringStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StringStatsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_top_n(DEFAULT_TOP_N)
    }

    #[must_use]
    pub fn with_top_n(top_n: usize) -> Self {
        Self {
            vocabulary: None,
            frequencies: HashMap::new(),
            top_n,
            count: 0,
            missing: 0,
        }
    }

    /// Pin the output to a fixed vocabulary: entries appear in declared
    /// order, with zero counts for values never pushed. Values outside the
    /// vocabulary still count toward `unique_count`.
    pub fn with_vocabulary<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vocabulary: Some(vocabulary.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    pub fn push(&mut self, value: Option<&str>) {
        self.count += 1;
        match value {
            Some(v) => {
                *self.frequencies.entry(v.to_owned()).or_insert(0) += 1;
            }
            None => self.missing += 1,
        }
    }

    pub fn push_many<'a>(&mut self, values: impl IntoIterator<Item = Option<&'a str>>) {
        for value in values {
            self.push(value);
        }
    }

    #[must_use]
    pub fn build(self) -> StringStatistics {
        let unique_count = self.frequencies.len() as u64;
        let top_n = match self.vocabulary {
            Some(vocabulary) => vocabulary
                .into_iter()
                .map(|value| {
                    let count = self.frequencies.get(&value).copied().unwrap_or(0);
                    FrequencyEntry { value, count }
                })
                .collect(),
            None => {
                let mut entries: Vec<FrequencyEntry> = self
                    .frequencies
                    .into_iter()
                    .map(|(value, count)| FrequencyEntry { value, count })
                    .collect();
                entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
                entries.truncate(self.top_n);
                entries
            }
        };
        StringStatistics {
            count: self.count,
            missing: self.missing,
            top_n,
            unique_count,
        }
    }
}

// ── Boxplot ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdePoint {
    pub x: f64,
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxplotStatistics {
    pub count: u64,
    pub missing: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: Vec<f64>,
    pub kde_points: Vec<KdePoint>,
}

/// Accumulator for the five-number summary, 1.5×IQR whiskers/outliers and
/// a sampled density curve. Valid values are retained until `build()`
/// because quantiles need the full sorted sample.
#[derive(Debug, Clone)]
pub struct BoxplotBuilder {
    values: Vec<f64>,
    kde_samples: usize,
    count: u64,
    missing: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for BoxplotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxplotBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            kde_samples: DEFAULT_KDE_SAMPLES,
            count: 0,
            missing: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    /// Preallocate for a known column length.
    #[must_use]
    pub fn with_expected_count(expected: usize) -> Self {
        Self {
            values: Vec::with_capacity(expected),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn kde_samples(mut self, samples: usize) -> Self {
        self.kde_samples = samples;
        self
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if value.is_nan() {
            self.missing += 1;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.values.push(value);
    }

    pub fn push_many(&mut self, values: impl IntoIterator<Item = f64>) {
        for value in values {
            self.push(value);
        }
    }

    #[must_use]
    pub fn build(self) -> BoxplotStatistics {
        let mut values = self.values;
        let valid = values.len();
        if valid == 0 {
            return BoxplotStatistics {
                count: self.count,
                missing: self.missing,
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                median: f64::NAN,
                q1: f64::NAN,
                q3: f64::NAN,
                whisker_low: f64::NAN,
                whisker_high: f64::NAN,
                outliers: Vec::new(),
                kde_points: Vec::new(),
            };
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let median = quantile_sorted(&values, 0.5);
        let q1 = quantile_sorted(&values, 0.25);
        let q3 = quantile_sorted(&values, 0.75);
        let iqr = q3 - q1;
        let left_fence = q1 - 1.5 * iqr;
        let right_fence = q3 + 1.5 * iqr;

        // First value strictly past each fence becomes the whisker;
        // everything scanned before it is an outlier. A fence no value
        // passes degrades to the fence itself.
        let mut lo = 0;
        while lo < valid && values[lo] <= left_fence {
            lo += 1;
        }
        let whisker_low = if lo < valid { values[lo] } else { left_fence };

        let mut hi = valid;
        while hi > 0 && values[hi - 1] >= right_fence {
            hi -= 1;
        }
        let whisker_high = if hi > 0 { values[hi - 1] } else { right_fence };

        let mut outliers: Vec<f64> = values[..lo].to_vec();
        outliers.extend_from_slice(&values[hi.max(lo)..]);

        let kde = KdeEstimator::from_sample(&values, Some(iqr));
        let kde_points = kde.sample_curve(self.min, self.max, self.kde_samples);

        BoxplotStatistics {
            count: self.count,
            missing: self.missing,
            min: self.min,
            max: self.max,
            mean: self.sum / valid as f64,
            median,
            q1,
            q3,
            whisker_low,
            whisker_high,
            outliers,
            kde_points,
        }
    }
}

// ── Kernel density estimation ──────────────────────────────────────────

/// Gaussian kernel density estimator with normal-reference (Silverman)
/// bandwidth: `1.06 * spread * n^(-0.2)`, where the spread is the sample
/// standard deviation capped by `iqr / 1.34` when a positive IQR is known.
#[derive(Debug, Clone)]
pub struct KdeEstimator {
    values: Vec<f64>,
    bandwidth: f64,
}

impl KdeEstimator {
    #[must_use]
    pub fn from_sample(values: &[f64], iqr: Option<f64>) -> Self {
        let n = values.len();
        let std_dev = if n > 1 {
            let mean = values.iter().sum::<f64>() / n as f64;
            let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let spread = match iqr {
            Some(iqr) if iqr > 0.0 => std_dev.min(iqr / 1.34),
            _ => std_dev,
        };
        let mut bandwidth = 1.06 * spread * (n.max(1) as f64).powf(-0.2);
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            // Constant columns and single observations have no spread;
            // fall back so the curve stays well-formed.
            bandwidth = if std_dev.is_finite() && std_dev > 0.0 {
                std_dev
            } else {
                1.0
            };
        }
        Self {
            values: values.to_vec(),
            bandwidth,
        }
    }

    #[must_use]
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Mean Gaussian kernel over all values, divided by the bandwidth.
    #[must_use]
    pub fn density(&self, x: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let norm = 1.0 / (2.0 * std::f64::consts::PI).sqrt();
        let sum: f64 = self
            .values
            .iter()
            .map(|v| {
                let u = (x - v) / self.bandwidth;
                (-0.5 * u * u).exp() * norm
            })
            .sum();
        sum / (self.values.len() as f64 * self.bandwidth)
    }

    /// Evenly spaced samples over `[min, max]`, the final sample pinned
    /// exactly to `max` to avoid floating-point drift.
    #[must_use]
    pub fn sample_curve(&self, min: f64, max: f64, samples: usize) -> Vec<KdePoint> {
        if samples == 0 {
            return Vec::new();
        }
        if samples == 1 {
            return vec![KdePoint {
                x: max,
                density: self.density(max),
            }];
        }
        let step = (max - min) / (samples - 1) as f64;
        (0..samples)
            .map(|i| {
                let x = if i + 1 == samples {
                    max
                } else {
                    min + step * i as f64
                };
                KdePoint {
                    x,
                    density: self.density(x),
                }
            })
            .collect()
    }
}
