#![forbid(unsafe_code)]

//! Property suite for the statistics builders, KDE, index utilities and
//! the multi-key sorter. Optimized implementations are checked against
//! the naive oracles in `gs-conformance` and against the invariants every
//! summary must satisfy regardless of input.

use proptest::prelude::*;

use gs_columnar::{IndexBuffer, IndexWidth};
use gs_conformance::{oracle_histogram, oracle_mean, oracle_quantile, oracle_sort, oracle_top_n};
use gs_sort::{SortComparator, SortKeys, sort_complex};
use gs_stats::{
    BoxplotBuilder, CategoricalStatsBuilder, KdeEstimator, NumberStatsBuilder, StringStatsBuilder,
    quantile_sorted,
};

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// A column value: mostly finite, occasionally missing.
fn arb_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => -1e6_f64..1e6_f64,
        1 => Just(f64::NAN),
    ]
}

fn arb_column(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(arb_value(), 0..=max_len)
}

fn arb_labels(max_len: usize) -> impl Strategy<Value = Vec<Option<String>>> {
    proptest::collection::vec(
        prop_oneof![
            4 => "[a-f]{1,2}".prop_map(Some),
            1 => Just(None),
        ],
        0..=max_len,
    )
}

// Keys mix NaN holes with finite values, and a lookup may be shorter
// than the index range so some rows have no key at all.
fn arb_keys(max_len: usize) -> impl Strategy<Value = SortKeys> {
    proptest::collection::vec(
        prop_oneof![
            8 => -100.0_f64..100.0,
            1 => Just(f64::NAN),
        ],
        0..=max_len,
    )
    .prop_map(SortKeys::Number)
}

fn arb_comparators(max_len: usize, max_keys: usize) -> impl Strategy<Value = Vec<SortComparator>> {
    proptest::collection::vec(
        (arb_keys(max_len), any::<bool>()).prop_map(|(lookup, ascending)| SortComparator {
            lookup,
            ascending,
        }),
        0..=max_keys,
    )
}

fn valid_count(values: &[f64]) -> u64 {
    values.iter().filter(|v| !v.is_nan()).count() as u64
}

// ---------------------------------------------------------------------------
// Builder invariants
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// missing + valid == count, and bins account for every valid value.
    #[test]
    fn prop_number_stats_conserve_counts(values in arb_column(200)) {
        let mut builder = NumberStatsBuilder::new(-100.0, 100.0, 7);
        builder.push_many(values.iter().copied());
        let stats = builder.build();

        prop_assert_eq!(stats.count, values.len() as u64);
        prop_assert_eq!(stats.count - stats.missing, valid_count(&values));
        let binned: u64 = stats.bins.iter().map(|b| b.count).sum();
        prop_assert_eq!(binned, valid_count(&values));
    }

    /// Bins agree with the linear-scan oracle and partition the domain.
    #[test]
    fn prop_number_bins_match_oracle(values in arb_column(150)) {
        let mut builder = NumberStatsBuilder::new(-50.0, 50.0, 5);
        builder.push_many(values.iter().copied());
        let stats = builder.build();

        let expected = oracle_histogram(&values, -50.0, 50.0, 5);
        let actual: Vec<u64> = stats.bins.iter().map(|b| b.count).collect();
        prop_assert_eq!(actual, expected);

        for pair in stats.bins.windows(2) {
            prop_assert_eq!(pair[0].x1, pair[1].x0);
            prop_assert!(pair[0].x0 < pair[0].x1);
        }
    }

    /// The reported mean matches a from-scratch recomputation.
    #[test]
    fn prop_number_mean_matches_oracle(values in arb_column(100)) {
        let mut builder = NumberStatsBuilder::new(-1e6, 1e6, 3);
        builder.push_many(values.iter().copied());
        let stats = builder.build();
        let expected = oracle_mean(&values);
        if expected.is_nan() {
            prop_assert!(stats.mean.is_nan());
        } else {
            prop_assert!((stats.mean - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        }
    }

    /// Boxplot field ordering and the outlier fence rule.
    #[test]
    fn prop_boxplot_invariants(values in arb_column(200)) {
        let mut builder = BoxplotBuilder::new().kde_samples(16);
        builder.push_many(values.iter().copied());
        let stats = builder.build();

        prop_assert_eq!(stats.count - stats.missing, valid_count(&values));
        if valid_count(&values) == 0 {
            prop_assert!(stats.median.is_nan());
            prop_assert!(stats.outliers.is_empty());
            return Ok(());
        }

        prop_assert!(stats.whisker_low <= stats.q1);
        prop_assert!(stats.q1 <= stats.median);
        prop_assert!(stats.median <= stats.q3);
        prop_assert!(stats.q3 <= stats.whisker_high);
        if stats.q3 > stats.q1 {
            for outlier in &stats.outliers {
                prop_assert!(*outlier < stats.whisker_low || *outlier > stats.whisker_high);
            }
        }
        for point in &stats.kde_points {
            prop_assert!(point.density >= 0.0);
        }
    }

    /// Quartiles match the oracle quantile.
    #[test]
    fn prop_boxplot_quartiles_match_oracle(values in arb_column(120)) {
        prop_assume!(valid_count(&values) > 0);
        let mut builder = BoxplotBuilder::new().kde_samples(0);
        builder.push_many(values.iter().copied());
        let stats = builder.build();

        prop_assert!((stats.median - oracle_quantile(&values, 0.5)).abs() < 1e-9);
        prop_assert!((stats.q1 - oracle_quantile(&values, 0.25)).abs() < 1e-9);
        prop_assert!((stats.q3 - oracle_quantile(&values, 0.75)).abs() < 1e-9);
    }

    /// quantile_sorted endpoints are the extremes and p is monotone.
    #[test]
    fn prop_quantile_endpoints_and_monotonicity(
        values in proptest::collection::vec(-1e6_f64..1e6_f64, 1..80),
        p_low in 0.0_f64..1.0,
        p_high in 0.0_f64..1.0,
    ) {
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        prop_assert_eq!(quantile_sorted(&sorted, 0.0), sorted[0]);
        prop_assert_eq!(quantile_sorted(&sorted, 1.0), sorted[sorted.len() - 1]);

        let (lo, hi) = if p_low <= p_high { (p_low, p_high) } else { (p_high, p_low) };
        prop_assert!(quantile_sorted(&sorted, lo) <= quantile_sorted(&sorted, hi));
    }

    /// KDE curves never dip below zero and cover [min, max].
    #[test]
    fn prop_kde_curve_is_well_formed(
        values in proptest::collection::vec(-100.0_f64..100.0, 1..60),
        samples in 1_usize..40,
    ) {
        let kde = KdeEstimator::from_sample(&values, None);
        prop_assert!(kde.bandwidth() > 0.0);

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let curve = kde.sample_curve(min, max, samples);
        prop_assert_eq!(curve.len(), samples);
        prop_assert_eq!(curve[curve.len() - 1].x, max);
        for point in &curve {
            prop_assert!(point.density >= 0.0);
            prop_assert!(point.density.is_finite());
        }
    }

    /// String top-N equals the oracle ordering.
    #[test]
    fn prop_string_top_n_matches_oracle(labels in arb_labels(150), n in 1_usize..8) {
        let mut builder = StringStatsBuilder::with_top_n(n);
        builder.push_many(labels.iter().map(|l| l.as_deref()));
        let stats = builder.build();

        let borrowed: Vec<Option<&str>> = labels.iter().map(|l| l.as_deref()).collect();
        let expected = oracle_top_n(&borrowed, n);
        let actual: Vec<(String, u64)> = stats
            .top_n
            .iter()
            .map(|e| (e.value.clone(), e.count))
            .collect();
        prop_assert_eq!(actual, expected);

        let missing = labels.iter().filter(|l| l.is_none()).count() as u64;
        prop_assert_eq!(stats.missing, missing);
        prop_assert_eq!(stats.count, labels.len() as u64);
    }

    /// Categorical counts conserve and cover every pushed label.
    #[test]
    fn prop_categorical_counts_conserve(labels in arb_labels(120)) {
        let mut builder = CategoricalStatsBuilder::new(["aa", "bb"]);
        builder.push_many(labels.iter().map(|l| l.as_deref()));
        let stats = builder.build();

        prop_assert_eq!(stats.count, labels.len() as u64);
        let binned: u64 = stats.bins.iter().map(|b| b.count).sum();
        prop_assert_eq!(binned + stats.missing, stats.count);
        prop_assert_eq!(stats.bins[0].category.as_str(), "aa");
        prop_assert_eq!(stats.bins[1].category.as_str(), "bb");
    }
}

// ---------------------------------------------------------------------------
// Index utilities and sorter
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Buffer width always matches the narrowest that fits the maximum.
    #[test]
    fn prop_index_width_is_narrowest(indices in proptest::collection::vec(0_usize..100_000, 1..50)) {
        let buffer = IndexBuffer::from_indices(&indices);
        let max = indices.iter().copied().max().unwrap_or(0);
        let expected = if max <= 255 {
            IndexWidth::U8
        } else if max <= 65_535 {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        };
        prop_assert_eq!(buffer.width(), expected);
        prop_assert_eq!(buffer.to_vec(), indices);
    }

    /// Concat preserves content and ordering across segments.
    #[test]
    fn prop_concat_preserves_order(
        segments in proptest::collection::vec(
            proptest::collection::vec(0_usize..65_000, 0..20),
            0..6,
        ),
    ) {
        let buffers: Vec<IndexBuffer> = segments
            .iter()
            .map(|s| {
                // Width the first segment up so narrower followers fit.
                let mut buffer = IndexBuffer::with_capacity(s.len(), 65_000);
                for &idx in s {
                    buffer.push(idx);
                }
                buffer
            })
            .collect();
        let flat: Vec<usize> = segments.into_iter().flatten().collect();
        prop_assert_eq!(IndexBuffer::concat(buffers).to_vec(), flat);
    }

    /// sort_complex agrees with the naive oracle for any comparator stack.
    #[test]
    fn prop_sort_matches_oracle(
        len in 0_usize..60,
        seed_comparators in arb_comparators(60, 4),
    ) {
        let indices: Vec<usize> = (0..len).collect();
        let expected = oracle_sort(&indices, &seed_comparators);
        let sorted = sort_complex(IndexBuffer::from_indices(&indices), &seed_comparators);
        prop_assert_eq!(sorted.to_vec(), expected);
    }

    /// Sorting is a permutation and is deterministic across repeats.
    #[test]
    fn prop_sort_is_deterministic_permutation(
        len in 2_usize..50,
        comparators in arb_comparators(50, 3),
    ) {
        let indices: Vec<usize> = (0..len).collect();
        let once = sort_complex(IndexBuffer::from_indices(&indices), &comparators).to_vec();
        let twice = sort_complex(IndexBuffer::from_indices(&indices), &comparators).to_vec();
        prop_assert_eq!(&once, &twice);

        let mut sorted_back = once.clone();
        sorted_back.sort_unstable();
        prop_assert_eq!(sorted_back, indices);
    }
}
