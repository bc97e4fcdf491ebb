//! MinMaxLTTB downsampling.
//!
//! Two phases: a min-max preselection partitions the interior into equal
//! index buckets and keeps each bucket's extrema, then Largest-Triangle-
//! Three-Buckets refines the candidates down to the output budget. The
//! combination preserves local extrema and overall shape at a fraction of
//! the cost of pure LTTB over the raw series.
//!
//! The functions return indices into the input so callers can apply them to
//! display arrays that differ from the numeric arrays used for selection.
//! NaN ys never win an extremum comparison, but an all-NaN bucket still
//! contributes its first index so gaps survive downsampling.

/// Preselection multiplier: the min-max phase keeps up to this many
/// candidates per output point.
pub const DEFAULT_MINMAX_RATIO: usize = 4;

/// Select at most `n_out` representative indices into `xs`/`ys`.
///
/// The first and last input indices are always kept, output indices are
/// strictly ascending, and equal-x duplicates collapse to their first
/// occurrence. Inputs short enough to fit the budget pass through intact.
pub fn downsample_indices(xs: &[f64], ys: &[f64], n_out: usize, minmax_ratio: usize) -> Vec<usize> {
    assert_eq!(xs.len(), ys.len(), "xs and ys must be the same length");
    let n = xs.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= n_out {
        return collapse_duplicates(xs, (0..n).collect());
    }
    if n_out <= 2 {
        return collapse_duplicates(xs, vec![0, n - 1]);
    }

    let candidates = minmax_preselect(ys, n_out, minmax_ratio.max(1));
    let refined = lttb_refine(xs, ys, &candidates, n_out);
    collapse_duplicates(xs, refined)
}

/// Convenience wrapper returning the selected values.
pub fn downsample(
    xs: &[f64],
    ys: &[f64],
    n_out: usize,
    minmax_ratio: usize,
) -> (Vec<f64>, Vec<f64>) {
    let indices = downsample_indices(xs, ys, n_out, minmax_ratio);
    (
        indices.iter().map(|&i| xs[i]).collect(),
        indices.iter().map(|&i| ys[i]).collect(),
    )
}

/// Phase one: keep each interior bucket's minimum and maximum index, plus
/// the endpoints. Produces at most `n_out * ratio + 2` sorted candidates.
fn minmax_preselect(ys: &[f64], n_out: usize, ratio: usize) -> Vec<usize> {
    let n = ys.len();
    let interior = n - 2;
    let target = n_out.saturating_mul(ratio);
    if interior <= target {
        return (0..n).collect();
    }

    let buckets = (target / 2).max(1);
    let mut picked = Vec::with_capacity(buckets * 2 + 2);
    picked.push(0);

    for b in 0..buckets {
        let start = 1 + b * interior / buckets;
        let end = 1 + (b + 1) * interior / buckets;
        if start >= end {
            continue;
        }
        let mut min_i: Option<usize> = None;
        let mut max_i: Option<usize> = None;
        for i in start..end {
            let y = ys[i];
            if y.is_nan() {
                continue;
            }
            if min_i.map_or(true, |j| y < ys[j]) {
                min_i = Some(i);
            }
            if max_i.map_or(true, |j| y > ys[j]) {
                max_i = Some(i);
            }
        }
        match (min_i, max_i) {
            (Some(min_i), Some(max_i)) => {
                picked.push(min_i.min(max_i));
                if min_i != max_i {
                    picked.push(min_i.max(max_i));
                }
            }
            // Entirely NaN: keep the gap visible.
            _ => picked.push(start),
        }
    }

    picked.push(n - 1);
    picked.sort_unstable();
    picked.dedup();
    picked
}

/// Phase two: classic LTTB over the preselected candidates. The triangle
/// area against the previously kept point and the next bucket's average
/// decides each bucket's survivor; NaN areas count as zero.
fn lttb_refine(xs: &[f64], ys: &[f64], candidates: &[usize], n_out: usize) -> Vec<usize> {
    let m = candidates.len();
    if m <= n_out {
        return candidates.to_vec();
    }

    let inner = n_out - 2;
    let mut out = Vec::with_capacity(n_out);
    out.push(candidates[0]);
    let mut anchor = candidates[0];

    for bucket in 0..inner {
        let start = 1 + bucket * (m - 2) / inner;
        let end = 1 + (bucket + 1) * (m - 2) / inner;

        let (next_start, next_end) = if bucket + 1 < inner {
            (1 + (bucket + 1) * (m - 2) / inner, 1 + (bucket + 2) * (m - 2) / inner)
        } else {
            (m - 1, m)
        };

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut count_y = 0usize;
        for p in next_start..next_end {
            let i = candidates[p];
            sum_x += xs[i];
            let y = ys[i];
            if !y.is_nan() {
                sum_y += y;
                count_y += 1;
            }
        }
        let span = (next_end - next_start).max(1) as f64;
        let avg_x = sum_x / span;
        let avg_y = if count_y > 0 {
            sum_y / count_y as f64
        } else {
            f64::NAN
        };

        let (ax, ay) = (xs[anchor], ys[anchor]);
        let mut best = start;
        let mut best_area = f64::NEG_INFINITY;
        for p in start..end {
            let i = candidates[p];
            let mut area =
                0.5 * ((ax - avg_x) * (ys[i] - ay) - (ax - xs[i]) * (avg_y - ay)).abs();
            if area.is_nan() {
                area = 0.0;
            }
            if area > best_area {
                best_area = area;
                best = p;
            }
        }
        out.push(candidates[best]);
        anchor = candidates[best];
    }

    out.push(candidates[m - 1]);
    out
}

/// Keep output xs strictly ascending: equal-x runs collapse to their first
/// selected occurrence.
fn collapse_duplicates(xs: &[f64], picked: Vec<usize>) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(picked.len());
    for i in picked {
        if let Some(&last) = out.last() {
            if xs[i] <= xs[last] {
                continue;
            }
        }
        out.push(i);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(n: usize) -> (Vec<f64>, Vec<f64>) {
        let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let ys: Vec<f64> = (0..n).map(|i| (i as f64 / 100.0).sin()).collect();
        (xs, ys)
    }

    #[test]
    fn short_input_passes_through() {
        let (xs, ys) = series(10);
        let idx = downsample_indices(&xs, &ys, 100, 4);
        assert_eq!(idx, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn budget_is_respected_and_endpoints_kept() {
        let (xs, ys) = series(100_000);
        let idx = downsample_indices(&xs, &ys, 4_000, 4);
        assert_eq!(idx.len(), 4_000);
        assert_eq!(idx[0], 0);
        assert_eq!(*idx.last().unwrap(), 99_999);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sine_peaks_survive() {
        // Peaks of sin(i/100) sit at i = pi/2 * 100 + k * 2pi * 100.
        let (xs, ys) = series(1_000_000);
        let idx = downsample_indices(&xs, &ys, 4_000, 4);

        // A refinement bucket spans about 250 raw indices; every peak must
        // be represented within roughly that distance, and peak amplitude
        // must survive the preselection.
        for peak in [157_079usize, 471_238] {
            let nearest = idx
                .iter()
                .map(|&i| (i as i64 - peak as i64).abs())
                .min()
                .unwrap();
            assert!(nearest <= 320, "peak {peak} missed by {nearest}");
        }
        let best = idx
            .iter()
            .map(|&i| ys[i])
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(best > 0.999, "peak amplitude lost: {best}");
    }

    #[test]
    fn tiny_budget_returns_endpoints() {
        let (xs, ys) = series(1_000);
        assert_eq!(downsample_indices(&xs, &ys, 2, 4), vec![0, 999]);
        assert_eq!(downsample_indices(&xs, &ys, 1, 4), vec![0, 999]);
        assert_eq!(downsample_indices(&xs, &ys, 0, 4), vec![0, 999]);
    }

    #[test]
    fn single_point_is_its_own_series() {
        let idx = downsample_indices(&[5.0], &[1.0], 4, 4);
        assert_eq!(idx, vec![0]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(downsample_indices(&[], &[], 4, 4).is_empty());
    }

    #[test]
    fn all_nan_buckets_preserve_gaps() {
        let n = 10_000;
        let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut ys: Vec<f64> = (0..n).map(|i| i as f64).collect();
        // A solid NaN stretch wide enough to own whole preselection buckets.
        for y in ys.iter_mut().take(6_000).skip(4_000) {
            *y = f64::NAN;
        }
        let (_, out_ys) = downsample(&xs, &ys, 100, 4);
        assert!(out_ys.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn nan_never_wins_an_extremum() {
        let xs: Vec<f64> = (0..1_000).map(|i| i as f64).collect();
        let ys: Vec<f64> = (0..1_000)
            .map(|i| if i % 7 == 0 { f64::NAN } else { i as f64 })
            .collect();
        let idx = downsample_indices(&xs, &ys, 50, 2);
        // Interior NaNs may only appear via all-NaN buckets, which cannot
        // happen here; the endpoints are kept unconditionally.
        for &i in &idx[1..idx.len() - 1] {
            assert!(!ys[i].is_nan());
        }
    }

    #[test]
    fn duplicate_x_collapses_to_first() {
        let xs = [0.0, 1.0, 1.0, 1.0, 2.0];
        let ys = [0.0, 1.0, 2.0, 3.0, 4.0];
        let idx = downsample_indices(&xs, &ys, 10, 4);
        assert_eq!(idx, vec![0, 1, 4]);
    }

    #[test]
    fn downsampling_is_idempotent_at_budget() {
        let (xs, ys) = series(50_000);
        let idx = downsample_indices(&xs, &ys, 1_000, 4);
        assert_eq!(idx.len(), 1_000);
        let xs2: Vec<f64> = idx.iter().map(|&i| xs[i]).collect();
        let ys2: Vec<f64> = idx.iter().map(|&i| ys[i]).collect();
        let idx2 = downsample_indices(&xs2, &ys2, 1_000, 4);
        assert_eq!(idx2, (0..1_000).collect::<Vec<_>>());
    }

    #[test]
    fn deterministic_for_identical_input() {
        let (xs, ys) = series(30_000);
        let a = downsample_indices(&xs, &ys, 500, 4);
        let b = downsample_indices(&xs, &ys, 500, 4);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn output_never_exceeds_budget(
            n in 1usize..5_000,
            n_out in 3usize..500,
            seed in any::<u64>(),
        ) {
            let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
            // Cheap deterministic pseudo-noise.
            let ys: Vec<f64> = (0..n)
                .map(|i| {
                    let h = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(seed);
                    ((h >> 33) as f64 / (1u64 << 31) as f64) - 1.0
                })
                .collect();
            let idx = downsample_indices(&xs, &ys, n_out, 4);
            prop_assert!(idx.len() <= n_out.max(n.min(n_out)));
            prop_assert!(idx.len() <= n);
            prop_assert_eq!(idx[0], 0);
            prop_assert_eq!(*idx.last().unwrap(), n - 1);
            prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn strictly_ascending_even_with_duplicate_x(
            n in 2usize..2_000,
            dup_every in 2usize..10,
        ) {
            let xs: Vec<f64> = (0..n).map(|i| (i / dup_every) as f64).collect();
            let ys: Vec<f64> = (0..n).map(|i| i as f64).collect();
            let idx = downsample_indices(&xs, &ys, 100, 4);
            prop_assert!(idx.windows(2).all(|w| xs[w[0]] < xs[w[1]]));
        }
    }
}
