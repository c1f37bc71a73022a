//! Wilcoxon signed-rank test
//!
//! Paired two-sided test for a systematic location shift between two raters'
//! raw scores. Normal approximation with average ranks, tie-corrected
//! variance, and a continuity correction.

/// Test outcome.
#[derive(Debug, Clone)]
pub struct WilcoxonOutcome {
    /// min(W+, W-), the conventional reported statistic.
    pub statistic: f64,
    /// Two-sided p-value from the normal approximation.
    pub p_value: f64,
    /// Median of the pairwise differences (zeros included).
    pub median_diff: f64,
    /// Pairs with a non-zero difference.
    pub n_effective: usize,
}

/// Paired signed-rank test of `x` against `y`.
///
/// Returns `None` when the arrays mismatch or every pair is tied (no
/// evidence either way).
pub fn signed_rank_test(x: &[f64], y: &[f64]) -> Option<WilcoxonOutcome> {
    if x.is_empty() || x.len() != y.len() {
        return None;
    }

    let diffs: Vec<f64> = x.iter().zip(y.iter()).map(|(a, b)| a - b).collect();
    let median_diff = median(&diffs);

    let nonzero: Vec<f64> = diffs.iter().copied().filter(|d| *d != 0.0).collect();
    let n = nonzero.len();
    if n == 0 {
        return None;
    }

    // Rank |d| ascending with average ranks for ties.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        nonzero[i]
            .abs()
            .partial_cmp(&nonzero[j].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0_f64; n];
    let mut tie_correction = 0.0_f64;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && nonzero[order[j + 1]].abs() == nonzero[order[i]].abs() {
            j += 1;
        }
        let tied = (j - i + 1) as f64;
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = average_rank;
        }
        tie_correction += tied * tied * tied - tied;
        i = j + 1;
    }

    let w_plus: f64 = nonzero
        .iter()
        .zip(ranks.iter())
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| *r)
        .sum();
    let total = n as f64 * (n as f64 + 1.0) / 2.0;
    let w_minus = total - w_plus;
    let statistic = w_plus.min(w_minus);

    let mean = total / 2.0;
    let variance =
        n as f64 * (n as f64 + 1.0) * (2.0 * n as f64 + 1.0) / 24.0 - tie_correction / 48.0;
    if variance <= 0.0 {
        return None;
    }

    let deviation = w_plus - mean;
    let correction = 0.5 * deviation.signum();
    let z = (deviation - correction) / variance.sqrt();
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);

    Some(WilcoxonOutcome {
        statistic,
        p_value,
        median_diff,
        n_effective: n,
    })
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Standard normal CDF via the Abramowitz & Stegun erf approximation
/// (absolute error < 1.5e-7).
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}
