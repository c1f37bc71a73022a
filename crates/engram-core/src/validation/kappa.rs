//! Cohen's kappa
//!
//! Chance-corrected agreement between two raters over binary labels. Matches
//! the standard reference implementation to floating-point precision; the
//! degenerate case (a rater that used only one label) is NaN and excluded
//! from aggregation by callers.

/// Binarize raw scores at 0.5.
pub fn binarize(scores: &[f64]) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s >= 0.5)).collect()
}

/// Cohen's kappa for two aligned binary label sequences.
///
/// NaN when the sequences are empty, mismatched in length, or either rater
/// produced only one label.
pub fn cohen_kappa(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::NAN;
    }
    let n = a.len() as f64;

    let a_ones = a.iter().filter(|&&v| v == 1).count() as f64;
    let b_ones = b.iter().filter(|&&v| v == 1).count() as f64;
    if a_ones == 0.0 || a_ones == n || b_ones == 0.0 || b_ones == n {
        return f64::NAN;
    }

    let agreements = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count() as f64;
    let po = agreements / n;
    let pe = (a_ones * b_ones + (n - a_ones) * (n - b_ones)) / (n * n);

    (po - pe) / (1.0 - pe)
}

/// Arithmetic mean of the defined (finite) per-query kappas.
pub fn macro_kappa(per_query: &[f64]) -> f64 {
    let defined: Vec<f64> = per_query.iter().copied().filter(|k| k.is_finite()).collect();
    if defined.is_empty() {
        return f64::NAN;
    }
    defined.iter().sum::<f64>() / defined.len() as f64
}

/// Mean absolute difference between two aligned raw score arrays.
pub fn mean_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .sum::<f64>()
        / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binarize_at_half() {
        assert_eq!(binarize(&[0.0, 0.49, 0.5, 0.51, 1.0]), vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_kappa_reference_value() {
        // Hand-checked against sklearn.metrics.cohen_kappa_score:
        // po = 0.8, pe = 0.48, kappa = 0.32 / 0.52 = 8/13.
        let a = [1, 0, 1, 1, 0];
        let b = [1, 0, 0, 1, 0];
        let kappa = cohen_kappa(&a, &b);
        assert!((kappa - 8.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_kappa_perfect_agreement() {
        let a = [1, 0, 1, 0];
        assert!((cohen_kappa(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_perfect_disagreement() {
        let a = [1, 0, 1, 0];
        let b = [0, 1, 0, 1];
        assert!((cohen_kappa(&a, &b) - -1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_single_label_rater_is_nan() {
        assert!(cohen_kappa(&[1, 1, 1], &[1, 0, 1]).is_nan());
        assert!(cohen_kappa(&[1, 0, 1], &[0, 0, 0]).is_nan());
        assert!(cohen_kappa(&[1, 1], &[1, 1]).is_nan());
    }

    #[test]
    fn test_kappa_empty_or_mismatched_is_nan() {
        assert!(cohen_kappa(&[], &[]).is_nan());
        assert!(cohen_kappa(&[1, 0], &[1]).is_nan());
    }

    #[test]
    fn test_macro_kappa_skips_nan() {
        let macro_k = macro_kappa(&[0.6, f64::NAN, 0.8]);
        assert!((macro_k - 0.7).abs() < 1e-12);
        assert!(macro_kappa(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_mean_abs_diff() {
        let d = mean_abs_diff(&[1.0, 0.0, 0.5], &[0.5, 0.5, 0.5]);
        assert!((d - (0.5 + 0.5 + 0.0) / 3.0).abs() < 1e-12);
    }
}
