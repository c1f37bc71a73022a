//! Inter-rater reliability validation
//!
//! Aggregates the labeled ground-truth set into macro and micro Cohen's
//! kappa, gates on macro kappa >= 0.70, and on contingency ranks the
//! high-disagreement queries and tests for systematic judge bias with a
//! paired signed-rank test.

mod golden;
pub mod kappa;
pub mod wilcoxon;

use serde_json::json;

use crate::memory::{ValidationRecord, ValidationStatus};
use crate::storage::{StorageError, Store};

pub use golden::{DRIFT_THRESHOLD, GoldenError, GoldenRunner, classify_query_type};
pub use kappa::{binarize, cohen_kappa, macro_kappa, mean_abs_diff};
pub use wilcoxon::{WilcoxonOutcome, signed_rank_test};

/// Macro-kappa acceptance gate.
pub const MACRO_KAPPA_GATE: f64 = 0.70;

/// Significance level for the bias test.
pub const BIAS_ALPHA: f64 = 0.05;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum IrrError {
    #[error("invalid state: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Agreement band for a single kappa value, used when labeling.
pub fn agreement_band(kappa: f64) -> &'static str {
    if kappa.is_nan() {
        "undefined"
    } else if kappa >= 0.8 {
        "excellent"
    } else if kappa >= 0.6 {
        "good"
    } else if kappa >= 0.4 {
        "moderate"
    } else {
        "poor"
    }
}

/// Runs the inter-rater reliability validation over the ground-truth set.
pub struct IrrValidator {
    store: Store,
}

impl IrrValidator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Aggregate, gate, triage, and persist one validation run.
    pub fn run(&self) -> Result<ValidationRecord, IrrError> {
        let labeled: Vec<_> = self
            .store
            .ground_truth_queries()?
            .into_iter()
            .filter(|q| {
                !q.judge1_scores.is_empty() && q.judge1_scores.len() == q.judge2_scores.len()
            })
            .collect();
        if labeled.is_empty() {
            return Err(IrrError::Invalid(
                "no ground-truth queries with paired judge scores".to_string(),
            ));
        }

        // Per-query kappas over binarized scores; NaN stays out of the macro.
        let per_query: Vec<f64> = labeled
            .iter()
            .map(|q| cohen_kappa(&binarize(&q.judge1_scores), &binarize(&q.judge2_scores)))
            .collect();
        let macro_k = macro_kappa(&per_query);

        // Micro: pool every document into two flat label sequences.
        let pooled1: Vec<f64> = labeled.iter().flat_map(|q| q.judge1_scores.clone()).collect();
        let pooled2: Vec<f64> = labeled.iter().flat_map(|q| q.judge2_scores.clone()).collect();
        let micro_k = cohen_kappa(&binarize(&pooled1), &binarize(&pooled2));

        let passed = macro_k.is_finite() && macro_k >= MACRO_KAPPA_GATE;
        if passed {
            let record = self.store.insert_validation(
                macro_k,
                micro_k,
                ValidationStatus::Passed,
                None,
                Some(&format!("{} labeled queries aggregated", labeled.len())),
            )?;
            return Ok(record);
        }

        // Contingency: ranked disagreement triage plus the bias test on the
        // pooled raw (pre-binarization) scores.
        let mut disagreements: Vec<serde_json::Value> = labeled
            .iter()
            .zip(per_query.iter())
            .map(|(q, k)| {
                json!({
                    "queryId": q.id,
                    "query": q.query,
                    "meanAbsDiff": mean_abs_diff(&q.judge1_scores, &q.judge2_scores),
                    "kappa": if k.is_finite() { json!(k) } else { json!(null) },
                })
            })
            .collect();
        disagreements.sort_by(|a, b| {
            let da = a["meanAbsDiff"].as_f64().unwrap_or(0.0);
            let db = b["meanAbsDiff"].as_f64().unwrap_or(0.0);
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
        });

        let bias = signed_rank_test(&pooled1, &pooled2);
        let bias_json = match &bias {
            Some(outcome) => json!({
                "statistic": outcome.statistic,
                "pValue": outcome.p_value,
                "medianDiff": outcome.median_diff,
                "nEffective": outcome.n_effective,
            }),
            None => json!(null),
        };
        let recommendation = bias.as_ref().and_then(|outcome| {
            (outcome.p_value < BIAS_ALPHA && outcome.median_diff != 0.0).then(|| {
                json!({
                    "action": "shift_binarization_threshold",
                    "judge": "judge1",
                    "recommendedThreshold": 0.5 + outcome.median_diff,
                })
            })
        });

        let contingency = json!({
            "highDisagreementQueries": disagreements,
            "biasTest": bias_json,
            "recommendation": recommendation,
        });

        let record = self.store.insert_validation(
            macro_k,
            micro_k,
            ValidationStatus::ContingencyTriggered,
            Some(&contingency),
            Some(&format!(
                "macro kappa {macro_k:.3} below gate {MACRO_KAPPA_GATE:.2}"
            )),
        )?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewGroundTruth;
    use tempfile::TempDir;

    fn validator_with_store() -> (IrrValidator, Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();
        (IrrValidator::new(store.clone()), store, dir)
    }

    fn seed(store: &Store, query: &str, j1: Vec<f64>, j2: Vec<f64>) {
        let kappa = cohen_kappa(&binarize(&j1), &binarize(&j2));
        store
            .insert_ground_truth(&NewGroundTruth {
                query: query.to_string(),
                query_type: "factual".to_string(),
                expected_doc_ids: vec![],
                judge1_scores: j1,
                judge2_scores: j2,
                kappa: Some(kappa),
                prompt_version: "v1".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_agreement_band() {
        assert_eq!(agreement_band(0.9), "excellent");
        assert_eq!(agreement_band(0.7), "good");
        assert_eq!(agreement_band(0.5), "moderate");
        assert_eq!(agreement_band(0.1), "poor");
        assert_eq!(agreement_band(f64::NAN), "undefined");
    }

    #[test]
    fn test_run_without_labels_fails() {
        let (validator, _store, _dir) = validator_with_store();
        assert!(matches!(validator.run(), Err(IrrError::Invalid(_))));
    }

    #[test]
    fn test_agreeing_judges_pass() {
        let (validator, store, _dir) = validator_with_store();
        for i in 0..5 {
            seed(
                &store,
                &format!("q{i}"),
                vec![0.9, 0.1, 0.8, 0.2],
                vec![0.8, 0.2, 0.9, 0.1],
            );
        }
        let record = validator.run().unwrap();
        assert_eq!(record.status, ValidationStatus::Passed);
        assert!((record.macro_kappa - 1.0).abs() < 1e-9);
        assert!((record.micro_kappa - 1.0).abs() < 1e-9);
        assert!(record.contingency.is_none());
    }

    #[test]
    fn test_disagreeing_judges_trigger_contingency() {
        let (validator, store, _dir) = validator_with_store();
        // judge1 consistently scores high where judge2 scores low.
        for i in 0..6 {
            seed(
                &store,
                &format!("q{i}"),
                vec![0.9, 0.8, 0.7, 0.2],
                vec![0.2, 0.3, 0.1, 0.1],
            );
        }
        let record = validator.run().unwrap();
        assert_eq!(record.status, ValidationStatus::ContingencyTriggered);

        let contingency = record.contingency.unwrap();
        let triage = contingency["highDisagreementQueries"].as_array().unwrap();
        assert_eq!(triage.len(), 6);
        // Sorted descending by mean |diff|.
        let first = triage[0]["meanAbsDiff"].as_f64().unwrap();
        let last = triage[triage.len() - 1]["meanAbsDiff"].as_f64().unwrap();
        assert!(first >= last);

        let bias = &contingency["biasTest"];
        assert!(bias["pValue"].as_f64().unwrap() < 0.05);
        assert!(bias["medianDiff"].as_f64().unwrap() > 0.0);
        let recommendation = &contingency["recommendation"];
        assert!(recommendation["recommendedThreshold"].as_f64().unwrap() > 0.5);
    }

    #[test]
    fn test_micro_pools_documents() {
        let (validator, store, _dir) = validator_with_store();
        // Each query alone is degenerate (single label per rater) so its
        // per-query kappa is NaN, but the pooled sequences are not.
        seed(&store, "a", vec![0.9, 0.9], vec![0.9, 0.9]);
        seed(&store, "b", vec![0.1, 0.1], vec![0.1, 0.1]);
        let record = validator.run().unwrap();
        assert!((record.micro_kappa - 1.0).abs() < 1e-9);
        // Macro has no defined per-query kappa, which cannot pass the gate.
        assert_eq!(record.status, ValidationStatus::ContingencyTriggered);
    }
}
