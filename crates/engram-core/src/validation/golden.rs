//! Golden retrieval regression
//!
//! Re-runs hybrid search over the labeled ground-truth queries and scores
//! precision@5 against the expected documents, overall and per query type.
//! The previous run is the drift baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::search::{HybridSearcher, SearchError, SearchWeights};
use crate::storage::{GoldenRun, StorageError, Store};

/// Absolute precision@5 change that counts as drift.
pub const DRIFT_THRESHOLD: f64 = 0.1;

const PRECISION_CUTOFF: usize = 5;

/// Golden run error
#[derive(Debug, thiserror::Error)]
pub enum GoldenError {
    #[error("invalid state: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Runs the golden retrieval check.
pub struct GoldenRunner {
    store: Store,
    hybrid: Arc<HybridSearcher>,
    weights: SearchWeights,
}

impl GoldenRunner {
    pub fn new(store: Store, hybrid: Arc<HybridSearcher>, weights: SearchWeights) -> Self {
        Self {
            store,
            hybrid,
            weights,
        }
    }

    /// Score every labeled query with expected documents, persist the run,
    /// and report drift against the previous run.
    pub async fn run(&self) -> Result<GoldenRun, GoldenError> {
        let labeled: Vec<_> = self
            .store
            .ground_truth_queries()?
            .into_iter()
            .filter(|q| !q.expected_doc_ids.is_empty())
            .collect();
        if labeled.is_empty() {
            return Err(GoldenError::Invalid(
                "no ground-truth queries with expected documents".to_string(),
            ));
        }

        let baseline = self.store.latest_golden_run()?.map(|run| run.precision_at_5);

        let mut per_type: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut precision_sum = 0.0;
        for query in &labeled {
            let results = self
                .hybrid
                .search(&query.query, None, PRECISION_CUTOFF, self.weights)
                .await?;
            let hits = results
                .iter()
                .filter(|r| query.expected_doc_ids.contains(&r.insight.id))
                .count();
            let precision = hits as f64 / PRECISION_CUTOFF as f64;
            precision_sum += precision;

            let entry = per_type.entry(query.query_type.clone()).or_insert((0.0, 0));
            entry.0 += precision;
            entry.1 += 1;
        }

        let precision_at_5 = precision_sum / labeled.len() as f64;
        let drift_detected = baseline
            .map(|base| (precision_at_5 - base).abs() > DRIFT_THRESHOLD)
            .unwrap_or(false);

        let by_query_type: serde_json::Value = per_type
            .into_iter()
            .map(|(kind, (sum, count))| (kind, serde_json::json!(sum / count as f64)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();

        Ok(self
            .store
            .insert_golden_run(precision_at_5, baseline, drift_detected, &by_query_type)?)
    }
}

/// Rough query-type classification used when labeling new ground truth.
pub fn classify_query_type(query: &str) -> &'static str {
    let lower = query.to_lowercase();
    if lower.starts_with("how ") || lower.contains("how do") || lower.contains("how to") {
        "procedural"
    } else if lower.starts_with("why ") {
        "causal"
    } else if lower.starts_with("what ") || lower.starts_with("who ") || lower.starts_with("when ")
    {
        "factual"
    } else {
        "conceptual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_query_type() {
        assert_eq!(classify_query_type("How do I revert a commit?"), "procedural");
        assert_eq!(classify_query_type("why is the build slow"), "causal");
        assert_eq!(classify_query_type("What is autonomy?"), "factual");
        assert_eq!(classify_query_type("autonomy in agent systems"), "conceptual");
    }
}
