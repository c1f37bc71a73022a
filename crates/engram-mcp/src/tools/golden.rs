//! get_golden_test_results tool

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let _args: Args = super::parse_args(args)?;
    let run = services.golden.run().await?;
    Ok(json!({
        "date": run.date,
        "precision_at_5": run.precision_at_5,
        "baseline_precision": run.baseline_precision,
        "drift_detected": run.drift_detected,
        "by_query_type": run.by_query_type,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;
    use engram_core::NewGroundTruth;

    #[tokio::test]
    async fn test_without_ground_truth_fails() {
        let (services, _dir) = test_services();
        assert!(execute(&services, None).await.is_err());
    }

    #[tokio::test]
    async fn test_precision_against_expected_docs() {
        let (services, _dir) = test_services();
        let insight = services
            .tiers
            .compress("autonomy is an emergent property", &[1], None)
            .await
            .unwrap()
            .insight;
        services
            .store
            .insert_ground_truth(&NewGroundTruth {
                query: "What is autonomy?".to_string(),
                query_type: "factual".to_string(),
                expected_doc_ids: vec![insight.id],
                judge1_scores: vec![0.9],
                judge2_scores: vec![0.9],
                kappa: None,
                prompt_version: "dual-v1".to_string(),
            })
            .unwrap();

        let result = execute(&services, None).await.unwrap();
        // One expected doc retrieved in the top 5.
        assert!((result["precision_at_5"].as_f64().unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(result["drift_detected"], false);
        assert!(result["by_query_type"]["factual"].is_number());

        // A second identical run has a baseline and no drift.
        let second = execute(&services, None).await.unwrap();
        assert!(second["baseline_precision"].is_number());
        assert_eq!(second["drift_detected"], false);
    }
}
