//! validate_judge_agreement tool

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
    let record = services.validator.run()?;
    Ok(json!({
        "id": record.id,
        "macro_kappa": if record.macro_kappa.is_finite() { json!(record.macro_kappa) } else { json!(null) },
        "micro_kappa": if record.micro_kappa.is_finite() { json!(record.micro_kappa) } else { json!(null) },
        "status": record.status.as_str(),
        "contingency": record.contingency,
        "notes": record.notes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;
    use engram_core::NewGroundTruth;

    #[tokio::test]
    async fn test_without_labels_is_validation_error() {
        let (services, _dir) = test_services();
        assert!(execute(&services, None).await.is_err());
    }

    #[tokio::test]
    async fn test_agreeing_labels_pass() {
        let (services, _dir) = test_services();
        for i in 0..3 {
            services
                .store
                .insert_ground_truth(&NewGroundTruth {
                    query: format!("q{i}"),
                    query_type: "factual".to_string(),
                    expected_doc_ids: vec![],
                    judge1_scores: vec![0.9, 0.1],
                    judge2_scores: vec![0.8, 0.2],
                    kappa: Some(1.0),
                    prompt_version: "dual-v1".to_string(),
                })
                .unwrap();
        }
        let result = execute(&services, None).await.unwrap();
        assert_eq!(result["status"], "passed");
        assert!(result["macro_kappa"].as_f64().unwrap() >= 0.7);
    }
}
