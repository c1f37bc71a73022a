//! store_dual_judge_scores tool
//!
//! Labels a query's candidate documents with two independent judge prompt
//! variants and records the pair as ground truth for agreement analysis.
//! Documents both raters place at or above 0.5 become the expected set used
//! by the golden retrieval check.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use engram_core::{JudgePrompt, NewGroundTruth, agreement_band, classify_query_type, validation};

use crate::error::ToolError;
use crate::state::Services;

const MAX_DOCS: usize = 50;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query_id": {
                "type": "integer",
                "description": "Caller-side identifier echoed back in the result"
            },
            "query": {
                "type": "string",
                "minLength": 1
            },
            "docs": {
                "type": "array",
                "minItems": 1,
                "maxItems": 50,
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "content": {"type": "string"}
                    },
                    "required": ["id", "content"]
                }
            }
        },
        "required": ["query", "docs"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocArg {
    id: i64,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    #[serde(default)]
    query_id: Option<i64>,
    query: String,
    docs: Vec<DocArg>,
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    if args.docs.is_empty() || args.docs.len() > MAX_DOCS {
        return Err(ToolError::validation(format!(
            "docs must contain 1..={MAX_DOCS} entries, got {}",
            args.docs.len()
        )));
    }

    let mut judge1_scores = Vec::with_capacity(args.docs.len());
    let mut judge2_scores = Vec::with_capacity(args.docs.len());
    for doc in &args.docs {
        let (primary, secondary) = tokio::join!(
            services
                .judge
                .score_document(&args.query, &doc.content, JudgePrompt::Primary),
            services
                .judge
                .score_document(&args.query, &doc.content, JudgePrompt::Secondary),
        );
        judge1_scores.push(primary?);
        judge2_scores.push(secondary?);
    }

    let kappa = validation::cohen_kappa(
        &validation::binarize(&judge1_scores),
        &validation::binarize(&judge2_scores),
    );
    let expected_doc_ids: Vec<i64> = args
        .docs
        .iter()
        .zip(judge1_scores.iter().zip(judge2_scores.iter()))
        .filter(|(_, (j1, j2))| **j1 >= 0.5 && **j2 >= 0.5)
        .map(|(doc, _)| doc.id)
        .collect();

    let row = services.store.insert_ground_truth(&NewGroundTruth {
        query: args.query.clone(),
        query_type: classify_query_type(&args.query).to_string(),
        expected_doc_ids,
        judge1_scores: judge1_scores.clone(),
        judge2_scores: judge2_scores.clone(),
        kappa: Some(kappa),
        prompt_version: "dual-v1".to_string(),
    })?;

    Ok(json!({
        "ground_truth_id": row.id,
        "query_id": args.query_id,
        "judge1_scores": judge1_scores,
        "judge2_scores": judge2_scores,
        "kappa": if kappa.is_finite() { json!(kappa) } else { json!(null) },
        "agreement_band": agreement_band(kappa),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;

    #[tokio::test]
    async fn test_scores_and_persists() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({
                "query_id": 42,
                "query": "what is autonomy",
                "docs": [
                    {"id": 1, "content": "autonomy is what is emergent autonomy"},
                    {"id": 2, "content": "cooking pasta requires salted water"}
                ]
            })),
        )
        .await
        .unwrap();

        assert_eq!(result["query_id"], 42);
        assert_eq!(result["judge1_scores"].as_array().unwrap().len(), 2);
        assert!(result["agreement_band"].is_string());

        let stored = services.store.ground_truth_queries().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].judge1_scores.len(), 2);
        assert_eq!(stored[0].prompt_version, "dual-v1");
    }

    #[tokio::test]
    async fn test_empty_docs_rejected() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({"query": "q", "docs": []})),
        )
        .await;
        assert!(result.is_err());
    }
}
