//! compress_to_l2_insight tool

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Compressed insight text distilled from the source turns"
            },
            "source_ids": {
                "type": "array",
                "items": {"type": "integer"},
                "minItems": 1,
                "description": "IDs of the raw turns this insight came from"
            },
            "metadata": {
                "type": "object",
                "description": "Optional metadata; a numeric 'fidelity_score' is checked against the configured floor"
            }
        },
        "required": ["content", "source_ids"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    content: String,
    source_ids: Vec<i64>,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    let outcome = services
        .tiers
        .compress(&args.content, &args.source_ids, args.metadata)
        .await?;

    let mut result = json!({"id": outcome.insight.id});
    if let Some(score) = outcome.insight.fidelity_score() {
        result["fidelity_score"] = json!(score);
    }
    if outcome.fidelity_warning {
        result["fidelity_warning"] = json!(true);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;

    #[tokio::test]
    async fn test_compress_returns_id() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({"content": "a compressed lesson", "source_ids": [1, 2]})),
        )
        .await
        .unwrap();
        assert!(result["id"].as_i64().unwrap() >= 1);
        assert!(result.get("fidelity_warning").is_none());
    }

    #[tokio::test]
    async fn test_empty_sources_rejected() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({"content": "x", "source_ids": []})),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_low_fidelity_sets_warning() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({
                "content": "lossy compression",
                "source_ids": [1],
                "metadata": {"fidelity_score": 0.2}
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["fidelity_score"], json!(0.2));
        assert_eq!(result["fidelity_warning"], json!(true));
    }
}
