//! evaluate_response tool

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "minLength": 1,
                "description": "The user query the answer responds to"
            },
            "context_docs": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Retrieved context the answer was generated from"
            },
            "answer": {
                "type": "string",
                "minLength": 1,
                "description": "The generated answer to score"
            }
        },
        "required": ["query", "answer"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    query: String,
    #[serde(default)]
    context_docs: Vec<String>,
    answer: String,
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    let report = services
        .evaluator
        .evaluate_answer(&args.query, &args.context_docs, &args.answer)
        .await?;
    serde_json::to_value(&report).map_err(|e| ToolError::internal(e.to_string()))
}
