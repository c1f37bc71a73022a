//! update_working_memory tool

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
                "minLength": 1,
                "description": "Item text to keep in the working set"
            },
            "importance": {
                "type": "number",
                "minimum": 0,
                "maximum": 1,
                "default": 0.5,
                "description": "Eviction priority; items above the critical threshold archive instead of vanishing"
            }
        },
        "required": ["content"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    content: String,
    #[serde(default = "default_importance")]
    importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    let upsert = services.tiers.upsert_working(&args.content, args.importance)?;

    let mut result = json!({"added_id": upsert.added.id});
    if let Some(evicted) = upsert.evicted_id {
        result["evicted_id"] = json!(evicted);
    }
    if let Some(archived) = upsert.archived_id {
        result["archived_id"] = json!(archived);
    }
    Ok(result)
}
