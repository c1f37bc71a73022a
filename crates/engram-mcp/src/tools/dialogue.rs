//! store_raw_dialogue tool

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "session_id": {
                "type": "string",
                "description": "Free-form conversation/session identifier"
            },
            "speaker": {
                "type": "string",
                "description": "Speaker tag, e.g. 'user' or 'assistant'"
            },
            "content": {
                "type": "string",
                "description": "Verbatim turn text"
            },
            "metadata": {
                "type": "object",
                "description": "Optional structured metadata stored with the turn"
            }
        },
        "required": ["session_id", "speaker", "content"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    session_id: String,
    speaker: String,
    content: String,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    let turn = services.store.insert_raw_turn(
        &args.session_id,
        &args.speaker,
        &args.content,
        args.metadata.as_ref(),
    )?;
    Ok(json!({
        "id": turn.id,
        "timestamp": turn.created_at.to_rfc3339(),
    }))
}
