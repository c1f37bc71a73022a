//! MCP Tools
//!
//! One module per tool family. Every tool exposes a `schema()` for discovery
//! and an `execute()` that deserializes its arguments into a typed record at
//! the boundary; handlers never work off raw JSON maps.

pub mod compress;
pub mod dialogue;
pub mod episode;
pub mod evaluate;
pub mod golden;
pub mod graph;
pub mod judge_scores;
pub mod search;
pub mod validation;
pub mod working;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ToolError;

/// Deserialize tool arguments into the tool's typed record. Missing argument
/// objects become `{}` so tools with all-optional fields still parse.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Option<Value>) -> Result<T, ToolError> {
    let value = args.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(Into::into)
}
