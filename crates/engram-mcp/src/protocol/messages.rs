//! Protocol message bodies
//!
//! Typed payloads for the handshake, tool, and resource methods.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// initialize request params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub client_info: Option<Value>,
}

impl Default for InitializeRequest {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            capabilities: None,
            client_info: None,
        }
    }
}

fn default_protocol_version() -> String {
    super::types::PROTOCOL_VERSION.to_string()
}

/// initialize response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<HashMap<String, Value>>,
}

/// One registered tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescription>,
}

/// tools/call params
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// One registered read-only resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceDescription>,
}

/// resources/read params
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_defaults() {
        let request: InitializeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.protocol_version, super::super::types::PROTOCOL_VERSION);
    }

    #[test]
    fn test_call_tool_request_parses() {
        let raw = r#"{"name": "hybrid_search", "arguments": {"query_text": "x"}}"#;
        let request: CallToolRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.name, "hybrid_search");
        assert!(request.arguments.is_some());
    }

    #[test]
    fn test_tool_description_uses_camel_case_schema_key() {
        let tool = ToolDescription {
            name: "ping".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        };
        let encoded = serde_json::to_value(&tool).unwrap();
        assert!(encoded.get("inputSchema").is_some());
    }
}
