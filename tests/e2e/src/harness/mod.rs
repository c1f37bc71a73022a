//! Test environment
//!
//! One temp database per environment, full service graph, scripted clients,
//! and a ready-to-drive MCP server.

use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;

use engram_core::{EngramConfig, Store};
use engram_mcp::protocol::types::{JsonRpcRequest, JsonRpcResponse};
use engram_mcp::server::McpServer;
use engram_mcp::state::Services;

use crate::mocks::{JudgeScript, ScriptedEmbedder, ScriptedJudge};

/// A fully wired, hermetic engine instance.
pub struct TestEnv {
    pub services: Arc<Services>,
    pub judge: Arc<ScriptedJudge>,
    pub embedder: Arc<ScriptedEmbedder>,
    _dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(EngramConfig::default())
    }

    pub fn with_config(config: EngramConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Store::open(Some(dir.path().join("engram.db"))).expect("store opens");
        let judge = Arc::new(ScriptedJudge::new(JudgeScript::Reward(0.8)));
        let embedder = Arc::new(ScriptedEmbedder::new());
        let services = Services::assemble(config, store, embedder.clone(), judge.clone())
            .expect("services assemble");
        Self {
            services,
            judge,
            embedder,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &Store {
        &self.services.store
    }

    /// A server that has already completed the initialize handshake.
    pub async fn initialized_server(&self) -> McpServer {
        let mut server = McpServer::new(self.services.clone());
        let response = server
            .handle_request(request(0, "initialize", Some(json!({}))))
            .await
            .expect("initialize responds");
        assert!(response.error.is_none(), "initialize failed: {response:?}");
        server
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a JSON-RPC request frame.
pub fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(id)),
        method: method.to_string(),
        params,
    }
}

/// Call a tool and return its decoded JSON payload.
pub async fn call_tool(server: &mut McpServer, name: &str, arguments: Value) -> Value {
    let response = try_call_tool(server, name, arguments).await;
    match response.result {
        Some(result) => decode_tool_payload(&result),
        None => panic!(
            "tool {name} failed: {:?}",
            response.error.expect("error present when result absent")
        ),
    }
}

/// Call a tool, returning the raw response (for error-path assertions).
pub async fn try_call_tool(server: &mut McpServer, name: &str, arguments: Value) -> JsonRpcResponse {
    server
        .handle_request(request(
            1,
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        ))
        .await
        .expect("tools/call responds")
}

/// Read a resource and decode its JSON body.
pub async fn read_resource(server: &mut McpServer, uri: &str) -> Value {
    let response = server
        .handle_request(request(2, "resources/read", Some(json!({"uri": uri}))))
        .await
        .expect("resources/read responds");
    let result = response
        .result
        .unwrap_or_else(|| panic!("resource {uri} failed: {:?}", response.error));
    let text = result["contents"][0]["text"]
        .as_str()
        .expect("resource body is text");
    serde_json::from_str(text).expect("resource body is JSON")
}

fn decode_tool_payload(result: &Value) -> Value {
    let text = result["content"][0]["text"]
        .as_str()
        .expect("tool payload is text");
    serde_json::from_str(text).expect("tool payload is JSON")
}
