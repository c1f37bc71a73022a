//! MCP Server Core
//!
//! Routes JSON-RPC methods to tool and resource handlers. Tool dispatch is a
//! single match on the tool name; every handler failure is converted into the
//! structured error envelope and no exception escapes the process.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ToolError};
use crate::protocol::messages::{
    CallToolRequest, InitializeRequest, InitializeResult, ListResourcesResult, ListToolsResult,
    ReadResourceRequest, ReadResourceResult, ResourceContent, ResourceDescription,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::resources;
use crate::state::Services;
use crate::tools;

/// MCP server over the assembled service graph.
pub struct McpServer {
    services: Arc<Services>,
    initialized: bool,
}

impl McpServer {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            initialized: false,
        }
    }

    /// Handle one request; `None` for notifications.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("Rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::failure(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "resources/list" => self.handle_resources_list(),
            "resources/read" => self.handle_resources_read(request.params).await,
            "ping" => Ok(json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Use the client's version when it is older; newer clients get ours.
        let negotiated = if request.protocol_version.as_str() < PROTOCOL_VERSION {
            request.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_string()
        };

        self.initialized = true;
        info!("Session initialized with protocol version {}", negotiated);

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "engram".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(HashMap::from([(
                    "listChanged".to_string(),
                    json!(false),
                )])),
                resources: Some(HashMap::from([(
                    "listChanged".to_string(),
                    json!(false),
                )])),
                prompts: None,
            },
            instructions: Some(
                "Engram is an external memory engine. Store raw dialogue with \
                 store_raw_dialogue, compress important turns into insights with \
                 compress_to_l2_insight, and retrieve context with hybrid_search or \
                 multi_query_search (supply your own query variants). After answering, call \
                 evaluate_response so low-reward outcomes produce reflections that resurface \
                 on similar future queries."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "store_raw_dialogue".to_string(),
                description: Some(
                    "Append one immutable raw dialogue turn (L0) to a session.".to_string(),
                ),
                input_schema: tools::dialogue::schema(),
            },
            ToolDescription {
                name: "compress_to_l2_insight".to_string(),
                description: Some(
                    "Store a compressed semantic insight derived from raw turns; the content is \
                     embedded and becomes searchable."
                        .to_string(),
                ),
                input_schema: tools::compress::schema(),
            },
            ToolDescription {
                name: "hybrid_search".to_string(),
                description: Some(
                    "Retrieve insights by weighted fusion of semantic (cosine) and keyword \
                     (full-text) ranking."
                        .to_string(),
                ),
                input_schema: tools::search::hybrid_schema(),
            },
            ToolDescription {
                name: "multi_query_search".to_string(),
                description: Some(
                    "Run hybrid search for several host-supplied query variants in parallel, \
                     deduplicate, and fuse by reciprocal rank."
                        .to_string(),
                ),
                input_schema: tools::search::multi_query_schema(),
            },
            ToolDescription {
                name: "update_working_memory".to_string(),
                description: Some(
                    "Insert a working-memory item; over capacity, the least-recently-used \
                     non-critical item is evicted (critical items archive to stale memory)."
                        .to_string(),
                ),
                input_schema: tools::working::schema(),
            },
            ToolDescription {
                name: "store_episode".to_string(),
                description: Some(
                    "Record a low-reward interaction and its reflection, retrievable by query \
                     similarity."
                        .to_string(),
                ),
                input_schema: tools::episode::schema(),
            },
            ToolDescription {
                name: "evaluate_response".to_string(),
                description: Some(
                    "Judge an answer against its query and context; low rewards store a \
                     reflection episode automatically."
                        .to_string(),
                ),
                input_schema: tools::evaluate::schema(),
            },
            ToolDescription {
                name: "store_dual_judge_scores".to_string(),
                description: Some(
                    "Label documents with two judge prompt variants and persist the pair as \
                     ground truth with its agreement kappa."
                        .to_string(),
                ),
                input_schema: tools::judge_scores::schema(),
            },
            ToolDescription {
                name: "validate_judge_agreement".to_string(),
                description: Some(
                    "Aggregate macro/micro Cohen's kappa over the ground-truth set; on \
                     disagreement, triage queries and test for systematic judge bias."
                        .to_string(),
                ),
                input_schema: tools::validation::schema(),
            },
            ToolDescription {
                name: "get_golden_test_results".to_string(),
                description: Some(
                    "Re-run retrieval over the ground-truth queries and report precision@5 \
                     with drift against the previous run."
                        .to_string(),
                ),
                input_schema: tools::golden::schema(),
            },
            ToolDescription {
                name: "graph_add_node".to_string(),
                description: Some("Idempotently upsert a labeled graph node.".to_string()),
                input_schema: tools::graph::add_node_schema(),
            },
            ToolDescription {
                name: "graph_add_edge".to_string(),
                description: Some(
                    "Idempotently upsert a weighted directed edge; missing endpoints are \
                     created with the default label."
                        .to_string(),
                ),
                input_schema: tools::graph::add_edge_schema(),
            },
            ToolDescription {
                name: "graph_query_neighbors".to_string(),
                description: Some(
                    "Breadth-first neighborhood of a node up to depth 5, with distances and \
                     incoming edge info."
                        .to_string(),
                ),
                input_schema: tools::graph::query_neighbors_schema(),
            },
            ToolDescription {
                name: "graph_find_path".to_string(),
                description: Some(
                    "Bidirectional shortest-path search between two nodes under a 1s budget."
                        .to_string(),
                ),
                input_schema: tools::graph::find_path_schema(),
            },
            ToolDescription {
                name: "ping".to_string(),
                description: Some("Liveness check.".to_string()),
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ];

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        let services = &self.services;
        let result = match request.name.as_str() {
            "store_raw_dialogue" => tools::dialogue::execute(services, request.arguments).await,
            "compress_to_l2_insight" => tools::compress::execute(services, request.arguments).await,
            "hybrid_search" => tools::search::execute_hybrid(services, request.arguments).await,
            "multi_query_search" => {
                tools::search::execute_multi_query(services, request.arguments).await
            }
            "update_working_memory" => tools::working::execute(services, request.arguments).await,
            "store_episode" => tools::episode::execute(services, request.arguments).await,
            "evaluate_response" => tools::evaluate::execute(services, request.arguments).await,
            "store_dual_judge_scores" => {
                tools::judge_scores::execute(services, request.arguments).await
            }
            "validate_judge_agreement" => {
                tools::validation::execute(services, request.arguments).await
            }
            "get_golden_test_results" => tools::golden::execute(services, request.arguments).await,
            "graph_add_node" => tools::graph::execute_add_node(services, request.arguments).await,
            "graph_add_edge" => tools::graph::execute_add_edge(services, request.arguments).await,
            "graph_query_neighbors" => {
                tools::graph::execute_query_neighbors(services, request.arguments).await
            }
            "graph_find_path" => tools::graph::execute_find_path(services, request.arguments).await,
            "ping" => Ok(json!("pong")),
            name => Err(ToolError::new(
                ErrorKind::NotFound,
                format!("unknown tool: {name}"),
            )),
        };

        match result {
            Ok(value) => {
                let text = serde_json::to_string(&value)
                    .map_err(|e| JsonRpcError::internal_error(&e.to_string()))?;
                Ok(json!({
                    "content": [{"type": "text", "text": text}],
                }))
            }
            Err(error) => {
                warn!(tool = request.name, "Tool call failed: {}", error);
                let envelope = error.envelope(&request.name);
                let rpc = match error.kind {
                    ErrorKind::Validation => JsonRpcError::invalid_params(&error.details),
                    ErrorKind::NotFound => {
                        JsonRpcError::invalid_params(&format!("not found: {}", error.details))
                    }
                    _ => JsonRpcError::internal_error(&error.details),
                };
                Err(rpc.with_envelope(envelope))
            }
        }
    }

    fn handle_resources_list(&self) -> Result<Value, JsonRpcError> {
        let resources = vec![
            ResourceDescription {
                uri: "memory://l2-insights".to_string(),
                name: "L2 insights".to_string(),
                description: Some(
                    "Compressed insights; filters: query, top_k, fidelity_min, created_after, \
                     created_before"
                        .to_string(),
                ),
                mime_type: "application/json".to_string(),
            },
            ResourceDescription {
                uri: "memory://working-memory".to_string(),
                name: "Working memory".to_string(),
                description: Some("The bounded working set, most recent first".to_string()),
                mime_type: "application/json".to_string(),
            },
            ResourceDescription {
                uri: "memory://episode-memory".to_string(),
                name: "Episode memory".to_string(),
                description: Some(
                    "Reflective episodes; filters: query, top_k, min_similarity, reward_min, \
                     days_back"
                        .to_string(),
                ),
                mime_type: "application/json".to_string(),
            },
            ResourceDescription {
                uri: "memory://l0-raw".to_string(),
                name: "Raw dialogue".to_string(),
                description: Some(
                    "Immutable raw turns; filters: session_id, date_range, speaker, limit, order"
                        .to_string(),
                ),
                mime_type: "application/json".to_string(),
            },
            ResourceDescription {
                uri: "memory://stale-memory".to_string(),
                name: "Stale archive".to_string(),
                description: Some(
                    "Archived working items; filters: reason, days_back, importance_min, limit"
                        .to_string(),
                ),
                mime_type: "application/json".to_string(),
            },
        ];

        serde_json::to_value(ListResourcesResult { resources })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_resources_read(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: ReadResourceRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing resource parameters")),
        };

        match resources::memory::read(&self.services, &request.uri).await {
            Ok(text) => {
                let result = ReadResourceResult {
                    contents: vec![ResourceContent {
                        uri: request.uri,
                        mime_type: "application/json".to_string(),
                        text,
                    }],
                };
                serde_json::to_value(result)
                    .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
            }
            Err(error) => {
                warn!(uri = request.uri, "Resource read failed: {}", error);
                let envelope = error.envelope(&request.uri);
                let rpc = match error.kind {
                    ErrorKind::NotFound => JsonRpcError::resource_not_found(&request.uri),
                    ErrorKind::Validation => JsonRpcError::invalid_params(&error.details),
                    _ => JsonRpcError::internal_error(&error.details),
                };
                Err(rpc.with_envelope(envelope))
            }
        }
    }
}
