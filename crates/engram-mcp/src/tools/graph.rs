//! Graph tools: graph_add_node, graph_add_edge, graph_query_neighbors,
//! graph_find_path

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn add_node_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "label": {
                "type": "string",
                "minLength": 1,
                "description": "Node type, CamelCase by convention (e.g. 'Project', 'Tech')"
            },
            "name": {
                "type": "string",
                "minLength": 1,
                "description": "Node name, unique within the label"
            },
            "properties": {
                "type": "object",
                "description": "Structured properties, merged last-write-wins on re-add"
            }
        },
        "required": ["label", "name"]
    })
}

pub fn add_edge_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source_name": {"type": "string", "minLength": 1},
            "target_name": {"type": "string", "minLength": 1},
            "relation": {
                "type": "string",
                "minLength": 1,
                "description": "Edge type, e.g. 'USES' or 'RELATED_TO'"
            },
            "weight": {
                "type": "number",
                "minimum": 0,
                "maximum": 1,
                "default": 1.0
            },
            "properties": {"type": "object"}
        },
        "required": ["source_name", "target_name", "relation"]
    })
}

pub fn query_neighbors_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "node_name": {"type": "string", "minLength": 1},
            "relation_type": {
                "type": "string",
                "description": "Optional relation filter applied at edge expansion"
            },
            "depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 5,
                "default": 2
            }
        },
        "required": ["node_name"]
    })
}

pub fn find_path_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start_name": {"type": "string", "minLength": 1},
            "end_name": {"type": "string", "minLength": 1},
            "max_depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 10,
                "default": 5
            }
        },
        "required": ["start_name", "end_name"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddNodeArgs {
    label: String,
    name: String,
    #[serde(default)]
    properties: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddEdgeArgs {
    source_name: String,
    target_name: String,
    relation: String,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    properties: Option<Value>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryNeighborsArgs {
    node_name: String,
    #[serde(default)]
    relation_type: Option<String>,
    #[serde(default = "default_depth")]
    depth: u32,
}

fn default_depth() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FindPathArgs {
    start_name: String,
    end_name: String,
    #[serde(default = "default_max_depth")]
    max_depth: u32,
}

fn default_max_depth() -> u32 {
    5
}

fn props_or_empty(properties: Option<Value>) -> Value {
    properties.unwrap_or_else(|| Value::Object(Default::default()))
}

pub async fn execute_add_node(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: AddNodeArgs = super::parse_args(args)?;
    let node = services
        .graph
        .add_node(&args.label, &args.name, props_or_empty(args.properties))?;
    Ok(json!({
        "id": node.id,
        "label": node.label,
        "name": node.name,
        "properties": node.properties,
    }))
}

pub async fn execute_add_edge(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: AddEdgeArgs = super::parse_args(args)?;
    let edge = services.graph.add_edge(
        &args.source_name,
        &args.target_name,
        &args.relation,
        args.weight,
        props_or_empty(args.properties),
    )?;
    Ok(json!({
        "id": edge.id,
        "source_id": edge.source_id,
        "target_id": edge.target_id,
        "relation": edge.relation,
        "weight": edge.weight,
    }))
}

pub async fn execute_query_neighbors(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: QueryNeighborsArgs = super::parse_args(args)?;
    let neighbors =
        services
            .graph
            .query_neighbors(&args.node_name, args.relation_type.as_deref(), args.depth)?;
    let count = neighbors.len();
    Ok(json!({
        "neighbors": neighbors,
        "count": count,
    }))
}

pub async fn execute_find_path(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: FindPathArgs = super::parse_args(args)?;
    let result = services
        .graph
        .find_path(&args.start_name, &args.end_name, args.max_depth)?;
    serde_json::to_value(&result).map_err(|e| ToolError::internal(e.to_string()))
}
