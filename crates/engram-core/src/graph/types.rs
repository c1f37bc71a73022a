//! Property graph data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default label for endpoints auto-created by `add_edge`.
pub const DEFAULT_NODE_LABEL: &str = "Entity";

/// A graph node, unique by (label, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Opaque stable id (UUID v4).
    pub id: String,
    /// Node type, CamelCase by convention.
    pub label: String,
    /// Unique within a label.
    pub name: String,
    pub properties: Value,
    /// Optional link to the insight this node was extracted from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A directed, weighted, typed edge, unique by (source, target, relation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    /// Within [0, 1].
    pub weight: f64,
    pub properties: Value,
    pub created_at: DateTime<Utc>,
}

/// A node reached by neighborhood traversal, annotated with the incoming edge
/// and the minimum distance from the start node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub node_id: String,
    pub label: String,
    pub name: String,
    pub properties: Value,
    /// Relation of the edge this node was first reached through.
    pub relation: String,
    /// Minimum path length from the start node.
    pub distance: u32,
    /// Weight of the incoming edge.
    pub weight: f64,
}

/// One hop on a shortest path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathHop {
    pub node_id: String,
    pub label: String,
    pub name: String,
}

/// Result of a shortest-path search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    pub path_found: bool,
    /// Number of edges on the shortest path; 0 when no path was found.
    pub path_length: usize,
    pub paths: Vec<Vec<PathHop>>,
}

impl PathResult {
    pub fn not_found() -> Self {
        Self {
            path_found: false,
            path_length: 0,
            paths: Vec::new(),
        }
    }
}
