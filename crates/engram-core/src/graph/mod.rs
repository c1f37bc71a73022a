//! Property Graph
//!
//! Labeled nodes, weighted typed edges, bounded-depth neighborhood traversal,
//! and bidirectional shortest-path search. Both walks are iterative and carry
//! explicit visited sets; path search additionally runs under a wall-clock
//! budget and reports a timeout as a miss, not an error.

mod traverse;
mod types;

use serde_json::Value;

use crate::config::GraphConfig;
use crate::storage::{StorageError, Store};

pub use types::{DEFAULT_NODE_LABEL, GraphEdge, GraphNode, Neighbor, PathHop, PathResult};

/// Graph operation error
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("node not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Graph operations over the node and edge tables.
pub struct GraphService {
    store: Store,
    cfg: GraphConfig,
}

impl GraphService {
    pub fn new(store: Store, cfg: GraphConfig) -> Self {
        Self { store, cfg }
    }

    /// Idempotent node upsert keyed on (label, name).
    pub fn add_node(&self, label: &str, name: &str, properties: Value) -> Result<GraphNode, GraphError> {
        Ok(self.store.upsert_node(label, name, &properties)?)
    }

    /// Idempotent edge upsert keyed on (source, target, relation). Missing
    /// endpoints are created with the default label.
    pub fn add_edge(
        &self,
        source_name: &str,
        target_name: &str,
        relation: &str,
        weight: f64,
        properties: Value,
    ) -> Result<GraphEdge, GraphError> {
        if source_name.is_empty() || target_name.is_empty() {
            return Err(GraphError::Invalid(
                "source_name and target_name must be non-empty".to_string(),
            ));
        }
        let source = self.resolve_or_create(source_name)?;
        let target = self.resolve_or_create(target_name)?;
        Ok(self
            .store
            .upsert_edge(&source.id, &target.id, relation, weight, &properties)?)
    }

    fn resolve_or_create(&self, name: &str) -> Result<GraphNode, GraphError> {
        match self.store.node_by_name(name)? {
            Some(node) => Ok(node),
            None => Ok(self
                .store
                .upsert_node(DEFAULT_NODE_LABEL, name, &Value::Object(Default::default()))?),
        }
    }

    /// Every node within `depth` directed hops of the start node, annotated
    /// with its first incoming edge and minimum distance. The optional
    /// relation filter applies at edge expansion.
    pub fn query_neighbors(
        &self,
        node_name: &str,
        relation: Option<&str>,
        depth: u32,
    ) -> Result<Vec<Neighbor>, GraphError> {
        if depth < 1 || depth > self.cfg.max_neighbors_depth {
            return Err(GraphError::Invalid(format!(
                "depth must be within [1, {}], got {depth}",
                self.cfg.max_neighbors_depth
            )));
        }
        let start = self
            .store
            .node_by_name(node_name)?
            .ok_or_else(|| GraphError::NotFound(node_name.to_string()))?;

        traverse::neighborhood(&self.store, &start.id, relation, depth).map_err(Into::into)
    }

    /// Shortest directed path between two named nodes, bounded by `max_depth`
    /// edges and the configured wall-clock budget.
    pub fn find_path(
        &self,
        start_name: &str,
        end_name: &str,
        max_depth: u32,
    ) -> Result<PathResult, GraphError> {
        if max_depth < 1 || max_depth > self.cfg.max_path_depth {
            return Err(GraphError::Invalid(format!(
                "max_depth must be within [1, {}], got {max_depth}",
                self.cfg.max_path_depth
            )));
        }
        let start = self
            .store
            .node_by_name(start_name)?
            .ok_or_else(|| GraphError::NotFound(start_name.to_string()))?;
        let end = self
            .store
            .node_by_name(end_name)?
            .ok_or_else(|| GraphError::NotFound(end_name.to_string()))?;

        if start.id == end.id {
            return Ok(PathResult {
                path_found: true,
                path_length: 0,
                paths: vec![vec![hop_of(&start)]],
            });
        }

        let budget = std::time::Duration::from_millis(self.cfg.path_timeout_ms);
        let node_ids =
            match traverse::bidirectional_shortest_path(&self.store, &start.id, &end.id, max_depth, budget)? {
                Some(ids) => ids,
                None => return Ok(PathResult::not_found()),
            };

        let mut hops = Vec::with_capacity(node_ids.len());
        for id in &node_ids {
            hops.push(hop_of(&self.store.node_by_id(id)?));
        }
        Ok(PathResult {
            path_found: true,
            path_length: hops.len().saturating_sub(1),
            paths: vec![hops],
        })
    }
}

fn hop_of(node: &GraphNode) -> PathHop {
    PathHop {
        node_id: node.id.clone(),
        label: node.label.clone(),
        name: node.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> (GraphService, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("graph.db"))).unwrap();
        (GraphService::new(store, GraphConfig::default()), dir)
    }

    fn props() -> Value {
        serde_json::json!({})
    }

    #[test]
    fn test_add_edge_auto_creates_endpoints() {
        let (graph, _dir) = service();
        let edge = graph.add_edge("A", "B", "RELATES", 0.5, props()).unwrap();
        let a = graph.store.node_by_name("A").unwrap().unwrap();
        assert_eq!(a.label, DEFAULT_NODE_LABEL);
        assert_eq!(edge.source_id, a.id);
    }

    #[test]
    fn test_neighbors_depth_and_relations() {
        let (graph, _dir) = service();
        graph.add_node("Project", "P", props()).unwrap();
        graph.add_node("Tech", "T1", props()).unwrap();
        graph.add_node("Tech", "T2", props()).unwrap();
        graph.add_edge("P", "T1", "USES", 1.0, props()).unwrap();
        graph.add_edge("T1", "T2", "RELATED_TO", 0.8, props()).unwrap();

        let depth1 = graph.query_neighbors("P", None, 1).unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].name, "T1");
        assert_eq!(depth1[0].distance, 1);
        assert_eq!(depth1[0].relation, "USES");

        let depth2 = graph.query_neighbors("P", None, 2).unwrap();
        assert_eq!(depth2.len(), 2);
        let t2 = depth2.iter().find(|n| n.name == "T2").unwrap();
        assert_eq!(t2.distance, 2);
        assert_eq!(t2.relation, "RELATED_TO");
        assert_eq!(t2.weight, 0.8);
    }

    #[test]
    fn test_neighbors_relation_filter() {
        let (graph, _dir) = service();
        graph.add_edge("P", "T1", "USES", 1.0, props()).unwrap();
        graph.add_edge("P", "T2", "OWNS", 1.0, props()).unwrap();

        let uses = graph.query_neighbors("P", Some("USES"), 2).unwrap();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "T1");
    }

    #[test]
    fn test_neighbors_cycle_safe() {
        let (graph, _dir) = service();
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "A", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "C", "R", 1.0, props()).unwrap();

        let neighbors = graph.query_neighbors("A", None, 5).unwrap();
        let names: Vec<&str> = neighbors.iter().map(|n| n.name.as_str()).collect();
        // A itself is not a neighbor; the cycle does not loop forever.
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"B"));
        assert!(names.contains(&"C"));
    }

    #[test]
    fn test_neighbors_distance_is_minimum() {
        let (graph, _dir) = service();
        // Two routes to C: A->C direct and A->B->C.
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "C", "R", 1.0, props()).unwrap();
        graph.add_edge("A", "C", "R", 1.0, props()).unwrap();

        let neighbors = graph.query_neighbors("A", None, 3).unwrap();
        let c = neighbors.iter().find(|n| n.name == "C").unwrap();
        assert_eq!(c.distance, 1);
    }

    #[test]
    fn test_depth_bounds_rejected() {
        let (graph, _dir) = service();
        graph.add_node("X", "x", props()).unwrap();
        assert!(matches!(
            graph.query_neighbors("x", None, 6),
            Err(GraphError::Invalid(_))
        ));
        assert!(matches!(
            graph.query_neighbors("x", None, 0),
            Err(GraphError::Invalid(_))
        ));
        assert!(matches!(
            graph.find_path("x", "x", 11),
            Err(GraphError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_node_is_not_found() {
        let (graph, _dir) = service();
        assert!(matches!(
            graph.query_neighbors("ghost", None, 2),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_path_shortest() {
        let (graph, _dir) = service();
        // Long route A->B->C->D plus shortcut A->X->D.
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "C", "R", 1.0, props()).unwrap();
        graph.add_edge("C", "D", "R", 1.0, props()).unwrap();
        graph.add_edge("A", "X", "R", 1.0, props()).unwrap();
        graph.add_edge("X", "D", "R", 1.0, props()).unwrap();

        let result = graph.find_path("A", "D", 5).unwrap();
        assert!(result.path_found);
        assert_eq!(result.path_length, 2);
        let names: Vec<&str> = result.paths[0].iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["A", "X", "D"]);
    }

    #[test]
    fn test_find_path_respects_direction() {
        let (graph, _dir) = service();
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();

        assert!(graph.find_path("A", "B", 3).unwrap().path_found);
        // Edges are directed; no reverse path exists.
        assert!(!graph.find_path("B", "A", 3).unwrap().path_found);
    }

    #[test]
    fn test_find_path_depth_budget() {
        let (graph, _dir) = service();
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "C", "R", 1.0, props()).unwrap();
        graph.add_edge("C", "D", "R", 1.0, props()).unwrap();

        assert!(!graph.find_path("A", "D", 2).unwrap().path_found);
        assert!(graph.find_path("A", "D", 3).unwrap().path_found);
    }

    #[test]
    fn test_find_path_same_node() {
        let (graph, _dir) = service();
        graph.add_node("Solo", "S", props()).unwrap();
        let result = graph.find_path("S", "S", 5).unwrap();
        assert!(result.path_found);
        assert_eq!(result.path_length, 0);
    }

    #[test]
    fn test_find_path_cycle_guard() {
        let (graph, _dir) = service();
        graph.add_edge("A", "B", "R", 1.0, props()).unwrap();
        graph.add_edge("B", "A", "R", 1.0, props()).unwrap();

        let result = graph.find_path("A", "C", 5);
        assert!(matches!(result, Err(GraphError::NotFound(_))));

        graph.add_node("Island", "C", props()).unwrap();
        let result = graph.find_path("A", "C", 5).unwrap();
        assert!(!result.path_found);
    }
}
