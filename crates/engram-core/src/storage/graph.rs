//! Graph row operations
//!
//! Nodes are unique by (label, name) and edges by (source, target, relation).
//! Upserts are idempotent; properties merge key-by-key with last-write-wins.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use uuid::Uuid;

use super::{Result, StorageError, Store, parse_json_required};
use crate::graph::{GraphEdge, GraphNode};

impl Store {
    /// Idempotent node upsert. Returns the existing node (with merged
    /// properties) when (label, name) is already present.
    pub fn upsert_node(&self, label: &str, name: &str, properties: &Value) -> Result<GraphNode> {
        if label.is_empty() || name.is_empty() {
            return Err(StorageError::Invalid(
                "node label and name must be non-empty".to_string(),
            ));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT id, properties, insight_id, created_at FROM graph_nodes
                 WHERE label = ?1 AND name = ?2",
                params![label, name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            )
            .optional()?;

        let node = match existing {
            Some((id, old_props_raw, insight_id, created_at)) => {
                let old_props = parse_json_required(old_props_raw, "graph_nodes.properties")?;
                let merged = merge_properties(old_props, properties);
                tx.execute(
                    "UPDATE graph_nodes SET properties = ?1 WHERE id = ?2",
                    params![merged.to_string(), id],
                )?;
                GraphNode {
                    id,
                    label: label.to_string(),
                    name: name.to_string(),
                    properties: merged,
                    insight_id,
                    created_at,
                }
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO graph_nodes (id, label, name, properties, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, label, name, properties.to_string(), now],
                )?;
                GraphNode {
                    id,
                    label: label.to_string(),
                    name: name.to_string(),
                    properties: properties.clone(),
                    insight_id: None,
                    created_at: now,
                }
            }
        };

        tx.commit()?;
        Ok(node)
    }

    /// Look up a node by name, any label. Oldest wins when several labels
    /// share the name.
    pub fn node_by_name(&self, name: &str) -> Result<Option<GraphNode>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, label, name, properties, insight_id, created_at FROM graph_nodes
             WHERE name = ?1 ORDER BY rowid ASC LIMIT 1",
            [name],
            map_node_row,
        )
        .optional()?
        .transpose()
    }

    pub fn node_by_id(&self, id: &str) -> Result<GraphNode> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, label, name, properties, insight_id, created_at FROM graph_nodes
             WHERE id = ?1",
            [id],
            map_node_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("graph node {id}")))?
    }

    /// Idempotent edge upsert between two existing node ids. Weight is
    /// replaced and properties merge last-write-wins on re-add.
    pub fn upsert_edge(
        &self,
        source_id: &str,
        target_id: &str,
        relation: &str,
        weight: f64,
        properties: &Value,
    ) -> Result<GraphEdge> {
        if relation.is_empty() {
            return Err(StorageError::Invalid("relation must be non-empty".to_string()));
        }
        if !(0.0..=1.0).contains(&weight) {
            return Err(StorageError::Invalid(format!(
                "edge weight must be within [0, 1], got {weight}"
            )));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT id, properties, created_at FROM graph_edges
                 WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                params![source_id, target_id, relation],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                    ))
                },
            )
            .optional()?;

        let edge = match existing {
            Some((id, old_props_raw, created_at)) => {
                let old_props = parse_json_required(old_props_raw, "graph_edges.properties")?;
                let merged = merge_properties(old_props, properties);
                tx.execute(
                    "UPDATE graph_edges SET weight = ?1, properties = ?2 WHERE id = ?3",
                    params![weight, merged.to_string(), id],
                )?;
                GraphEdge {
                    id,
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    relation: relation.to_string(),
                    weight,
                    properties: merged,
                    created_at,
                }
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO graph_edges
                     (id, source_id, target_id, relation, weight, properties, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, source_id, target_id, relation, weight, properties.to_string(), now],
                )?;
                GraphEdge {
                    id,
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    relation: relation.to_string(),
                    weight,
                    properties: properties.clone(),
                    created_at: now,
                }
            }
        };

        tx.commit()?;
        Ok(edge)
    }

    /// Outgoing edges of a node, optionally filtered by relation.
    pub fn out_edges(&self, node_id: &str, relation: Option<&str>) -> Result<Vec<GraphEdge>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, source_id, target_id, relation, weight, properties, created_at
             FROM graph_edges WHERE source_id = ?1",
        );
        if relation.is_some() {
            sql.push_str(" AND relation = ?2");
        }
        sql.push_str(" ORDER BY rowid ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match relation {
            Some(rel) => stmt.query_map(params![node_id, rel], map_edge_row)?,
            None => stmt.query_map(params![node_id], map_edge_row)?,
        };
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row??);
        }
        Ok(edges)
    }

    /// Incoming edges of a node (used by the backward frontier of path search).
    pub fn in_edges(&self, node_id: &str) -> Result<Vec<GraphEdge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, relation, weight, properties, created_at
             FROM graph_edges WHERE target_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![node_id], map_edge_row)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row??);
        }
        Ok(edges)
    }
}

/// Key-by-key merge, new values winning.
fn merge_properties(old: Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(mut old_map), Value::Object(new_map)) => {
            for (k, v) in new_map {
                old_map.insert(k.clone(), v.clone());
            }
            Value::Object(old_map)
        }
        (old, Value::Null) => old,
        (_, new) => new.clone(),
    }
}

fn map_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<GraphNode>> {
    let id: String = row.get(0)?;
    let label: String = row.get(1)?;
    let name: String = row.get(2)?;
    let props_raw: String = row.get(3)?;
    let insight_id: Option<i64> = row.get(4)?;
    let created_at: DateTime<Utc> = row.get(5)?;
    Ok((|| {
        Ok(GraphNode {
            id,
            label,
            name,
            properties: parse_json_required(props_raw, "graph_nodes.properties")?,
            insight_id,
            created_at,
        })
    })())
}

fn map_edge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<GraphEdge>> {
    let id: String = row.get(0)?;
    let source_id: String = row.get(1)?;
    let target_id: String = row.get(2)?;
    let relation: String = row.get(3)?;
    let weight: f64 = row.get(4)?;
    let props_raw: String = row.get(5)?;
    let created_at: DateTime<Utc> = row.get(6)?;
    Ok((|| {
        Ok(GraphEdge {
            id,
            source_id,
            target_id,
            relation,
            weight,
            properties: parse_json_required(props_raw, "graph_edges.properties")?,
            created_at,
        })
    })())
}
