//! Graph traversal
//!
//! Iterative, visited-set-guarded walks over the adjacency tables. Nothing in
//! here recurses or yields; the only bounds are the depth arguments and the
//! path search wall-clock budget.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::graph::Neighbor;
use crate::storage::{StorageError, Store};

/// Breadth-first neighborhood expansion from `start_id`, up to `depth` hops.
///
/// Each reached node is reported once, at its minimum distance, with the edge
/// it was first reached through.
pub(crate) fn neighborhood(
    store: &Store,
    start_id: &str,
    relation: Option<&str>,
    depth: u32,
) -> Result<Vec<Neighbor>, StorageError> {
    let mut visited: HashSet<String> = HashSet::from([start_id.to_string()]);
    let mut frontier: Vec<String> = vec![start_id.to_string()];
    let mut results: Vec<Neighbor> = Vec::new();

    for distance in 1..=depth {
        let mut next_frontier = Vec::new();
        for node_id in &frontier {
            for edge in store.out_edges(node_id, relation)? {
                if !visited.insert(edge.target_id.clone()) {
                    continue;
                }
                let node = store.node_by_id(&edge.target_id)?;
                results.push(Neighbor {
                    node_id: node.id.clone(),
                    label: node.label,
                    name: node.name,
                    properties: node.properties,
                    relation: edge.relation,
                    distance,
                    weight: edge.weight,
                });
                next_frontier.push(node.id);
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    Ok(results)
}

/// Bidirectional BFS for the shortest directed path from `start_id` to
/// `end_id`, at most `max_depth` edges, within `budget` wall-clock time.
///
/// Returns the node-id sequence of the shortest path, or `None` on miss or
/// timeout. The search keeps expanding past the first meeting point until no
/// shorter total is possible, so the returned path is minimal.
pub(crate) fn bidirectional_shortest_path(
    store: &Store,
    start_id: &str,
    end_id: &str,
    max_depth: u32,
    budget: Duration,
) -> Result<Option<Vec<String>>, StorageError> {
    let deadline = Instant::now() + budget;

    // parent pointers toward each origin, plus discovery depths
    let mut fw_parent: HashMap<String, Option<String>> =
        HashMap::from([(start_id.to_string(), None)]);
    let mut bw_parent: HashMap<String, Option<String>> =
        HashMap::from([(end_id.to_string(), None)]);
    let mut fw_depth_of: HashMap<String, u32> = HashMap::from([(start_id.to_string(), 0)]);
    let mut bw_depth_of: HashMap<String, u32> = HashMap::from([(end_id.to_string(), 0)]);

    let mut fw_frontier = vec![start_id.to_string()];
    let mut bw_frontier = vec![end_id.to_string()];
    let mut fw_depth = 0_u32;
    let mut bw_depth = 0_u32;

    // best meeting node and its total path length
    let mut best: Option<(u32, String)> = None;

    while !fw_frontier.is_empty() && !bw_frontier.is_empty() && fw_depth + bw_depth < max_depth {
        if let Some((best_total, _)) = &best {
            // Any further meet costs at least one more hop than the frontier sum.
            if fw_depth + bw_depth + 1 >= *best_total {
                break;
            }
        }
        if Instant::now() >= deadline {
            tracing::warn!(start = start_id, end = end_id, "Path search timed out");
            return Ok(None);
        }

        let expand_forward = fw_frontier.len() <= bw_frontier.len();
        if expand_forward {
            fw_depth += 1;
            let mut next = Vec::new();
            for node_id in std::mem::take(&mut fw_frontier) {
                for edge in store.out_edges(&node_id, None)? {
                    let target = edge.target_id;
                    if fw_parent.contains_key(&target) {
                        continue;
                    }
                    fw_parent.insert(target.clone(), Some(node_id.clone()));
                    fw_depth_of.insert(target.clone(), fw_depth);
                    if let Some(&other_depth) = bw_depth_of.get(&target) {
                        let total = fw_depth + other_depth;
                        if total <= max_depth
                            && best.as_ref().is_none_or(|(t, _)| total < *t)
                        {
                            best = Some((total, target.clone()));
                        }
                    }
                    next.push(target);
                }
            }
            fw_frontier = next;
        } else {
            bw_depth += 1;
            let mut next = Vec::new();
            for node_id in std::mem::take(&mut bw_frontier) {
                for edge in store.in_edges(&node_id)? {
                    let source = edge.source_id;
                    if bw_parent.contains_key(&source) {
                        continue;
                    }
                    bw_parent.insert(source.clone(), Some(node_id.clone()));
                    bw_depth_of.insert(source.clone(), bw_depth);
                    if let Some(&other_depth) = fw_depth_of.get(&source) {
                        let total = bw_depth + other_depth;
                        if total <= max_depth
                            && best.as_ref().is_none_or(|(t, _)| total < *t)
                        {
                            best = Some((total, source.clone()));
                        }
                    }
                    next.push(source);
                }
            }
            bw_frontier = next;
        }
    }

    let Some((_, meeting)) = best else {
        return Ok(None);
    };

    // start -> meeting via forward parents
    let mut path: Vec<String> = Vec::new();
    let mut cursor = Some(meeting.clone());
    while let Some(node) = cursor {
        cursor = fw_parent
            .get(&node)
            .cloned()
            .expect("forward chain reaches the start");
        path.push(node);
    }
    path.reverse();

    // meeting -> end via backward parents
    let mut cursor = bw_parent
        .get(&meeting)
        .cloned()
        .expect("meeting node is known to the backward search");
    while let Some(node) = cursor {
        cursor = bw_parent
            .get(&node)
            .cloned()
            .expect("backward chain reaches the end");
        path.push(node);
    }

    Ok(Some(path))
}
