//! Graph reads over the relationship table: chain traversal, path search
//! and shared-neighbor correlation. Each function works on a single
//! connection and queries adjacency lazily, one node at a time.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rusqlite::Connection;

use crate::memory_db::relationship_store::edges_touching;
use crate::memory_db::schema::*;

/// Upper bound on the number of paths `find_paths` collects.
pub const MAX_PATHS: usize = 100;

/// Breadth-first walk from `start_id`. Forward follows outgoing edges,
/// backward follows incoming ones. Edges below `min_strength` or outside
/// `rel_types` (empty means any) are pruned before expansion. Each node is
/// reported once at its shallowest depth, ordered by depth, then edge
/// strength descending, then id. The start node only appears if a cycle
/// leads back to it.
pub fn traverse_chain(
    conn: &Connection,
    start_id: &str,
    direction: ChainDirection,
    rel_types: &[RelationshipType],
    max_depth: usize,
    min_strength: f64,
) -> rusqlite::Result<Vec<ChainNode>> {
    let edge_direction = match direction {
        ChainDirection::Forward => Direction::Outgoing,
        ChainDirection::Backward => Direction::Incoming,
    };

    let mut reported: HashSet<String> = HashSet::new();
    let mut chain = Vec::new();
    let mut frontier = vec![start_id.to_string()];

    for depth in 1..=max_depth {
        if frontier.is_empty() {
            break;
        }

        // Strongest edge into each newly discovered node at this depth.
        let mut level: HashMap<String, (String, Relationship)> = HashMap::new();
        for node in &frontier {
            for edge in edges_touching(conn, node, edge_direction, min_strength)? {
                if !rel_types.is_empty() && !rel_types.contains(&edge.rel_type) {
                    continue;
                }
                let next = edge.other_end(node).to_string();
                if reported.contains(&next) {
                    continue;
                }
                let keep = match level.get(&next) {
                    Some((_, existing)) => edge.strength > existing.strength,
                    None => true,
                };
                if keep {
                    level.insert(next, (node.clone(), edge));
                }
            }
        }

        let mut discovered: Vec<(String, String, Relationship)> = level
            .into_iter()
            .map(|(id, (parent, edge))| (id, parent, edge))
            .collect();
        discovered.sort_by(|a, b| b.2.strength.total_cmp(&a.2.strength).then_with(|| a.0.cmp(&b.0)));

        frontier = Vec::with_capacity(discovered.len());
        for (memory_id, parent_id, relationship) in discovered {
            reported.insert(memory_id.clone());
            if memory_id != start_id {
                frontier.push(memory_id.clone());
            }
            chain.push(ChainNode {
                memory_id,
                depth,
                parent_id,
                relationship,
            });
        }
    }

    Ok(chain)
}

/// All simple paths from `source_id` to `target_id` along outgoing edges
/// with at most `max_depth` edges, shortest first. Parallel edges of
/// different types between the same nodes yield one path.
pub fn find_paths(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    max_depth: usize,
) -> rusqlite::Result<Vec<Vec<String>>> {
    if source_id == target_id {
        return Ok(vec![vec![source_id.to_string()]]);
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut paths = Vec::new();
    let mut path = vec![source_id.to_string()];
    let mut on_path: HashSet<String> = HashSet::from([source_id.to_string()]);

    dfs(
        conn,
        target_id,
        max_depth,
        &mut adjacency,
        &mut path,
        &mut on_path,
        &mut paths,
    )?;

    paths.sort_by(|a: &Vec<String>, b: &Vec<String>| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Ok(paths)
}

fn dfs(
    conn: &Connection,
    target_id: &str,
    max_depth: usize,
    adjacency: &mut HashMap<String, Vec<String>>,
    path: &mut Vec<String>,
    on_path: &mut HashSet<String>,
    paths: &mut Vec<Vec<String>>,
) -> rusqlite::Result<()> {
    if paths.len() >= MAX_PATHS || path.len() > max_depth {
        return Ok(());
    }

    let current = match path.last() {
        Some(node) => node.clone(),
        None => return Ok(()),
    };
    let neighbors = match adjacency.get(&current) {
        Some(n) => n.clone(),
        None => {
            let mut seen = BTreeSet::new();
            let mut ordered = Vec::new();
            for edge in edges_touching(conn, &current, Direction::Outgoing, 0.0)? {
                if seen.insert(edge.target_id.clone()) {
                    ordered.push(edge.target_id);
                }
            }
            adjacency.insert(current.clone(), ordered.clone());
            ordered
        }
    };

    for next in neighbors {
        if on_path.contains(&next) {
            continue;
        }
        path.push(next.clone());
        if next == target_id {
            paths.push(path.clone());
        } else {
            on_path.insert(next.clone());
            dfs(conn, target_id, max_depth, adjacency, path, on_path, paths)?;
            on_path.remove(&next);
        }
        path.pop();
        if paths.len() >= MAX_PATHS {
            break;
        }
    }
    Ok(())
}

/// Pairs from `memory_ids` sharing at least `min_shared_connections`
/// one-hop neighbors, ignoring edge type and direction. Per neighbor the
/// strongest edge to each side counts. Sorted by shared count, then total
/// strength, then ids.
pub fn correlation_candidates(
    conn: &Connection,
    memory_ids: &[String],
    min_shared_connections: usize,
) -> rusqlite::Result<Vec<CorrelationCandidate>> {
    let threshold = min_shared_connections.max(1);
    let ids: BTreeSet<&str> = memory_ids.iter().map(String::as_str).collect();
    let ids: Vec<&str> = ids.into_iter().collect();

    let mut neighborhoods: HashMap<&str, BTreeMap<String, f64>> = HashMap::with_capacity(ids.len());
    for id in &ids {
        let mut neighbors: BTreeMap<String, f64> = BTreeMap::new();
        for edge in edges_touching(conn, id, Direction::Both, 0.0)? {
            let other = edge.other_end(id).to_string();
            let strongest = neighbors.entry(other).or_insert(0.0);
            if edge.strength > *strongest {
                *strongest = edge.strength;
            }
        }
        neighborhoods.insert(*id, neighbors);
    }

    let mut candidates = Vec::new();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            let (Some(na), Some(nb)) = (neighborhoods.get(a), neighborhoods.get(b)) else {
                continue;
            };

            let mut shared_neighbors = Vec::new();
            let mut path_strengths = Vec::new();
            let mut total_strength = 0.0;
            for (neighbor, sa) in na {
                if neighbor == a || neighbor == b {
                    continue;
                }
                if let Some(sb) = nb.get(neighbor) {
                    shared_neighbors.push(neighbor.clone());
                    path_strengths.push((sa + sb) / 2.0);
                    total_strength += sa + sb;
                }
            }

            if shared_neighbors.len() >= threshold {
                candidates.push(CorrelationCandidate {
                    memory_a: a.to_string(),
                    memory_b: b.to_string(),
                    shared_connections: shared_neighbors.len(),
                    total_strength,
                    shared_neighbors,
                    path_strengths,
                });
            }
        }
    }

    candidates.sort_by(|x, y| {
        y.shared_connections
            .cmp(&x.shared_connections)
            .then_with(|| y.total_strength.total_cmp(&x.total_strength))
            .then_with(|| x.memory_a.cmp(&y.memory_a))
            .then_with(|| x.memory_b.cmp(&y.memory_b))
    });
    Ok(candidates)
}
