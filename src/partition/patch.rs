//! Patch export: an acyclic subgraph rooted at output nodes.
//!
//! The walk goes backward from the roots along incoming connections. Inputs
//! typed `client` or `command` are manager-side routing and are not followed,
//! and manager-only node types never enter the patch.

use super::{short_hash, PartitionError, PartitionPolicy, PartitionResult};
use crate::engine::catalog::Catalog;
use crate::engine::graph::{Connection, GraphState, NodeInstance};
use crate::engine::id::NodeId;
use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

static ASSET_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"asset:[A-Za-z0-9][A-Za-z0-9._/-]*").unwrap());

/// A deployable patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchExport {
    /// `patch:<hash>` over the sorted member ids (and sorted roots when
    /// there is more than one).
    pub id: String,
    pub roots: Vec<NodeId>,
    pub graph: GraphState,
    /// Asset references in first-appearance order.
    pub asset_refs: Vec<String>,
}

/// Output nodes a patch can be rooted at, in graph order.
pub fn patch_roots(state: &GraphState, policy: &PartitionPolicy) -> Vec<NodeId> {
    state
        .nodes
        .iter()
        .filter(|n| policy.root_types.contains(&n.node_type))
        .map(|n| n.id.clone())
        .collect()
}

/// Whether a connection feeds a routing input that the walk must not follow.
fn is_routing_input(catalog: &Catalog, target: &NodeInstance, conn: &Connection) -> bool {
    catalog
        .get(&target.node_type)
        .and_then(|def| def.input(&conn.target_port_id))
        .map(|port| port.ty.is_routing())
        .unwrap_or(false)
}

/// Export the patch rooted at `roots`.
pub fn export_patch(
    state: &GraphState,
    catalog: &Catalog,
    roots: &[NodeId],
    policy: &PartitionPolicy,
) -> PartitionResult<PatchExport> {
    if roots.is_empty() {
        return Err(PartitionError::NoRoots);
    }

    let index: HashMap<&NodeId, usize> = state
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (&n.id, i))
        .collect();

    let mut members: IndexSet<usize> = IndexSet::new();
    let mut queue = VecDeque::new();
    for root in roots {
        let &i = index
            .get(root)
            .ok_or_else(|| PartitionError::UnknownNode(root.clone()))?;
        if !policy.root_types.contains(&state.nodes[i].node_type) {
            return Err(PartitionError::NotARoot(root.clone()));
        }
        if members.insert(i) {
            queue.push_back(i);
        }
    }

    let mut connections: Vec<&Connection> = Vec::new();
    while let Some(v) = queue.pop_front() {
        let target = &state.nodes[v];
        for conn in state.connections.iter().filter(|c| c.target_node_id == target.id) {
            if is_routing_input(catalog, target, conn) {
                continue;
            }
            let Some(&source) = index.get(&conn.source_node_id) else {
                continue;
            };
            if policy
                .manager_only_types
                .contains(&state.nodes[source].node_type)
            {
                continue;
            }
            connections.push(conn);
            if members.insert(source) {
                queue.push_back(source);
            }
        }
    }

    let nodes: Vec<&NodeInstance> = members.iter().map(|&i| &state.nodes[i]).collect();
    for node in &nodes {
        if !policy.deployable_types.contains(&node.node_type) {
            return Err(policy.not_deployable(&node.id, &node.node_type));
        }
    }

    let mut asset_refs: IndexSet<String> = IndexSet::new();
    for node in &nodes {
        for value in node.config.values().chain(node.input_values.values()) {
            value.visit_strings(&mut |s| {
                for m in ASSET_REF.find_iter(s) {
                    asset_refs.insert(m.as_str().to_string());
                }
            });
        }
    }

    check_acyclic(&nodes, &connections)?;

    let mut member_ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    member_ids.sort_unstable();
    let mut sorted_roots: Vec<&str> = roots.iter().map(NodeId::as_str).collect();
    sorted_roots.sort_unstable();
    sorted_roots.dedup();
    let hash = if sorted_roots.len() > 1 {
        short_hash(
            member_ids
                .iter()
                .copied()
                .chain(std::iter::once("#roots"))
                .chain(sorted_roots.iter().copied()),
        )
    } else {
        short_hash(member_ids.iter().copied())
    };

    // Connections were collected per target in walk order; keep graph order.
    let graph = GraphState {
        version: state.version,
        nodes: nodes
            .iter()
            .map(|n| {
                let mut n = (*n).clone();
                n.output_values.clear();
                n
            })
            .collect(),
        connections: state
            .connections
            .iter()
            .filter(|c| connections.iter().any(|kept| kept.id == c.id))
            .cloned()
            .collect(),
    };

    tracing::info!(
        "Exported patch {} ({} nodes, {} assets)",
        hash,
        graph.nodes.len(),
        asset_refs.len()
    );

    Ok(PatchExport {
        id: format!("patch:{}", hash),
        roots: roots.to_vec(),
        graph,
        asset_refs: asset_refs.into_iter().collect(),
    })
}

/// Kahn over the kept connections; leftovers form a cycle.
fn check_acyclic(nodes: &[&NodeInstance], connections: &[&Connection]) -> PartitionResult<()> {
    let position: HashMap<&NodeId, usize> =
        nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();
    let mut in_degree = vec![0usize; nodes.len()];
    let mut adj = vec![Vec::new(); nodes.len()];
    for conn in connections {
        if let (Some(&from), Some(&to)) = (
            position.get(&conn.source_node_id),
            position.get(&conn.target_node_id),
        ) {
            adj[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut seen = 0;
    while let Some(v) = queue.pop_front() {
        seen += 1;
        for &w in &adj[v] {
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    if seen == nodes.len() {
        Ok(())
    } else {
        let stuck = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].id.clone())
            .collect();
        Err(PartitionError::Cyclic(stuck))
    }
}
