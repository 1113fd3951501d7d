//! Local-loop detection.
//!
//! A local loop is a strongly connected component binding exactly one device
//! node to at least one of its sensors. Every connection counts here, sink
//! edges included: a loop that can run on the device must be a true cycle
//! through the actuator, which the compiler deliberately does not see.

use super::{short_hash, PartitionPolicy, PartitionResult};
use crate::engine::graph::{Connection, GraphState, NodeInstance};
use crate::engine::id::NodeId;
use crate::partition::PartitionError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A sensor → actuator loop eligible for device-local execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalLoop {
    /// `loop:<device node id>:<hash of sorted member ids>`
    pub id: String,
    pub device_node_id: NodeId,
    /// Member ids, sorted.
    pub node_ids: Vec<NodeId>,
    /// Capability tags the device must offer.
    pub capabilities: BTreeSet<String>,
}

/// Find every local loop in a snapshot, sorted by id.
pub fn detect_local_loops(state: &GraphState, policy: &PartitionPolicy) -> Vec<LocalLoop> {
    let index: HashMap<&str, usize> = state
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut adj = vec![Vec::new(); state.nodes.len()];
    let mut self_edge = vec![false; state.nodes.len()];
    for conn in &state.connections {
        let (Some(&from), Some(&to)) = (
            index.get(conn.source_node_id.as_str()),
            index.get(conn.target_node_id.as_str()),
        ) else {
            continue;
        };
        adj[from].push(to);
        if from == to {
            self_edge[from] = true;
        }
    }

    let mut loops: Vec<LocalLoop> = strongly_connected(&adj)
        .into_iter()
        .filter(|component| component.len() > 1 || self_edge[component[0]])
        .filter_map(|component| {
            let members: Vec<&NodeInstance> = component.iter().map(|&i| &state.nodes[i]).collect();
            as_local_loop(&members, policy)
        })
        .collect();

    loops.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!("Found {} local loops", loops.len());
    loops
}

fn as_local_loop(members: &[&NodeInstance], policy: &PartitionPolicy) -> Option<LocalLoop> {
    let mut devices = members.iter().filter(|n| n.node_type == policy.device_type);
    let device = devices.next()?;
    if devices.next().is_some() {
        return None;
    }
    if !members.iter().any(|n| n.node_type == policy.sensor_type) {
        return None;
    }

    let mut node_ids: Vec<NodeId> = members.iter().map(|n| n.id.clone()).collect();
    node_ids.sort();
    let capabilities = members
        .iter()
        .filter_map(|n| policy.capability(&n.node_type))
        .map(str::to_string)
        .collect();
    let hash = short_hash(node_ids.iter().map(NodeId::as_str));

    Some(LocalLoop {
        id: format!("loop:{}:{}", device.id, hash),
        device_node_id: device.id.clone(),
        node_ids,
        capabilities,
    })
}

/// Tarjan's algorithm with an explicit work stack.
///
/// Each work item is `(node, next neighbor to look at)`; a child's lowlink is
/// folded into its parent when the child finishes.
fn strongly_connected(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adj.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut counter = 0;
    let mut work: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        work.push((root, 0));

        while let Some((v, start)) = work.pop() {
            if index[v] == UNVISITED {
                index[v] = counter;
                lowlink[v] = counter;
                counter += 1;
                stack.push(v);
                on_stack[v] = true;
            }

            let mut descended = false;
            for (j, &w) in adj[v].iter().enumerate().skip(start) {
                if index[w] == UNVISITED {
                    work.push((v, j + 1));
                    work.push((w, 0));
                    descended = true;
                    break;
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            }
            if descended {
                continue;
            }

            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }

            if let Some(&(parent, _)) = work.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
        }
    }

    components
}

/// Extract a loop as a standalone graph for the device.
///
/// Every member type is checked against the loop allow-list; outputs are
/// stripped since they belong to the manager's run.
pub fn export_loop(
    state: &GraphState,
    local_loop: &LocalLoop,
    policy: &PartitionPolicy,
) -> PartitionResult<GraphState> {
    let members: HashSet<&NodeId> = local_loop.node_ids.iter().collect();
    let mut nodes = Vec::with_capacity(members.len());

    for id in &local_loop.node_ids {
        let node = state
            .nodes
            .iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| PartitionError::UnknownNode(id.clone()))?;
        if !policy.loop_types.contains(&node.node_type) {
            return Err(policy.not_deployable(&node.id, &node.node_type));
        }
        let mut node = node.clone();
        node.output_values.clear();
        nodes.push(node);
    }

    let connections: Vec<Connection> = state
        .connections
        .iter()
        .filter(|c| members.contains(&c.source_node_id) && members.contains(&c.target_node_id))
        .cloned()
        .collect();

    tracing::info!(
        "Exported loop {} ({} nodes, {} connections)",
        local_loop.id,
        nodes.len(),
        connections.len()
    );

    Ok(GraphState {
        version: state.version,
        nodes,
        connections,
    })
}
