//! Graph model: node instances, connections and validated edits.
//!
//! The live `Graph` is single-owner. Every mutation goes through one of the
//! transactional operations below (or [`Graph::apply`] with a [`GraphEdit`]),
//! each of which validates before touching storage so a failed edit leaves
//! the graph unchanged. Topology edits bump the generation counter, which is
//! how the executor knows its compiled plan is stale.

use crate::config::LoadPolicy;
use crate::engine::catalog::Catalog;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::id::{ConnectionId, NodeId};
use crate::engine::node::NodeDefinition;
use crate::engine::port::{PortDescriptor, PortKind};
use crate::engine::value::{Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: ValueMap,
    /// Manually set or last resolved values for unconnected inputs.
    #[serde(default)]
    pub input_values: ValueMap,
    /// Outputs of the most recent compute pass.
    #[serde(default)]
    pub output_values: ValueMap,
}

impl NodeInstance {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: ValueMap::new(),
            input_values: ValueMap::new(),
            output_values: ValueMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_values.insert(port.into(), value.into());
        self
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_node_id: NodeId,
    pub source_port_id: String,
    pub target_node_id: NodeId,
    pub target_port_id: String,
}

impl Connection {
    pub fn new(
        id: impl Into<ConnectionId>,
        source: (impl Into<NodeId>, impl Into<String>),
        target: (impl Into<NodeId>, impl Into<String>),
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source.0.into(),
            source_port_id: source.1.into(),
            target_node_id: target.0.into(),
            target_port_id: target.1.into(),
        }
    }

    pub fn touches(&self, node_id: &NodeId) -> bool {
        &self.source_node_id == node_id || &self.target_node_id == node_id
    }
}

/// Versioned, JSON-serializable snapshot of a graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl GraphState {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// What a lenient load had to leave behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub skipped_nodes: Vec<NodeId>,
    pub dropped_connections: Vec<ConnectionId>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_nodes.is_empty() && self.dropped_connections.is_empty()
    }
}

/// A discrete, validated graph mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum GraphEdit {
    AddNode {
        node: NodeInstance,
    },
    #[serde(rename_all = "camelCase")]
    RemoveNode {
        node_id: NodeId,
    },
    AddConnection {
        connection: Connection,
    },
    #[serde(rename_all = "camelCase")]
    RemoveConnection {
        connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    SetConfig {
        node_id: NodeId,
        key: String,
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    SetInputValue {
        node_id: NodeId,
        port_id: String,
        value: Value,
    },
}

impl GraphEdit {
    /// Whether this edit changes nodes or connections (and so the plan).
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            GraphEdit::AddNode { .. }
                | GraphEdit::RemoveNode { .. }
                | GraphEdit::AddConnection { .. }
                | GraphEdit::RemoveConnection { .. }
        )
    }
}

/// The live node/connection graph.
#[derive(Debug, Clone)]
pub struct Graph {
    catalog: Catalog,
    nodes: IndexMap<NodeId, NodeInstance>,
    connections: IndexMap<ConnectionId, Connection>,
    /// Bumped on every topology edit.
    generation: u64,
    version: u64,
}

impl Graph {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
            generation: 0,
            version: 0,
        }
    }

    /// Build a graph from a snapshot.
    ///
    /// Connections whose endpoints (node or port) no longer exist are always
    /// dropped. Under [`LoadPolicy::Strict`] an unknown node type, duplicate
    /// id, occupied compute input or port type mismatch fails the whole
    /// load; under [`LoadPolicy::Lenient`] the offending item is skipped and
    /// recorded in the returned [`LoadReport`].
    pub fn load(
        catalog: Catalog,
        state: GraphState,
        policy: LoadPolicy,
    ) -> EngineResult<(Self, LoadReport)> {
        let mut graph = Graph::new(catalog);
        graph.version = state.version;
        let mut report = LoadReport::default();

        for node in state.nodes {
            let failure = if !graph.catalog.contains(&node.node_type) {
                Some(EngineError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                })
            } else if graph.nodes.contains_key(&node.id) {
                Some(EngineError::DuplicateNode(node.id.clone()))
            } else {
                None
            };

            match (failure, policy) {
                (None, _) => {
                    graph.nodes.insert(node.id.clone(), node);
                }
                (Some(err), LoadPolicy::Strict) => return Err(err),
                (Some(err), LoadPolicy::Lenient) => {
                    tracing::warn!("Skipping node on load: {}", err);
                    report.skipped_nodes.push(node.id);
                }
            }
        }

        for conn in state.connections {
            match graph.validate_connection(&conn) {
                Ok(()) => {
                    graph.connections.insert(conn.id.clone(), conn);
                }
                Err(err @ (EngineError::UnknownNode(_) | EngineError::UnknownPort { .. })) => {
                    tracing::warn!("Dropping stale connection {}: {}", conn.id, err);
                    report.dropped_connections.push(conn.id);
                }
                Err(err) => match policy {
                    LoadPolicy::Strict => return Err(err),
                    LoadPolicy::Lenient => {
                        tracing::warn!("Dropping invalid connection {}: {}", conn.id, err);
                        report.dropped_connections.push(conn.id);
                    }
                },
            }
        }

        tracing::info!(
            "Graph loaded: {} nodes, {} connections ({} skipped, {} dropped)",
            graph.nodes.len(),
            graph.connections.len(),
            report.skipped_nodes.len(),
            report.dropped_connections.len(),
        );

        Ok((graph, report))
    }

    // ── Accessors ──

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn definition(&self, node_type: &str) -> Option<&Arc<dyn NodeDefinition>> {
        self.catalog.get(node_type)
    }

    /// Definition of an existing node's type.
    pub fn definition_of(&self, node_id: &str) -> Option<&Arc<dyn NodeDefinition>> {
        self.node(node_id)
            .and_then(|n| self.catalog.get(&n.node_type))
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInstance> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeInstance> {
        self.nodes.get_mut(node_id)
    }

    /// Node at an insertion-order index.
    pub fn node_at(&self, index: usize) -> Option<&NodeInstance> {
        self.nodes.get_index(index).map(|(_, n)| n)
    }

    pub fn node_at_mut(&mut self, index: usize) -> Option<&mut NodeInstance> {
        self.nodes.get_index_mut(index).map(|(_, n)| n)
    }

    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.nodes.get_index_of(node_id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInstance> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeInstance> {
        self.nodes.values_mut()
    }

    /// Connections in insertion order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Declared target input of a connection, if both still exist.
    pub fn target_port(&self, conn: &Connection) -> Option<&PortDescriptor> {
        self.definition_of(conn.target_node_id.as_str())
            .and_then(|def| def.input(&conn.target_port_id))
    }

    /// Whether a connection feeds a sink input.
    pub fn is_sink_connection(&self, conn: &Connection) -> bool {
        self.target_port(conn)
            .map(|p| p.kind == PortKind::Sink)
            .unwrap_or(false)
    }

    /// Snapshot of the current graph.
    pub fn snapshot(&self) -> GraphState {
        GraphState {
            version: self.version,
            nodes: self.nodes.values().cloned().collect(),
            connections: self.connections.values().cloned().collect(),
        }
    }

    pub fn clear_outputs(&mut self) {
        for node in self.nodes.values_mut() {
            node.output_values.clear();
        }
    }

    // ── Validation ──

    /// Check a prospective connection against the current graph.
    pub fn validate_connection(&self, conn: &Connection) -> EngineResult<()> {
        if self.connections.contains_key(&conn.id) {
            return Err(EngineError::DuplicateConnection(conn.id.clone()));
        }

        let source_def = self
            .definition_of(conn.source_node_id.as_str())
            .ok_or_else(|| EngineError::UnknownNode(conn.source_node_id.clone()))?;
        let target_def = self
            .definition_of(conn.target_node_id.as_str())
            .ok_or_else(|| EngineError::UnknownNode(conn.target_node_id.clone()))?;

        let source_port = source_def.output(&conn.source_port_id).ok_or_else(|| {
            EngineError::UnknownPort {
                node_id: conn.source_node_id.clone(),
                port_id: conn.source_port_id.clone(),
                direction: "output",
            }
        })?;
        let target_port =
            target_def
                .input(&conn.target_port_id)
                .ok_or_else(|| EngineError::UnknownPort {
                    node_id: conn.target_node_id.clone(),
                    port_id: conn.target_port_id.clone(),
                    direction: "input",
                })?;

        if !source_port.ty.compatible_with(target_port.ty) {
            return Err(EngineError::PortTypeMismatch {
                id: conn.id.clone(),
                source_type: source_port.ty,
                target_type: target_port.ty,
            });
        }

        if target_port.kind == PortKind::Compute {
            if let Some(existing) = self.connections.values().find(|c| {
                c.target_node_id == conn.target_node_id && c.target_port_id == conn.target_port_id
            }) {
                return Err(EngineError::InputOccupied {
                    node_id: conn.target_node_id.clone(),
                    port_id: conn.target_port_id.clone(),
                    existing: existing.id.clone(),
                });
            }
        }

        Ok(())
    }

    // ── Transactions ──

    pub fn add_node(&mut self, node: NodeInstance) -> EngineResult<()> {
        if !self.catalog.contains(&node.node_type) {
            return Err(EngineError::UnknownNodeType {
                node_id: node.id,
                node_type: node.node_type,
            });
        }
        if self.nodes.contains_key(&node.id) {
            return Err(EngineError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        self.touch_topology();
        Ok(())
    }

    /// Remove a node together with every connection touching it.
    pub fn remove_node(&mut self, node_id: &str) -> EngineResult<NodeInstance> {
        let node = self
            .nodes
            .shift_remove(node_id)
            .ok_or_else(|| EngineError::UnknownNode(NodeId::from(node_id)))?;
        self.connections.retain(|_, c| !c.touches(&node.id));
        self.touch_topology();
        Ok(node)
    }

    pub fn add_connection(&mut self, conn: Connection) -> EngineResult<()> {
        self.validate_connection(&conn)?;
        self.connections.insert(conn.id.clone(), conn);
        self.touch_topology();
        Ok(())
    }

    pub fn remove_connection(&mut self, id: &str) -> EngineResult<Connection> {
        let conn = self
            .connections
            .shift_remove(id)
            .ok_or_else(|| EngineError::InvalidConnection {
                id: ConnectionId::from(id),
                message: "no such connection".to_string(),
            })?;
        self.touch_topology();
        Ok(conn)
    }

    pub fn set_config(&mut self, node_id: &str, key: &str, value: Value) -> EngineResult<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::UnknownNode(NodeId::from(node_id)))?;
        node.config.insert(key.to_string(), value);
        self.version += 1;
        Ok(())
    }

    pub fn set_input_value(&mut self, node_id: &str, port_id: &str, value: Value) -> EngineResult<()> {
        let has_port = self
            .definition_of(node_id)
            .ok_or_else(|| EngineError::UnknownNode(NodeId::from(node_id)))?
            .input(port_id)
            .is_some();
        if !has_port {
            return Err(EngineError::UnknownPort {
                node_id: NodeId::from(node_id),
                port_id: port_id.to_string(),
                direction: "input",
            });
        }
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.input_values.insert(port_id.to_string(), value);
        }
        self.version += 1;
        Ok(())
    }

    /// Apply one edit.
    pub fn apply(&mut self, edit: GraphEdit) -> EngineResult<()> {
        match edit {
            GraphEdit::AddNode { node } => self.add_node(node),
            GraphEdit::RemoveNode { node_id } => self.remove_node(node_id.as_str()).map(|_| ()),
            GraphEdit::AddConnection { connection } => self.add_connection(connection),
            GraphEdit::RemoveConnection { connection_id } => {
                self.remove_connection(connection_id.as_str()).map(|_| ())
            }
            GraphEdit::SetConfig {
                node_id,
                key,
                value,
            } => self.set_config(node_id.as_str(), &key, value),
            GraphEdit::SetInputValue {
                node_id,
                port_id,
                value,
            } => self.set_input_value(node_id.as_str(), &port_id, value),
        }
    }

    fn touch_topology(&mut self) {
        self.generation += 1;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::NodeSchema;
    use crate::engine::port::PortType;

    fn catalog() -> Catalog {
        Catalog::from_schemas(vec![
            NodeSchema {
                node_type: "number".to_string(),
                inputs: vec![PortDescriptor::compute("in", PortType::Number)],
                outputs: vec![PortDescriptor::compute("out", PortType::Number)],
                config: Vec::new(),
            },
            NodeSchema {
                node_type: "audio".to_string(),
                inputs: vec![],
                outputs: vec![PortDescriptor::compute("out", PortType::Audio)],
                config: Vec::new(),
            },
            NodeSchema {
                node_type: "light".to_string(),
                inputs: vec![
                    PortDescriptor::sink("cmd", PortType::Command),
                    PortDescriptor::compute("level", PortType::Any),
                ],
                outputs: vec![PortDescriptor::compute("cmd", PortType::Command)],
                config: Vec::new(),
            },
        ])
    }

    fn state() -> GraphState {
        GraphState {
            version: 3,
            nodes: vec![
                NodeInstance::new("a", "number"),
                NodeInstance::new("b", "number"),
                NodeInstance::new("ghost", "retired-type"),
            ],
            connections: vec![
                Connection::new("c1", ("a", "out"), ("b", "in")),
                Connection::new("c2", ("ghost", "out"), ("b", "in")),
            ],
        }
    }

    #[test]
    fn test_strict_load_rejects_unknown_type() {
        let err = Graph::load(catalog(), state(), LoadPolicy::Strict).unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType { ref node_type, .. } if node_type == "retired-type"));
    }

    #[test]
    fn test_lenient_load_skips_unknown_and_drops_dangling() {
        let (graph, report) = Graph::load(catalog(), state(), LoadPolicy::Lenient).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(report.skipped_nodes, vec![NodeId::from("ghost")]);
        assert_eq!(report.dropped_connections, vec![ConnectionId::from("c2")]);
    }

    #[test]
    fn test_strict_load_drops_stale_port_connections() {
        let mut s = state();
        s.nodes.pop();
        s.connections = vec![Connection::new("c1", ("a", "gone"), ("b", "in"))];
        let (graph, report) = Graph::load(catalog(), s, LoadPolicy::Strict).unwrap();
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(report.dropped_connections.len(), 1);
    }

    #[test]
    fn test_duplicate_compute_input_rejected_or_dropped() {
        let s = GraphState {
            version: 0,
            nodes: vec![
                NodeInstance::new("a", "number"),
                NodeInstance::new("b", "number"),
                NodeInstance::new("c", "number"),
            ],
            connections: vec![
                Connection::new("c1", ("a", "out"), ("c", "in")),
                Connection::new("c2", ("b", "out"), ("c", "in")),
            ],
        };
        let err = Graph::load(catalog(), s.clone(), LoadPolicy::Strict).unwrap_err();
        assert!(matches!(err, EngineError::InputOccupied { .. }));

        let (graph, report) = Graph::load(catalog(), s, LoadPolicy::Lenient).unwrap();
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(report.dropped_connections, vec![ConnectionId::from("c2")]);
    }

    #[test]
    fn test_sink_inputs_accept_many_connections() {
        let mut graph = Graph::new(catalog());
        graph.add_node(NodeInstance::new("l1", "light")).unwrap();
        graph.add_node(NodeInstance::new("l2", "light")).unwrap();
        graph.add_node(NodeInstance::new("out", "light")).unwrap();
        graph
            .add_connection(Connection::new("c1", ("l1", "cmd"), ("out", "cmd")))
            .unwrap();
        graph
            .add_connection(Connection::new("c2", ("l2", "cmd"), ("out", "cmd")))
            .unwrap();
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn test_specialized_type_cannot_feed_any() {
        let mut graph = Graph::new(catalog());
        graph.add_node(NodeInstance::new("clip", "audio")).unwrap();
        graph.add_node(NodeInstance::new("l", "light")).unwrap();
        let err = graph
            .add_connection(Connection::new("c1", ("clip", "out"), ("l", "level")))
            .unwrap_err();
        assert!(matches!(err, EngineError::PortTypeMismatch { .. }));
        assert_eq!(graph.connection_count(), 0);
    }

    #[test]
    fn test_remove_node_removes_touching_connections() {
        let (mut graph, _) = Graph::load(catalog(), state(), LoadPolicy::Lenient).unwrap();
        let gen = graph.generation();
        graph.remove_node("a").unwrap();
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.generation() > gen);
    }

    #[test]
    fn test_non_topology_edit_keeps_generation() {
        let (mut graph, _) = Graph::load(catalog(), state(), LoadPolicy::Lenient).unwrap();
        let gen = graph.generation();
        graph
            .apply(GraphEdit::SetInputValue {
                node_id: NodeId::from("a"),
                port_id: "in".to_string(),
                value: Value::from(4.0),
            })
            .unwrap();
        assert_eq!(graph.generation(), gen);
        assert_eq!(graph.node("a").unwrap().input_values["in"], Value::from(4.0));
    }

    #[test]
    fn test_graph_state_json_round_trip() {
        let (graph, _) = Graph::load(catalog(), state(), LoadPolicy::Lenient).unwrap();
        let json = graph.snapshot().to_json().unwrap();
        assert!(json.contains("\"sourceNodeId\""));
        assert!(json.contains("\"type\": \"number\""));
        let back = GraphState::from_json(&json).unwrap();
        assert_eq!(back, graph.snapshot());
    }

    #[test]
    fn test_graph_edit_json_tagging() {
        let edit: GraphEdit =
            serde_json::from_str(r#"{"op":"removeNode","nodeId":"a"}"#).unwrap();
        assert_eq!(
            edit,
            GraphEdit::RemoveNode {
                node_id: NodeId::from("a")
            }
        );
        assert!(edit.is_topology());
    }
}
