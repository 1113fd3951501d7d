//! Engine-specific error types.

use crate::engine::id::{ConnectionId, NodeId};
use crate::engine::port::PortType;
use thiserror::Error;

/// Errors surfaced synchronously by graph loading, editing and compilation.
///
/// Per-node runtime failures never reach the caller of `tick`; they are
/// logged against the node and the tick carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown node type '{node_type}' for node {node_id}")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    #[error("Duplicate node id {0}")]
    DuplicateNode(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {node_id} has no {direction} port '{port_id}'")]
    UnknownPort {
        node_id: NodeId,
        port_id: String,
        direction: &'static str,
    },

    #[error("Invalid connection {id}: {message}")]
    InvalidConnection { id: ConnectionId, message: String },

    #[error("Duplicate connection id {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Input {node_id}.{port_id} is already connected by {existing}")]
    InputOccupied {
        node_id: NodeId,
        port_id: String,
        existing: ConnectionId,
    },

    #[error("Port type mismatch on {id}: {source_type:?} cannot feed {target_type:?}")]
    PortTypeMismatch {
        id: ConnectionId,
        source_type: PortType,
        target_type: PortType,
    },

    #[error("Cycle detected among compute connections involving: {}", format_ids(.0))]
    Cycle(Vec<NodeId>),

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by a node definition hook.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_nodes() {
        let err = EngineError::Cycle(vec![NodeId::from("a"), NodeId::from("b")]);
        assert_eq!(
            err.to_string(),
            "Cycle detected among compute connections involving: a, b"
        );
    }

    #[test]
    fn test_input_occupied_display() {
        let err = EngineError::InputOccupied {
            node_id: NodeId::from("mix"),
            port_id: "in".to_string(),
            existing: ConnectionId::from("c1"),
        };
        assert!(err.to_string().contains("mix.in"));
        assert!(err.to_string().contains("c1"));
    }
}
