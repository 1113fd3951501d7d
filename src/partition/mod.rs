//! Graph partitioning for device-side execution.
//!
//! Two independent analyses over a point-in-time [`GraphState`]:
//!
//! - **Local loops** ([`local_loop`]): strongly connected sensor → actuator
//!   cycles bound to a single device, which can run on that device without a
//!   round trip through the manager.
//! - **Patches** ([`patch`]): acyclic subgraphs rooted at an output node,
//!   deployable wholesale to one device.
//!
//! Which node types mean what is held in a [`PartitionPolicy`], so hosts with
//! their own node catalogs can supply their own lists.
//!
//! [`GraphState`]: crate::engine::GraphState

pub mod local_loop;
pub mod patch;

pub use local_loop::{detect_local_loops, export_loop, LocalLoop};
pub use patch::{export_patch, patch_roots, PatchExport};

use crate::engine::id::NodeId;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Partitioning failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartitionError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {node_id} has type '{node_type}', which cannot run on a device{hint}")]
    NotDeployable {
        node_id: NodeId,
        node_type: String,
        hint: String,
    },

    #[error("No output nodes to export from")]
    NoRoots,

    #[error("Node {0} is not an output node")]
    NotARoot(NodeId),

    #[error("Patch contains a cycle involving: {}", format_ids(.0))]
    Cyclic(Vec<NodeId>),
}

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type PartitionResult<T> = std::result::Result<T, PartitionError>;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Node-type vocabulary used by both analyses.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPolicy {
    /// The device (client) node type. A loop binds exactly one.
    pub device_type: String,
    /// The device sensor node type. A loop needs at least one.
    pub sensor_type: String,
    /// Node type → capability tag a device must offer.
    pub capabilities: BTreeMap<String, String>,
    /// Types allowed inside an exported loop.
    pub loop_types: BTreeSet<String>,
    /// Types allowed inside an exported patch.
    pub deployable_types: BTreeSet<String>,
    /// Types that only make sense on the manager (control surfaces etc.).
    pub manager_only_types: BTreeSet<String>,
    /// Output node types a patch can be rooted at.
    pub root_types: BTreeSet<String>,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        let capabilities = [
            ("client-sensors", "sensors"),
            ("flashlight", "flashlight"),
            ("screen-color", "screen"),
            ("audio-out", "sound"),
            ("synth", "sound"),
            ("image-out", "visual"),
            ("video-out", "visual"),
            ("scene-out", "visual"),
            ("effect-out", "visual"),
        ]
        .into_iter()
        .map(|(t, c)| (t.to_string(), c.to_string()))
        .collect();

        Self {
            device_type: "client".to_string(),
            sensor_type: "client-sensors".to_string(),
            capabilities,
            loop_types: set(&[
                "client",
                "client-sensors",
                "flashlight",
                "screen-color",
                "synth",
                "audio-out",
                "number",
                "boolean",
                "math",
                "logic",
                "compare",
                "switch",
                "remap",
                "smooth",
                "lfo",
                "color",
            ]),
            deployable_types: set(&[
                "number",
                "boolean",
                "string",
                "color",
                "math",
                "logic",
                "compare",
                "switch",
                "remap",
                "smooth",
                "lfo",
                "synth",
                "audio-player",
                "audio-effect",
                "audio-out",
                "image-player",
                "image-out",
                "video-player",
                "video-out",
                "scene",
                "scene-out",
                "effect",
                "effect-out",
            ]),
            manager_only_types: set(&["midi-input", "osc-input", "control-surface"]),
            root_types: set(&[
                "audio-out",
                "image-out",
                "video-out",
                "effect-out",
                "scene-out",
            ]),
        }
    }
}

impl PartitionPolicy {
    /// Capability tag for a node type, if it needs one.
    pub fn capability(&self, node_type: &str) -> Option<&str> {
        self.capabilities.get(node_type).map(String::as_str)
    }

    /// Error for a node type outside an allow-list.
    fn not_deployable(&self, node_id: &NodeId, node_type: &str) -> PartitionError {
        let hint = if node_type == self.device_type {
            " (client nodes route commands on the manager; wire the patch output to a \
             device instead of including the client node)"
                .to_string()
        } else {
            String::new()
        };
        PartitionError::NotDeployable {
            node_id: node_id.clone(),
            node_type: node_type.to_string(),
            hint,
        }
    }
}

/// First 12 hex digits of the SHA-256 of the parts, newline separated.
pub(crate) fn short_hash<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}
