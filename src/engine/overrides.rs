//! Time-limited remote overrides of node inputs and config.
//!
//! Overrides sit beside the graph rather than inside it: they are never
//! written into `input_values` or `config`, so when one expires or is
//! cleared the graph-driven value takes over again on the next tick.

use crate::engine::id::NodeId;
use crate::engine::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of a node an override replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Input,
    Config,
}

/// One override entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub value: Value,
    /// Host time the override was set or refreshed, in milliseconds.
    pub updated_at_ms: f64,
    /// Lifetime in milliseconds. `None` lasts until cleared.
    pub ttl_ms: Option<f64>,
}

impl Override {
    pub fn is_expired(&self, now_ms: f64) -> bool {
        self.ttl_ms
            .map(|ttl| now_ms - self.updated_at_ms >= ttl)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
struct NodeOverrides {
    inputs: HashMap<String, Override>,
    config: HashMap<String, Override>,
}

impl NodeOverrides {
    fn side(&self, kind: OverrideKind) -> &HashMap<String, Override> {
        match kind {
            OverrideKind::Input => &self.inputs,
            OverrideKind::Config => &self.config,
        }
    }

    fn side_mut(&mut self, kind: OverrideKind) -> &mut HashMap<String, Override> {
        match kind {
            OverrideKind::Input => &mut self.inputs,
            OverrideKind::Config => &mut self.config,
        }
    }

    fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.config.is_empty()
    }
}

/// Override store keyed by (node, kind, key).
#[derive(Debug, Clone, Default)]
pub struct OverrideStore {
    nodes: HashMap<NodeId, NodeOverrides>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh an override.
    pub fn set(
        &mut self,
        node_id: &NodeId,
        kind: OverrideKind,
        key: &str,
        value: Value,
        ttl_ms: Option<f64>,
        now_ms: f64,
    ) {
        self.nodes
            .entry(node_id.clone())
            .or_default()
            .side_mut(kind)
            .insert(
                key.to_string(),
                Override {
                    value,
                    updated_at_ms: now_ms,
                    ttl_ms,
                },
            );
    }

    /// Remove one override. Returns whether it existed.
    pub fn clear(&mut self, node_id: &str, kind: OverrideKind, key: &str) -> bool {
        let Some(entry) = self.nodes.get_mut(node_id) else {
            return false;
        };
        let removed = entry.side_mut(kind).remove(key).is_some();
        if entry.is_empty() {
            self.nodes.remove(node_id);
        }
        removed
    }

    /// Remove every override of a node.
    pub fn clear_node(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
    }

    pub fn clear_all(&mut self) {
        self.nodes.clear();
    }

    /// Drop every expired override. Returns how many were removed.
    pub fn expire(&mut self, now_ms: f64) -> usize {
        let mut removed = 0;
        for entry in self.nodes.values_mut() {
            for side in [&mut entry.inputs, &mut entry.config] {
                let before = side.len();
                side.retain(|_, o| !o.is_expired(now_ms));
                removed += before - side.len();
            }
        }
        self.nodes.retain(|_, entry| !entry.is_empty());
        if removed > 0 {
            tracing::debug!("Expired {} overrides", removed);
        }
        removed
    }

    pub fn get(&self, node_id: &str, kind: OverrideKind, key: &str) -> Option<&Override> {
        self.nodes.get(node_id).and_then(|e| e.side(kind).get(key))
    }

    pub fn input(&self, node_id: &str, port_id: &str) -> Option<&Value> {
        self.get(node_id, OverrideKind::Input, port_id)
            .map(|o| &o.value)
    }

    /// Base config with config overrides laid on top.
    pub fn effective_config(&self, node_id: &str, base: &ValueMap) -> ValueMap {
        let mut config = base.clone();
        if let Some(entry) = self.nodes.get(node_id) {
            for (key, o) in &entry.config {
                config.insert(key.clone(), o.value.clone());
            }
        }
        config
    }

    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .map(|e| e.inputs.len() + e.config.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
