//! Port descriptors for the node system.
//!
//! Each definition declares its ports (inputs/outputs) as `PortDescriptor`s.
//! The graph uses these to validate connections and the compiler uses the
//! port kind to decide which edges take part in ordering.

use crate::engine::value::Value;
use serde::{Deserialize, Serialize};

/// The semantic type of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Number,
    Boolean,
    String,
    Color,
    Audio,
    Image,
    Video,
    Asset,
    Scene,
    Effect,
    Client,
    Command,
    Any,
}

impl PortType {
    /// Media types that only ever connect to their own type.
    pub fn is_specialized(self) -> bool {
        matches!(
            self,
            PortType::Audio | PortType::Image | PortType::Video | PortType::Asset
        )
    }

    /// Types that carry manager-side routing rather than data.
    pub fn is_routing(self) -> bool {
        matches!(self, PortType::Client | PortType::Command)
    }

    /// Whether an output of type `self` may feed an input of type `other`.
    ///
    /// `Any` matches every non-specialized type; specialized types must
    /// match exactly.
    pub fn compatible_with(self, other: PortType) -> bool {
        if self == other {
            return true;
        }
        if self.is_specialized() || other.is_specialized() {
            return false;
        }
        self == PortType::Any || other == PortType::Any
    }
}

/// Whether an input takes part in value propagation or side-effect delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// Ordinary dependency, scheduled before the consumer.
    #[default]
    Compute,
    /// Side-effect delivery point, gathered after the compute pass.
    Sink,
}

/// Descriptor for one port of a node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub ty: PortType,
    #[serde(default)]
    pub kind: PortKind,
    /// Value used when the port is unconnected and nothing has been stored.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub default: Value,
}

impl PortDescriptor {
    pub fn compute(id: impl Into<String>, ty: PortType) -> Self {
        Self {
            id: id.into(),
            ty,
            kind: PortKind::Compute,
            default: Value::Null,
        }
    }

    pub fn sink(id: impl Into<String>, ty: PortType) -> Self {
        Self {
            id: id.into(),
            ty,
            kind: PortKind::Sink,
            default: Value::Null,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    #[inline]
    pub fn is_sink(&self) -> bool {
        self.kind == PortKind::Sink
    }
}

/// One entry of a definition's config schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    #[serde(rename = "type")]
    pub ty: PortType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub default: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_matches_plain_types() {
        assert!(PortType::Any.compatible_with(PortType::Number));
        assert!(PortType::Color.compatible_with(PortType::Any));
        assert!(PortType::Command.compatible_with(PortType::Command));
    }

    #[test]
    fn test_specialized_types_never_match_any() {
        assert!(!PortType::Audio.compatible_with(PortType::Any));
        assert!(!PortType::Any.compatible_with(PortType::Video));
        assert!(!PortType::Image.compatible_with(PortType::Video));
        assert!(PortType::Asset.compatible_with(PortType::Asset));
    }

    #[test]
    fn test_mismatched_plain_types() {
        assert!(!PortType::Number.compatible_with(PortType::String));
    }

    #[test]
    fn test_port_descriptor_deserialize_defaults_to_compute() {
        let port: PortDescriptor = serde_json::from_str(r#"{"id":"in","type":"number"}"#).unwrap();
        assert_eq!(port.kind, PortKind::Compute);
        assert!(port.default.is_null());

        let sink: PortDescriptor =
            serde_json::from_str(r#"{"id":"cmd","type":"command","kind":"sink"}"#).unwrap();
        assert!(sink.is_sink());
    }
}
