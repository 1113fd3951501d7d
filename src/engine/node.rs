//! Node definition contract.
//!
//! A definition is registered once per node type and shared by every
//! instance of that type. It is split into a required pure `process` step
//! and two optional effectful capabilities:
//!
//! - **`SinkHook`**: delivers side effects once sink inputs are gathered.
//! - **`DisableHook`**: cleanup on a disable transition, sink unplug or stop.
//!
//! The executor asks for each capability at dispatch time through
//! [`NodeDefinition::sink`] and [`NodeDefinition::disable`].

use crate::engine::error::NodeError;
use crate::engine::id::NodeId;
use crate::engine::port::{ConfigField, PortDescriptor};
use crate::engine::value::ValueMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Context passed to node hooks each tick.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    /// Instance the hook is running for.
    pub node_id: &'a NodeId,
    /// Monotonic tick counter since the last start.
    pub tick: u64,
    /// Host time of this tick, in milliseconds.
    pub time_ms: f64,
    /// Time since the previous tick, in milliseconds.
    pub dt_ms: f64,
}

/// Pure value computation plus declared ports for one node type.
pub trait NodeDefinition: Send + Sync {
    /// Type string instances refer to.
    fn node_type(&self) -> &str;

    /// Ordered input ports.
    fn inputs(&self) -> &[PortDescriptor];

    /// Ordered output ports.
    fn outputs(&self) -> &[PortDescriptor];

    /// Config field schema.
    fn config_schema(&self) -> &[ConfigField] {
        &[]
    }

    /// Compute outputs from resolved inputs and effective config.
    fn process(
        &self,
        inputs: &ValueMap,
        config: &ValueMap,
        ctx: &NodeContext,
    ) -> Result<ValueMap, NodeError>;

    /// Side-effect capability, if this type has one.
    fn sink(&self) -> Option<&dyn SinkHook> {
        None
    }

    /// Cleanup capability, if this type has one.
    fn disable(&self) -> Option<&dyn DisableHook> {
        None
    }

    fn input(&self, port_id: &str) -> Option<&PortDescriptor> {
        self.inputs().iter().find(|p| p.id == port_id)
    }

    fn output(&self, port_id: &str) -> Option<&PortDescriptor> {
        self.outputs().iter().find(|p| p.id == port_id)
    }

    fn has_sink_inputs(&self) -> bool {
        self.inputs().iter().any(PortDescriptor::is_sink)
    }
}

/// Effectful delivery of sink inputs (commands to devices, audio, ...).
pub trait SinkHook: Send + Sync {
    fn on_sink(&self, inputs: &ValueMap, config: &ValueMap, ctx: &NodeContext)
        -> Result<(), NodeError>;
}

/// Cleanup fired once per disable transition.
pub trait DisableHook: Send + Sync {
    fn on_disable(
        &self,
        inputs: &ValueMap,
        config: &ValueMap,
        ctx: &NodeContext,
    ) -> Result<(), NodeError>;
}

/// Run a node hook, turning a panic into a `NodeError`.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, NodeError>) -> Result<T, NodeError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(NodeError::new(format!("panicked: {}", message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::port::PortType;

    struct Doubler {
        inputs: Vec<PortDescriptor>,
        outputs: Vec<PortDescriptor>,
    }

    impl NodeDefinition for Doubler {
        fn node_type(&self) -> &str {
            "double"
        }
        fn inputs(&self) -> &[PortDescriptor] {
            &self.inputs
        }
        fn outputs(&self) -> &[PortDescriptor] {
            &self.outputs
        }
        fn process(
            &self,
            inputs: &ValueMap,
            _config: &ValueMap,
            _ctx: &NodeContext,
        ) -> Result<ValueMap, NodeError> {
            let x = inputs.get("in").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(ValueMap::from([("out".to_string(), (x * 2.0).into())]))
        }
    }

    #[test]
    fn test_default_capabilities_absent() {
        let def = Doubler {
            inputs: vec![PortDescriptor::compute("in", PortType::Number)],
            outputs: vec![PortDescriptor::compute("out", PortType::Number)],
        };
        assert!(def.sink().is_none());
        assert!(def.disable().is_none());
        assert!(!def.has_sink_inputs());
        assert!(def.input("in").is_some());
        assert!(def.output("missing").is_none());
    }

    #[test]
    fn test_guarded_converts_panic() {
        let result: Result<(), NodeError> = guarded(|| panic!("boom"));
        assert_eq!(result, Err(NodeError::new("panicked: boom")));
    }

    #[test]
    fn test_guarded_passes_through_results() {
        assert_eq!(guarded(|| Ok(3)), Ok(3));
        let err: Result<(), NodeError> = guarded(|| Err(NodeError::new("bad input")));
        assert_eq!(err, Err(NodeError::new("bad input")));
    }
}
