//! Scripted node definitions shared by the integration tests

use serde_json::json;
use stagegraph::engine::{
    Catalog, DisableHook, NodeContext, NodeDefinition, NodeError, PortDescriptor, PortType,
    SinkHook, Value, ValueMap,
};
use std::sync::{Arc, Mutex};

/// Shared log that hooks append to.
pub type Recorder = Arc<Mutex<Vec<String>>>;

pub fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(recorder: &Recorder) -> Vec<String> {
    recorder.lock().unwrap().clone()
}

fn single(port: &str, value: Value) -> ValueMap {
    ValueMap::from([(port.to_string(), value)])
}

fn command(action: &str, mode: &str) -> Value {
    Value::from(json!({"action": action, "payload": {"mode": mode}}))
}

/// `number`: emits its `value` config on `value`.
pub struct NumberSource {
    outputs: Vec<PortDescriptor>,
}

impl NumberSource {
    pub fn new() -> Self {
        Self {
            outputs: vec![PortDescriptor::compute("value", PortType::Number)],
        }
    }
}

impl NodeDefinition for NumberSource {
    fn node_type(&self) -> &str {
        "number"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &[]
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, _: &ValueMap, config: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        let value = config.get("value").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(single("value", value.into()))
    }
}

/// `gain`: `out = in * gain`. Records its disables.
pub struct Gain {
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
    recorder: Recorder,
}

impl Gain {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            inputs: vec![PortDescriptor::compute("in", PortType::Number).with_default(0.0)],
            outputs: vec![PortDescriptor::compute("out", PortType::Number)],
            recorder,
        }
    }
}

impl NodeDefinition for Gain {
    fn node_type(&self) -> &str {
        "gain"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, inputs: &ValueMap, config: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        let x = inputs.get("in").and_then(Value::as_f64).unwrap_or(0.0);
        let gain = config.get("gain").and_then(Value::as_f64).unwrap_or(1.0);
        Ok(single("out", (x * gain).into()))
    }
    fn disable(&self) -> Option<&dyn DisableHook> {
        Some(self)
    }
}

impl DisableHook for Gain {
    fn on_disable(&self, _: &ValueMap, _: &ValueMap, ctx: &NodeContext) -> Result<(), NodeError> {
        self.recorder
            .lock()
            .unwrap()
            .push(format!("disable {}", ctx.node_id));
        Ok(())
    }
}

/// `toggle`: alternates `mode` between on and off every tick. The action is
/// taken from the `action` config (default `flash`).
pub struct Toggle {
    outputs: Vec<PortDescriptor>,
}

impl Toggle {
    pub fn new() -> Self {
        Self {
            outputs: vec![PortDescriptor::compute("cmd", PortType::Command)],
        }
    }
}

impl NodeDefinition for Toggle {
    fn node_type(&self) -> &str {
        "toggle"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &[]
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, _: &ValueMap, config: &ValueMap, ctx: &NodeContext) -> Result<ValueMap, NodeError> {
        let action = config.get("action").and_then(Value::as_str).unwrap_or("flash");
        let mode = if ctx.tick % 2 == 0 { "on" } else { "off" };
        Ok(single("cmd", command(action, mode)))
    }
}

/// `trigger`: turns a number into an on/off flash command.
pub struct Trigger {
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
}

impl Trigger {
    pub fn new() -> Self {
        Self {
            inputs: vec![PortDescriptor::compute("in", PortType::Number).with_default(0.0)],
            outputs: vec![PortDescriptor::compute("cmd", PortType::Command)],
        }
    }
}

impl NodeDefinition for Trigger {
    fn node_type(&self) -> &str {
        "trigger"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, inputs: &ValueMap, _: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        let x = inputs.get("in").and_then(Value::as_f64).unwrap_or(0.0);
        let mode = if x > 0.5 { "on" } else { "off" };
        Ok(single("cmd", command("flash", mode)))
    }
}

/// `command`: emits its `cmd` config verbatim.
pub struct CommandSource {
    outputs: Vec<PortDescriptor>,
}

impl CommandSource {
    pub fn new() -> Self {
        Self {
            outputs: vec![PortDescriptor::compute("cmd", PortType::Command)],
        }
    }
}

impl NodeDefinition for CommandSource {
    fn node_type(&self) -> &str {
        "command"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &[]
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, _: &ValueMap, config: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        Ok(config
            .get("cmd")
            .map(|cmd| single("cmd", cmd.clone()))
            .unwrap_or_default())
    }
}

/// `device`: records every delivered `cmd` as `"<id> <json>"` and every
/// disable as `"disable <id>"`. Echoes its `level` input on `ack`.
pub struct RecordingDevice {
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
    recorder: Recorder,
}

impl RecordingDevice {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            inputs: vec![
                PortDescriptor::compute("level", PortType::Number).with_default(0.0),
                PortDescriptor::sink("cmd", PortType::Command),
            ],
            outputs: vec![PortDescriptor::compute("ack", PortType::Number)],
            recorder,
        }
    }
}

impl NodeDefinition for RecordingDevice {
    fn node_type(&self) -> &str {
        "device"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, inputs: &ValueMap, _: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        let level = inputs.get("level").cloned().unwrap_or_default();
        Ok(single("ack", level))
    }
    fn sink(&self) -> Option<&dyn SinkHook> {
        Some(self)
    }
    fn disable(&self) -> Option<&dyn DisableHook> {
        Some(self)
    }
}

impl SinkHook for RecordingDevice {
    fn on_sink(&self, inputs: &ValueMap, _: &ValueMap, ctx: &NodeContext) -> Result<(), NodeError> {
        let cmd = serde_json::to_string(&inputs["cmd"]).map_err(|e| NodeError::new(e.to_string()))?;
        self.recorder
            .lock()
            .unwrap()
            .push(format!("{} {}", ctx.node_id, cmd));
        Ok(())
    }
}

impl DisableHook for RecordingDevice {
    fn on_disable(&self, _: &ValueMap, _: &ValueMap, ctx: &NodeContext) -> Result<(), NodeError> {
        self.recorder
            .lock()
            .unwrap()
            .push(format!("disable {}", ctx.node_id));
        Ok(())
    }
}

/// `panic`: a numeric passthrough whose `process` always panics.
pub struct Panicker {
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
}

impl Panicker {
    pub fn new() -> Self {
        Self {
            inputs: vec![PortDescriptor::compute("in", PortType::Number)],
            outputs: vec![PortDescriptor::compute("out", PortType::Number)],
        }
    }
}

impl NodeDefinition for Panicker {
    fn node_type(&self) -> &str {
        "panic"
    }
    fn inputs(&self) -> &[PortDescriptor] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortDescriptor] {
        &self.outputs
    }
    fn process(&self, _: &ValueMap, _: &ValueMap, _: &NodeContext) -> Result<ValueMap, NodeError> {
        panic!("kaboom")
    }
}

/// Catalog with every scripted definition, hooks writing to `recorder`.
pub fn test_catalog(recorder: &Recorder) -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .register(NumberSource::new())
        .register(Gain::new(recorder.clone()))
        .register(Toggle::new())
        .register(Trigger::new())
        .register(CommandSource::new())
        .register(RecordingDevice::new(recorder.clone()))
        .register(Panicker::new());
    catalog
}
