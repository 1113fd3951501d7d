//! Test data builders for creating graphs and engines

use stagegraph::config::EngineConfig;
use stagegraph::engine::{Catalog, Connection, Engine, GraphState, NodeInstance, Value};

/// Builder for `GraphState` snapshots. Connection ids are generated.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeInstance>,
    connections: Vec<Connection>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(self, id: &str, node_type: &str) -> Self {
        self.instance(NodeInstance::new(id, node_type))
    }

    /// Node with a single config entry.
    pub fn configured(self, id: &str, node_type: &str, key: &str, value: impl Into<Value>) -> Self {
        self.instance(NodeInstance::new(id, node_type).with_config(key, value))
    }

    pub fn instance(mut self, node: NodeInstance) -> Self {
        self.nodes.push(node);
        self
    }

    /// Connect `source.port` to `target.port`.
    pub fn connect(mut self, source: (&str, &str), target: (&str, &str)) -> Self {
        let id = format!("c{}", self.connections.len() + 1);
        self.connections.push(Connection::new(id, source, target));
        self
    }

    pub fn build(self) -> GraphState {
        GraphState {
            version: 1,
            nodes: self.nodes,
            connections: self.connections,
        }
    }

    /// Load into an engine with the default config.
    pub fn engine(self, catalog: Catalog) -> Engine {
        self.engine_with(catalog, EngineConfig::default())
    }

    pub fn engine_with(self, catalog: Catalog, config: EngineConfig) -> Engine {
        let (engine, report) = Engine::from_state(catalog, self.build(), config).unwrap();
        assert!(report.is_clean(), "unexpected load report: {:?}", report);
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_builder() {
        let state = GraphBuilder::new()
            .node("a", "number")
            .configured("b", "gain", "gain", 2.0)
            .connect(("a", "value"), ("b", "in"))
            .build();

        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.nodes[1].config.get("gain"), Some(&Value::from(2.0)));
        assert_eq!(state.connections[0].id.as_str(), "c1");
    }
}
