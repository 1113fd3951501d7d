use crate::engine::id::NodeId;
use crate::engine::node::NodeDefinition;
use std::sync::Arc;

/// Where one compute input reads its connected value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRoute {
    pub port_id: String,
    /// Insertion-order index of the source node
    pub source: usize,
    pub source_port: String,
}

/// All producers feeding one sink input, in connection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRoute {
    pub port_id: String,
    /// (source node index, source port) pairs
    pub sources: Vec<(usize, String)>,
}

/// One node of the execution order with its pre-resolved routing.
#[derive(Clone)]
pub struct PlanStep {
    /// Insertion-order index into the graph
    pub index: usize,
    pub node_id: NodeId,
    pub definition: Arc<dyn NodeDefinition>,
    /// Connected compute inputs
    pub compute_routes: Vec<InputRoute>,
    /// Every sink input of the definition, connected or not
    pub sink_routes: Vec<SinkRoute>,
}

impl PlanStep {
    pub fn compute_route(&self, port_id: &str) -> Option<&InputRoute> {
        self.compute_routes.iter().find(|r| r.port_id == port_id)
    }

    /// Total connections into this node's sink inputs.
    pub fn sink_connection_count(&self) -> usize {
        self.sink_routes.iter().map(|r| r.sources.len()).sum()
    }
}

impl std::fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanStep")
            .field("index", &self.index)
            .field("node_id", &self.node_id)
            .field("node_type", &self.definition.node_type())
            .field("compute_routes", &self.compute_routes)
            .field("sink_routes", &self.sink_routes)
            .finish()
    }
}

/// Compiled execution plan for a graph.
/// Contains every node in an order where compute dependencies come first.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    /// Steps in execution order
    pub steps: Vec<PlanStep>,

    /// Graph generation this plan was built from
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Total number of nodes in the graph
    pub total_nodes: usize,

    /// Connections into compute inputs (ordering edges)
    pub compute_edges: usize,

    /// Connections into sink inputs (excluded from ordering)
    pub sink_edges: usize,

    /// Nodes with at least one sink input
    pub sink_nodes: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    /// Node ids in execution order
    pub fn order(&self) -> Vec<NodeId> {
        self.steps.iter().map(|s| s.node_id.clone()).collect()
    }

    /// Check if the plan has any nodes
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}
