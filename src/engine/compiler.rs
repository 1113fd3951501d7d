use super::compiled_plan::{CompiledPlan, InputRoute, PlanStats, PlanStep, SinkRoute};
use super::error::{EngineError, EngineResult};
use super::graph::Graph;
use super::port::PortKind;
use std::collections::VecDeque;

/// Compiles a graph into an execution plan
pub struct GraphCompiler;

impl GraphCompiler {
    /// Compile a graph into an execution plan.
    ///
    /// Ordering only considers edges into compute inputs. Edges into sink
    /// inputs are routed but never constrain the order, so feedback through a
    /// sink is legal while a cycle of compute edges is rejected.
    ///
    /// # Returns
    /// A `CompiledPlan` covering every node, or `EngineError::Cycle` naming
    /// the nodes that could not be scheduled.
    pub fn compile(graph: &Graph) -> EngineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();
        let n = graph.node_count();

        let (adj, in_degree, stats) = Self::build_adjacency(graph);
        let order = Self::topological_sort(&adj, in_degree);

        if order.len() < n {
            let mut scheduled = vec![false; n];
            for &idx in &order {
                scheduled[idx] = true;
            }
            let stuck: Vec<_> = (0..n)
                .filter(|&i| !scheduled[i])
                .filter_map(|i| graph.node_at(i).map(|node| node.id.clone()))
                .collect();
            tracing::warn!(
                "Graph has a compute cycle! Only {} of {} nodes scheduled.",
                order.len(),
                n
            );
            return Err(EngineError::Cycle(stuck));
        }

        let steps = Self::build_steps(graph, &order)?;
        let compile_time_us = start_time.elapsed().as_micros() as u64;

        Ok(CompiledPlan {
            steps,
            generation: graph.generation(),
            stats: PlanStats {
                total_nodes: n,
                sink_nodes: graph
                    .nodes()
                    .filter(|node| {
                        graph
                            .definition(&node.node_type)
                            .map(|d| d.has_sink_inputs())
                            .unwrap_or(false)
                    })
                    .count(),
                compile_time_us,
                ..stats
            },
        })
    }

    /// Build the compute-edge adjacency list and in-degree counts
    fn build_adjacency(graph: &Graph) -> (Vec<Vec<usize>>, Vec<usize>, PlanStats) {
        let n = graph.node_count();
        let mut adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        let mut stats = PlanStats::default();

        for conn in graph.connections() {
            let (Some(from), Some(to)) = (
                graph.index_of(conn.source_node_id.as_str()),
                graph.index_of(conn.target_node_id.as_str()),
            ) else {
                continue;
            };

            match graph.target_port(conn).map(|p| p.kind) {
                Some(PortKind::Compute) => {
                    adj[from].push(to);
                    in_degree[to] += 1;
                    stats.compute_edges += 1;
                }
                Some(PortKind::Sink) => stats.sink_edges += 1,
                None => {}
            }
        }

        (adj, in_degree, stats)
    }

    /// Kahn's algorithm. Ready nodes are taken first-discovered first, and
    /// the initial ready set follows insertion order, so the result is stable.
    fn topological_sort(adj: &[Vec<usize>], mut in_degree: Vec<usize>) -> Vec<usize> {
        let n = adj.len();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            result.push(node);

            for &neighbor in &adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        result
    }

    /// Resolve definitions and input routing for each scheduled node
    fn build_steps(graph: &Graph, order: &[usize]) -> EngineResult<Vec<PlanStep>> {
        let mut steps = Vec::with_capacity(order.len());

        for &index in order {
            let Some(node) = graph.node_at(index) else {
                continue;
            };
            let definition = graph
                .definition(&node.node_type)
                .cloned()
                .ok_or_else(|| EngineError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                })?;

            let mut compute_routes = Vec::new();
            let mut sink_routes: Vec<SinkRoute> = definition
                .inputs()
                .iter()
                .filter(|p| p.is_sink())
                .map(|p| SinkRoute {
                    port_id: p.id.clone(),
                    sources: Vec::new(),
                })
                .collect();

            for conn in graph.connections().filter(|c| c.target_node_id == node.id) {
                let Some(source) = graph.index_of(conn.source_node_id.as_str()) else {
                    continue;
                };
                match definition.input(&conn.target_port_id).map(|p| p.kind) {
                    Some(PortKind::Compute) => compute_routes.push(InputRoute {
                        port_id: conn.target_port_id.clone(),
                        source,
                        source_port: conn.source_port_id.clone(),
                    }),
                    Some(PortKind::Sink) => {
                        if let Some(route) = sink_routes
                            .iter_mut()
                            .find(|r| r.port_id == conn.target_port_id)
                        {
                            route.sources.push((source, conn.source_port_id.clone()));
                        }
                    }
                    None => {}
                }
            }

            steps.push(PlanStep {
                index,
                node_id: node.id.clone(),
                definition,
                compute_routes,
                sink_routes,
            });
        }

        Ok(steps)
    }
}
