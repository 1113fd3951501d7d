//! Tick executor: the compute pass, the sink pass and the node lifecycle.
//!
//! Each tick:
//! 1. Expire stale overrides.
//! 2. Recompile if the graph topology changed since the last plan.
//! 3. Compute pass in plan order (disable lifecycle, bypass, `process`).
//! 4. Sink pass in the same order (aggregation, idempotence, command diff,
//!    watchdog, `on_sink`).
//!
//! Time is supplied by the caller on every tick so the executor itself never
//! reads a clock for semantics; the tick-loop thread in [`super::bridge`]
//! feeds it wall-clock milliseconds.

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::engine::catalog::Catalog;
use crate::engine::command::changed_commands;
use crate::engine::compiled_plan::{CompiledPlan, PlanStep};
use crate::engine::compiler::GraphCompiler;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::graph::{Graph, GraphEdit, GraphState, LoadReport, NodeInstance};
use crate::engine::host::{AllEnabled, EngineObserver, HostPolicy, NoopObserver, TickInfo};
use crate::engine::id::NodeId;
use crate::engine::node::{guarded, NodeContext, NodeDefinition};
use crate::engine::overrides::{OverrideKind, OverrideStore};
use crate::engine::value::{Value, ValueMap};
use crate::engine::watchdog::{HaltReason, Watchdog, WatchdogReport};
use std::collections::HashMap;
use std::time::Instant;

/// What a call to [`Engine::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The engine is not running.
    Idle,
    Completed(TickInfo),
    /// A watchdog tripped; the engine is now stopped.
    Halted(WatchdogReport),
}

/// Inputs and config of the last `on_sink` invocation.
#[derive(Debug, Clone, PartialEq)]
struct SinkSnapshot {
    compute_inputs: ValueMap,
    sink_values: ValueMap,
    config: ValueMap,
}

/// Per-node transient state, dropped on load and stop.
#[derive(Debug, Clone, Default)]
struct NodeRuntime {
    disabled: bool,
    last_inputs: Option<ValueMap>,
    sink_snapshot: Option<SinkSnapshot>,
    sink_connected: bool,
}

/// Owns a graph and ticks it.
pub struct Engine {
    graph: Graph,
    config: EngineConfig,
    plan: Option<CompiledPlan>,
    overrides: OverrideStore,
    watchdog: Watchdog,
    runtime: HashMap<NodeId, NodeRuntime>,
    policy: Box<dyn HostPolicy + Send>,
    observer: Box<dyn EngineObserver + Send>,
    running: bool,
    halted: Option<WatchdogReport>,
    tick: u64,
    last_tick_ms: Option<f64>,
}

impl Engine {
    /// Wrap a graph. Fails if `config` does not validate.
    pub fn new(graph: Graph, config: EngineConfig) -> EngineResult<Self> {
        config.validate().map_err(|err| match err {
            StageError::Config(message) => EngineError::InvalidConfig(message),
            other => EngineError::InvalidConfig(other.to_string()),
        })?;
        let watchdog = Watchdog::new(config.watchdog.clone());
        Ok(Self {
            graph,
            config,
            plan: None,
            overrides: OverrideStore::new(),
            watchdog,
            runtime: HashMap::new(),
            policy: Box::new(AllEnabled),
            observer: Box::new(NoopObserver),
            running: false,
            halted: None,
            tick: 0,
            last_tick_ms: None,
        })
    }

    /// Load a snapshot under the configured load policy and wrap it.
    pub fn from_state(
        catalog: Catalog,
        state: GraphState,
        config: EngineConfig,
    ) -> EngineResult<(Self, LoadReport)> {
        let (graph, report) = Graph::load(catalog, state, config.load_policy)?;
        Ok((Self::new(graph, config)?, report))
    }

    pub fn with_policy(mut self, policy: impl HostPolicy + Send + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_observer(mut self, observer: impl EngineObserver + Send + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn set_policy(&mut self, policy: impl HostPolicy + Send + 'static) {
        self.policy = Box::new(policy);
    }

    // ── Accessors ──

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan(&self) -> Option<&CompiledPlan> {
        self.plan.as_ref()
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Report of the halt that stopped the last run, if any.
    pub fn halted(&self) -> Option<&WatchdogReport> {
        self.halted.as_ref()
    }

    /// Ticks completed since the last start.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Current outputs of a node.
    pub fn outputs(&self, node_id: &str) -> Option<&ValueMap> {
        self.graph.node(node_id).map(|n| &n.output_values)
    }

    /// Whether the plan is missing or older than the graph.
    pub fn is_plan_stale(&self) -> bool {
        self.plan
            .as_ref()
            .map_or(true, |p| p.generation != self.graph.generation())
    }

    // ── Graph management ──

    /// Replace the graph with a snapshot.
    ///
    /// All transient state is keyed by node identity, so overrides, watchdog
    /// history and per-node caches are dropped with the old graph.
    pub fn load(&mut self, state: GraphState) -> EngineResult<LoadReport> {
        let catalog = self.graph.catalog().clone();
        let (graph, report) = Graph::load(catalog, state, self.config.load_policy)?;
        self.graph = graph;
        self.plan = None;
        self.overrides.clear_all();
        self.watchdog.reset();
        self.runtime.clear();
        Ok(report)
    }

    /// Compile the current graph and cache the plan.
    pub fn compile_now(&mut self) -> EngineResult<&CompiledPlan> {
        let plan = GraphCompiler::compile(&self.graph)?;
        tracing::info!(
            "Graph compiled: {} nodes, {} compute / {} sink edges in {}us (gen {})",
            plan.stats.total_nodes,
            plan.stats.compute_edges,
            plan.stats.sink_edges,
            plan.stats.compile_time_us,
            plan.generation,
        );
        Ok(self.plan.insert(plan))
    }

    /// Apply an edit to the live graph. A topology change is compiled lazily
    /// on the next tick.
    pub fn apply_edit(&mut self, edit: GraphEdit) -> EngineResult<()> {
        let removed = removed_node(&edit);
        self.graph.apply(edit)?;
        if let Some(node_id) = removed {
            self.forget_node(&node_id);
        }
        Ok(())
    }

    /// Apply an edit only if the result still compiles.
    ///
    /// The edit is tried on a copy of the graph; the live graph is replaced
    /// only after the copy compiles, so a rejected edit leaves no trace.
    pub fn try_edit(&mut self, edit: GraphEdit) -> EngineResult<()> {
        let removed = removed_node(&edit);
        let topology = edit.is_topology();

        let mut candidate = self.graph.clone();
        candidate.apply(edit)?;
        let plan = if topology {
            Some(GraphCompiler::compile(&candidate)?)
        } else {
            None
        };

        self.graph = candidate;
        if plan.is_some() {
            self.plan = plan;
        }
        if let Some(node_id) = removed {
            self.forget_node(&node_id);
        }
        Ok(())
    }

    fn forget_node(&mut self, node_id: &NodeId) {
        self.runtime.remove(node_id);
        self.overrides.clear_node(node_id.as_str());
        self.watchdog.forget(node_id);
    }

    // ── Overrides ──

    pub fn set_override(
        &mut self,
        node_id: &str,
        kind: OverrideKind,
        key: &str,
        value: Value,
        ttl_ms: Option<f64>,
        now_ms: f64,
    ) -> EngineResult<()> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| EngineError::UnknownNode(NodeId::from(node_id)))?;
        self.overrides.set(&node.id, kind, key, value, ttl_ms, now_ms);
        Ok(())
    }

    pub fn clear_override(&mut self, node_id: &str, kind: OverrideKind, key: &str) -> bool {
        self.overrides.clear(node_id, kind, key)
    }

    // ── Lifecycle ──

    /// Compile and begin ticking. Clears any previous halt.
    pub fn start(&mut self) -> EngineResult<()> {
        self.compile_now()?;
        self.running = true;
        self.halted = None;
        self.tick = 0;
        self.last_tick_ms = None;
        self.watchdog.reset();
        tracing::info!("Engine started with {} nodes", self.graph.node_count());
        Ok(())
    }

    /// Stop ticking.
    ///
    /// Every node with a disable hook that is not already disabled gets
    /// `on_disable` once, then outputs and per-node caches are cleared so a
    /// later start behaves like a cold start.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let ctx_time = self.last_tick_ms.unwrap_or(0.0);
        let mut failures = 0;

        for node in self.graph.nodes() {
            let Some(def) = self.graph.definition(&node.node_type) else {
                continue;
            };
            let runtime = self.runtime.get(&node.id).cloned().unwrap_or_default();
            if runtime.disabled || def.disable().is_none() {
                continue;
            }
            let ctx = NodeContext {
                node_id: &node.id,
                tick: self.tick,
                time_ms: ctx_time,
                dt_ms: 0.0,
            };
            let inputs = synthesize_inputs(def.as_ref(), node, &runtime);
            let config = self.overrides.effective_config(node.id.as_str(), &node.config);
            if !fire_disable(def.as_ref(), &inputs, &config, &ctx) {
                failures += 1;
            }
        }

        self.graph.clear_outputs();
        self.runtime.clear();
        self.watchdog.reset();
        self.running = false;
        tracing::info!(
            "Engine stopped after {} ticks ({} cleanup failures)",
            self.tick,
            failures
        );
    }

    fn halt(&mut self, report: WatchdogReport) -> TickOutcome {
        tracing::warn!("Watchdog halt ({}): {}", report.reason, report.message);
        self.stop();
        self.halted = Some(report.clone());
        self.observer.on_watchdog(&report);
        TickOutcome::Halted(report)
    }

    // ── Tick ──

    /// Run one tick at host time `now_ms`.
    pub fn tick(&mut self, now_ms: f64) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        let started = Instant::now();
        let dt_ms = self.last_tick_ms.map_or(0.0, |last| now_ms - last);
        self.last_tick_ms = Some(now_ms);

        self.overrides.expire(now_ms);

        if self.is_plan_stale() {
            let compiled = self.compile_now().map(|_| ());
            if let Err(err) = compiled {
                let mut diagnostics = ValueMap::new();
                if let EngineError::Cycle(nodes) = &err {
                    diagnostics.insert(
                        "nodes".to_string(),
                        Value::List(nodes.iter().map(|id| Value::from(id.as_str())).collect()),
                    );
                }
                return self.halt(WatchdogReport {
                    reason: HaltReason::CompileError,
                    message: err.to_string(),
                    diagnostics,
                });
            }
        }
        let Some(plan) = self.plan.take() else {
            return TickOutcome::Idle;
        };

        let mut info = TickInfo {
            tick: self.tick,
            time_ms: now_ms,
            ..TickInfo::default()
        };
        self.watchdog.begin_tick();
        self.compute_pass(&plan, now_ms, dt_ms, &mut info);
        let sink_result = self.sink_pass(&plan, now_ms, dt_ms, &mut info);
        self.plan = Some(plan);

        if let Err(report) = sink_result {
            return self.halt(report);
        }

        info.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            "Tick {}: {} computed, {} sink calls, {} failures in {:.3}ms",
            info.tick,
            info.computed,
            info.sink_calls,
            info.failures,
            info.duration_ms
        );
        self.tick += 1;
        self.observer.on_tick(&info);
        TickOutcome::Completed(info)
    }

    fn compute_pass(&mut self, plan: &CompiledPlan, now_ms: f64, dt_ms: f64, info: &mut TickInfo) {
        for step in &plan.steps {
            let node_id = &step.node_id;
            let def = step.definition.as_ref();
            let ctx = NodeContext {
                node_id,
                tick: self.tick,
                time_ms: now_ms,
                dt_ms,
            };

            if !self.policy.is_node_enabled(node_id) {
                if !self.enter_disabled(step, &ctx) {
                    info.failures += 1;
                }
                let outputs = bypass_outputs(step, &self.graph);
                if let Some(node) = self.graph.node_at_mut(step.index) {
                    node.output_values = outputs;
                }
                continue;
            }

            let runtime = self.runtime.entry(node_id.clone()).or_default();
            if runtime.disabled {
                tracing::debug!("Node {} re-enabled", node_id);
                runtime.disabled = false;
            }

            if !self.policy.is_compute_enabled(node_id) {
                if let Some(node) = self.graph.node_at_mut(step.index) {
                    node.output_values.clear();
                }
                continue;
            }

            let Some(node) = self.graph.node_at(step.index) else {
                continue;
            };
            let mut inputs = ValueMap::new();
            let mut persisted = Vec::new();
            for port in def.inputs().iter().filter(|p| !p.is_sink()) {
                let upstream = step.compute_route(&port.id).and_then(|route| {
                    self.graph
                        .node_at(route.source)
                        .and_then(|src| src.output_values.get(&route.source_port))
                });
                let value = if let Some(v) = self.overrides.input(node_id.as_str(), &port.id) {
                    v.clone()
                } else if let Some(v) = upstream {
                    v.clone()
                } else if let Some(v) = node.input_values.get(&port.id) {
                    v.clone()
                } else {
                    persisted.push((port.id.clone(), port.default.clone()));
                    port.default.clone()
                };
                inputs.insert(port.id.clone(), value);
            }
            let config = self.overrides.effective_config(node_id.as_str(), &node.config);

            let result = guarded(|| def.process(&inputs, &config, &ctx));
            runtime.last_inputs = Some(inputs);

            let Some(node) = self.graph.node_at_mut(step.index) else {
                continue;
            };
            node.input_values.extend(persisted);
            match result {
                Ok(outputs) => {
                    node.output_values = outputs;
                    info.computed += 1;
                }
                Err(err) => {
                    info.failures += 1;
                    tracing::warn!(
                        node_id = %node_id,
                        node_type = def.node_type(),
                        "process failed: {}",
                        err
                    );
                }
            }
        }
    }

    /// Disable bookkeeping for one node. Returns false if the hook failed.
    fn enter_disabled(&mut self, step: &PlanStep, ctx: &NodeContext) -> bool {
        let def = step.definition.as_ref();
        let runtime = self.runtime.entry(step.node_id.clone()).or_default();
        let mut ok = true;

        if !runtime.disabled {
            runtime.disabled = true;
            tracing::debug!("Node {} disabled", step.node_id);
            if let Some(node) = self.graph.node_at(step.index) {
                let inputs = synthesize_inputs(def, node, runtime);
                let config = self
                    .overrides
                    .effective_config(step.node_id.as_str(), &node.config);
                ok = fire_disable(def, &inputs, &config, ctx);
            }
        }
        runtime.sink_snapshot = None;
        ok
    }

    fn sink_pass(
        &mut self,
        plan: &CompiledPlan,
        now_ms: f64,
        dt_ms: f64,
        info: &mut TickInfo,
    ) -> Result<(), WatchdogReport> {
        for step in &plan.steps {
            let def = step.definition.as_ref();
            if !def.has_sink_inputs() {
                continue;
            }
            let node_id = &step.node_id;
            if !self.policy.is_node_enabled(node_id)
                || !self.policy.is_compute_enabled(node_id)
                || !self.policy.is_sink_enabled(node_id)
            {
                continue;
            }
            let Some(node) = self.graph.node_at(step.index) else {
                continue;
            };
            let ctx = NodeContext {
                node_id,
                tick: self.tick,
                time_ms: now_ms,
                dt_ms,
            };
            let config = self.overrides.effective_config(node_id.as_str(), &node.config);
            let runtime = self.runtime.entry(node_id.clone()).or_default();

            if step.sink_connection_count() == 0 {
                if runtime.sink_connected {
                    tracing::debug!("Sink {} unplugged", node_id);
                    runtime.sink_connected = false;
                    let inputs = synthesize_inputs(def, node, runtime);
                    runtime.sink_snapshot = None;
                    if !fire_disable(def, &inputs, &config, &ctx) {
                        info.failures += 1;
                    }
                }
                continue;
            }
            runtime.sink_connected = true;

            let sink_values = gather_sink_values(step, &self.graph);
            let compute_inputs = compute_input_set(def, node, runtime);

            let delivery = match &runtime.sink_snapshot {
                None => Some(sink_values.clone()),
                Some(prev) if prev.compute_inputs == compute_inputs && prev.config == config => {
                    if prev.sink_values == sink_values {
                        None
                    } else {
                        command_delta(&prev.sink_values, &sink_values)
                    }
                }
                Some(_) => Some(sink_values.clone()),
            };

            let snapshot = SinkSnapshot {
                compute_inputs,
                sink_values,
                config,
            };
            let Some(delivered) = delivery else {
                runtime.sink_snapshot = Some(snapshot);
                continue;
            };

            self.watchdog.check_burst(node_id, &delivered)?;
            self.watchdog
                .check_oscillation(node_id, &snapshot.sink_values, now_ms)?;

            if let Some(hook) = def.sink() {
                let mut inputs = snapshot.compute_inputs.clone();
                for port in def.inputs().iter().filter(|p| p.is_sink()) {
                    let value = delivered
                        .get(&port.id)
                        .cloned()
                        .unwrap_or_else(|| port.default.clone());
                    inputs.insert(port.id.clone(), value);
                }
                info.sink_calls += 1;
                if let Err(err) = guarded(|| hook.on_sink(&inputs, &snapshot.config, &ctx)) {
                    info.failures += 1;
                    tracing::warn!(
                        node_id = %node_id,
                        node_type = def.node_type(),
                        "on_sink failed: {}",
                        err
                    );
                }
            }
            runtime.sink_snapshot = Some(snapshot);
        }
        Ok(())
    }
}

fn removed_node(edit: &GraphEdit) -> Option<NodeId> {
    match edit {
        GraphEdit::RemoveNode { node_id } => Some(node_id.clone()),
        _ => None,
    }
}

/// Best-effort full input set for cleanup hooks: declared defaults, then the
/// stored values, then the last resolved compute inputs and sink values.
fn synthesize_inputs(def: &dyn NodeDefinition, node: &NodeInstance, runtime: &NodeRuntime) -> ValueMap {
    let mut inputs: ValueMap = def
        .inputs()
        .iter()
        .map(|p| (p.id.clone(), p.default.clone()))
        .collect();
    for (key, value) in &node.input_values {
        if inputs.contains_key(key) {
            inputs.insert(key.clone(), value.clone());
        }
    }
    if let Some(last) = &runtime.last_inputs {
        inputs.extend(last.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(snapshot) = &runtime.sink_snapshot {
        inputs.extend(snapshot.sink_values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    inputs
}

/// Non-sink inputs as last resolved by the compute pass.
fn compute_input_set(def: &dyn NodeDefinition, node: &NodeInstance, runtime: &NodeRuntime) -> ValueMap {
    def.inputs()
        .iter()
        .filter(|p| !p.is_sink())
        .map(|p| {
            let value = runtime
                .last_inputs
                .as_ref()
                .and_then(|last| last.get(&p.id))
                .or_else(|| node.input_values.get(&p.id))
                .cloned()
                .unwrap_or_else(|| p.default.clone());
            (p.id.clone(), value)
        })
        .collect()
}

fn fire_disable(def: &dyn NodeDefinition, inputs: &ValueMap, config: &ValueMap, ctx: &NodeContext) -> bool {
    let Some(hook) = def.disable() else {
        return true;
    };
    match guarded(|| hook.on_disable(inputs, config, ctx)) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                node_id = %ctx.node_id,
                node_type = def.node_type(),
                "on_disable failed: {}",
                err
            );
            false
        }
    }
}

/// Outputs of a disabled node.
///
/// With exactly one compute input/output pair of the same non-routing type,
/// the connected upstream value passes through unchanged. Anything else
/// yields no outputs.
fn bypass_outputs(step: &PlanStep, graph: &Graph) -> ValueMap {
    let def = step.definition.as_ref();
    let mut pairs = def
        .inputs()
        .iter()
        .filter(|p| !p.is_sink() && !p.ty.is_routing())
        .flat_map(|input| {
            def.outputs()
                .iter()
                .filter(move |out| !out.is_sink() && out.ty == input.ty)
                .map(move |out| (input, out))
        });

    let (Some((input, output)), None) = (pairs.next(), pairs.next()) else {
        return ValueMap::new();
    };

    step.compute_route(&input.id)
        .and_then(|route| {
            graph
                .node_at(route.source)
                .and_then(|src| src.output_values.get(&route.source_port))
        })
        .map(|value| ValueMap::from([(output.id.clone(), value.clone())]))
        .unwrap_or_default()
}

/// Collect sink inputs from every connected producer. One producer gives a
/// scalar; each further producer appends to a list.
fn gather_sink_values(step: &PlanStep, graph: &Graph) -> ValueMap {
    let mut values = ValueMap::new();
    for route in &step.sink_routes {
        for (source, port) in &route.sources {
            let Some(value) = graph
                .node_at(*source)
                .and_then(|n| n.output_values.get(port))
            else {
                continue;
            };
            match values.get_mut(&route.port_id) {
                None => {
                    values.insert(route.port_id.clone(), value.clone());
                }
                Some(Value::List(items)) => items.push(value.clone()),
                Some(existing) => {
                    let first = std::mem::take(existing);
                    *existing = Value::List(vec![first, value.clone()]);
                }
            }
        }
    }
    values
}

/// Sink values to deliver when only sink values changed.
///
/// Command bundles shrink to the commands whose identity-matched counterpart
/// changed; other ports are delivered whole. `None` when nothing is left to
/// deliver.
fn command_delta(previous: &ValueMap, next: &ValueMap) -> Option<ValueMap> {
    let mut delta = next.clone();
    let mut pending = previous.keys().any(|k| !next.contains_key(k));

    for (port, value) in next {
        let Some(before) = previous.get(port) else {
            pending = true;
            continue;
        };
        match changed_commands(before, value) {
            Some(changed) => {
                pending |= !changed.is_empty();
                delta.insert(port.clone(), Value::List(changed));
            }
            None => pending |= before != value,
        }
    }

    pending.then_some(delta)
}
