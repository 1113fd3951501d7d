//! Host-supplied policies and callbacks.
//!
//! The engine never decides on its own whether a node is enabled; it asks the
//! host every tick. Instrumentation flows the other way through an
//! [`EngineObserver`].

use crate::engine::id::NodeId;
use crate::engine::watchdog::WatchdogReport;
use serde::{Deserialize, Serialize};

/// Per-node enable gates consulted every tick.
#[cfg_attr(test, mockall::automock)]
pub trait HostPolicy {
    /// Full enable/disable gate. A transition to disabled fires `on_disable`.
    fn is_node_enabled(&self, _node_id: &NodeId) -> bool {
        true
    }

    /// Suppresses compute and sink work without lifecycle events.
    fn is_compute_enabled(&self, _node_id: &NodeId) -> bool {
        true
    }

    /// Suppresses only the sink pass.
    fn is_sink_enabled(&self, _node_id: &NodeId) -> bool {
        true
    }
}

/// Every node enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllEnabled;

impl HostPolicy for AllEnabled {}

type Predicate = Box<dyn Fn(&NodeId) -> bool + Send + Sync>;

/// Policy assembled from closures. Gates left unset allow everything.
#[derive(Default)]
pub struct FnPolicy {
    node: Option<Predicate>,
    compute: Option<Predicate>,
    sink: Option<Predicate>,
}

impl FnPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_enabled(mut self, f: impl Fn(&NodeId) -> bool + Send + Sync + 'static) -> Self {
        self.node = Some(Box::new(f));
        self
    }

    pub fn compute_enabled(
        mut self,
        f: impl Fn(&NodeId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.compute = Some(Box::new(f));
        self
    }

    pub fn sink_enabled(mut self, f: impl Fn(&NodeId) -> bool + Send + Sync + 'static) -> Self {
        self.sink = Some(Box::new(f));
        self
    }
}

impl HostPolicy for FnPolicy {
    fn is_node_enabled(&self, node_id: &NodeId) -> bool {
        self.node.as_ref().map_or(true, |f| f(node_id))
    }

    fn is_compute_enabled(&self, node_id: &NodeId) -> bool {
        self.compute.as_ref().map_or(true, |f| f(node_id))
    }

    fn is_sink_enabled(&self, node_id: &NodeId) -> bool {
        self.sink.as_ref().map_or(true, |f| f(node_id))
    }
}

impl std::fmt::Debug for FnPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPolicy")
            .field("node", &self.node.is_some())
            .field("compute", &self.compute.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickInfo {
    /// Tick counter since the last start, starting at 0.
    pub tick: u64,
    /// Host time of the tick in milliseconds.
    pub time_ms: f64,
    /// Wall-clock time spent in both passes.
    pub duration_ms: f64,
    /// Nodes whose `process` ran successfully.
    pub computed: usize,
    /// `on_sink` invocations.
    pub sink_calls: usize,
    /// Hook failures caught this tick.
    pub failures: usize,
}

/// Receives tick and halt notifications.
pub trait EngineObserver {
    /// Called after both passes of a tick complete.
    fn on_tick(&mut self, _info: &TickInfo) {}

    /// Called exactly once per watchdog halt.
    fn on_watchdog(&mut self, _report: &WatchdogReport) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}
