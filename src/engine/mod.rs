//! Graph execution engine.
//!
//! A user-authored dataflow graph is compiled into an execution order and
//! ticked at a fixed cadence. Each tick runs a pure compute pass followed by
//! a side-effect sink pass, with a watchdog between the graph and the
//! actuators it drives.
//!
//! # Architecture
//!
//! ```text
//! GraphState ──load──► Graph ──compile──► CompiledPlan
//!                        │                     │
//!                  edits │                     ▼
//!                        └──────────────► Engine::tick ◄── OverrideStore
//!                                              │
//!                                      compute pass → sink pass
//!                                                        │
//!                                                    Watchdog ──► on_sink
//! ```
//!
//! # Design
//!
//! - **Owned engine**: no global runtime; each `Engine` owns its graph and
//!   transient state, so independent instances never interfere.
//! - **Compute edges order, sink edges don't**: feedback through a sink is
//!   legal, a compute cycle is a compile error.
//! - **Capability hooks**: a definition exposes `SinkHook` / `DisableHook`
//!   through accessor methods checked at dispatch time.
//! - **Fail closed**: watchdog halts stop all delivery until restarted.
//! - **Dedicated thread**: `EngineBridge` runs the tick loop behind
//!   crossbeam channels.

pub mod bridge;
pub mod catalog;
pub mod command;
pub mod compiled_plan;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod graph;
pub mod host;
pub mod id;
pub mod node;
pub mod overrides;
pub mod port;
pub mod value;
pub mod watchdog;

pub use bridge::{EngineBridge, EngineCommand, EngineEvent, EngineHandle};
pub use catalog::{Catalog, NodeSchema, SchemaDefinition};
pub use command::Command;
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::GraphCompiler;
pub use error::{EngineError, EngineResult, NodeError};
pub use executor::{Engine, TickOutcome};
pub use graph::{Connection, Graph, GraphEdit, GraphState, LoadReport, NodeInstance};
pub use host::{AllEnabled, EngineObserver, FnPolicy, HostPolicy, NoopObserver, TickInfo};
pub use id::{ConnectionId, NodeId};
pub use node::{DisableHook, NodeContext, NodeDefinition, SinkHook};
pub use overrides::{Override, OverrideKind, OverrideStore};
pub use port::{ConfigField, PortDescriptor, PortKind, PortType};
pub use value::{Value, ValueMap};
pub use watchdog::{HaltReason, Watchdog, WatchdogReport};
