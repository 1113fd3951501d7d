//! # stagegraph: real-time dataflow graph engine
//!
//! Drives a live multi-device performance: a central engine evaluates a
//! user-authored node graph at a fixed cadence and turns the results into
//! commands for remote actuators (flashlights, speakers, screens).
//!
//! ## Architecture
//!
//! - **Graph model**: nodes, typed ports and connections, validated on load
//!   and on every edit
//! - **Compiler**: Kahn ordering over compute edges; sink edges are feedback
//!   paths and never order anything
//! - **Executor**: compute pass then sink pass per tick, with TTL overrides,
//!   disable lifecycle, bypass and sink idempotence
//! - **Watchdog**: burst and oscillation checks that halt before hardware
//!   sees runaway output
//! - **Partitioner**: local-loop detection and patch export for device-side
//!   execution
//! - **Communication**: crossbeam channels between the tick loop thread and
//!   its host
//!
//! ## Example
//!
//! ```ignore
//! use stagegraph::{
//!     config::EngineConfig,
//!     engine::{Catalog, Engine, EngineBridge, GraphState},
//! };
//!
//! let config = EngineConfig::load_or_default("stagegraph.toml");
//! let state = GraphState::from_json(&std::fs::read_to_string("show.json")?)?;
//! let (engine, _report) = Engine::from_state(my_catalog(), state, config)?;
//!
//! let (handle, thread) = EngineBridge::spawn(engine)?;
//! handle.start();
//! for event in handle.drain() {
//!     println!("{:?}", event);
//! }
//! handle.shutdown();
//! let engine = thread.join().unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod partition;

// Re-export commonly used types
pub use config::{EngineConfig, LoadPolicy, WatchdogConfig};
pub use engine::{
    Catalog, Engine, EngineBridge, EngineHandle, Graph, GraphState, NodeDefinition, NodeId,
    TickOutcome, Value, ValueMap,
};
pub use error::{Result, StageError};
pub use partition::{PartitionError, PartitionPolicy};
