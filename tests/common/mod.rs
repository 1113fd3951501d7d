//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod nodes;

use stagegraph::engine::{Engine, Value};
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Numeric output `port` of `node_id`, if present.
pub fn output_f64(engine: &Engine, node_id: &str, port: &str) -> Option<f64> {
    engine
        .outputs(node_id)
        .and_then(|o| o.get(port))
        .and_then(Value::as_f64)
}
