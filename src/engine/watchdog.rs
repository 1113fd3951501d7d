//! Actuator protection: burst and oscillation detection.
//!
//! Both checks run on the sink values about to be delivered, before the
//! sink hook fires. A trip produces a [`WatchdogReport`]; the executor then
//! halts and stays halted until the host restarts it.

use crate::config::WatchdogConfig;
use crate::engine::command::value_signature;
use crate::engine::id::NodeId;
use crate::engine::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Why the executor halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaltReason {
    SinkBurst,
    Oscillation,
    CompileError,
}

impl HaltReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HaltReason::SinkBurst => "sink-burst",
            HaltReason::Oscillation => "oscillation",
            HaltReason::CompileError => "compile-error",
        }
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable description of a halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogReport {
    pub reason: HaltReason,
    pub message: String,
    pub diagnostics: ValueMap,
}

/// Burst counter plus per-port signature history.
#[derive(Debug, Clone)]
pub struct Watchdog {
    config: WatchdogConfig,
    continuous: HashSet<String>,
    burst_count: usize,
    history: HashMap<(NodeId, String), VecDeque<(f64, String)>>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        let continuous = config.continuous_actions.iter().cloned().collect();
        Self {
            config,
            continuous,
            burst_count: 0,
            history: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Reset the per-tick burst counter.
    pub fn begin_tick(&mut self) {
        self.burst_count = 0;
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.burst_count = 0;
        self.history.clear();
    }

    /// Drop the signature history of a removed node.
    pub fn forget(&mut self, node_id: &NodeId) {
        self.history.retain(|(id, _), _| id != node_id);
    }

    /// Sink values delivered so far this tick.
    pub fn burst_count(&self) -> usize {
        self.burst_count
    }

    /// Count the values about to be delivered against the burst ceiling.
    pub fn check_burst(&mut self, node_id: &NodeId, delivered: &ValueMap) -> Result<(), WatchdogReport> {
        self.burst_count += delivered.values().map(Value::delivery_count).sum::<usize>();
        if self.burst_count <= self.config.burst_ceiling {
            return Ok(());
        }

        let mut diagnostics = ValueMap::new();
        diagnostics.insert("nodeId".to_string(), Value::from(node_id.as_str()));
        diagnostics.insert("count".to_string(), Value::from(self.burst_count as f64));
        diagnostics.insert(
            "ceiling".to_string(),
            Value::from(self.config.burst_ceiling as f64),
        );
        Err(WatchdogReport {
            reason: HaltReason::SinkBurst,
            message: format!(
                "Sink burst: {} values delivered in one tick (ceiling {}) at node {}",
                self.burst_count, self.config.burst_ceiling, node_id
            ),
            diagnostics,
        })
    }

    /// Record the signature of each command-carrying sink port and look for
    /// a strict two-value alternation.
    pub fn check_oscillation(
        &mut self,
        node_id: &NodeId,
        sink_values: &ValueMap,
        now_ms: f64,
    ) -> Result<(), WatchdogReport> {
        for (port_id, value) in sink_values {
            let Some(signature) = value_signature(value, &self.continuous) else {
                continue;
            };

            let window = self
                .history
                .entry((node_id.clone(), port_id.clone()))
                .or_default();
            window.push_back((now_ms, signature));
            while window.len() > self.config.oscillation_window {
                window.pop_front();
            }
            while window
                .front()
                .is_some_and(|(t, _)| now_ms - t > self.config.oscillation_span_ms)
            {
                window.pop_front();
            }

            // A single entry is never an alternation, whatever the config says.
            let length = alternation_suffix(window);
            if length >= self.config.oscillation_min_alternations.max(2) {
                let n = window.len();
                let a = window[n - 1].1.clone();
                let b = window[n - 2].1.clone();

                let mut diagnostics = ValueMap::new();
                diagnostics.insert("nodeId".to_string(), Value::from(node_id.as_str()));
                diagnostics.insert("portId".to_string(), Value::from(port_id.as_str()));
                diagnostics.insert("length".to_string(), Value::from(length as f64));
                diagnostics.insert(
                    "signatures".to_string(),
                    Value::List(vec![Value::from(b.clone()), Value::from(a.clone())]),
                );
                return Err(WatchdogReport {
                    reason: HaltReason::Oscillation,
                    message: format!(
                        "Oscillation on {}.{}: '{}' and '{}' alternated {} times",
                        node_id, port_id, b, a, length
                    ),
                    diagnostics,
                });
            }
        }
        Ok(())
    }
}

/// Length of the longest suffix that strictly alternates between two
/// signatures (no adjacent repeats, period exactly two).
fn alternation_suffix(window: &VecDeque<(f64, String)>) -> usize {
    let n = window.len();
    if n < 2 || window[n - 1].1 == window[n - 2].1 {
        return n.min(1);
    }
    let mut length = 2;
    while length < n {
        let i = n - 1 - length;
        // window[i] must equal the entry two later and differ from the next one.
        if window[i].1 != window[i + 2].1 || window[i].1 == window[i + 1].1 {
            break;
        }
        length += 1;
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(action: &str, mode: &str) -> Value {
        Value::from(json!({"action": action, "payload": {"mode": mode}}))
    }

    fn port(value: Value) -> ValueMap {
        ValueMap::from([("cmd".to_string(), value)])
    }

    fn window(sigs: &[&str]) -> VecDeque<(f64, String)> {
        sigs.iter()
            .enumerate()
            .map(|(i, s)| (i as f64, s.to_string()))
            .collect()
    }

    #[test]
    fn test_alternation_suffix() {
        assert_eq!(alternation_suffix(&window(&[])), 0);
        assert_eq!(alternation_suffix(&window(&["a"])), 1);
        assert_eq!(alternation_suffix(&window(&["a", "a"])), 1);
        assert_eq!(alternation_suffix(&window(&["a", "b"])), 2);
        assert_eq!(alternation_suffix(&window(&["c", "a", "b", "a", "b"])), 4);
        assert_eq!(alternation_suffix(&window(&["a", "b", "c", "a", "b", "c"])), 2);
        assert_eq!(alternation_suffix(&window(&["b", "a", "b", "a", "b", "a"])), 6);
    }

    #[test]
    fn test_burst_trips_over_ceiling() {
        let config = WatchdogConfig {
            burst_ceiling: 2,
            ..WatchdogConfig::default()
        };
        let mut wd = Watchdog::new(config);
        let id = NodeId::from("speaker");
        wd.begin_tick();
        assert!(wd.check_burst(&id, &port(Value::List(vec![cmd("a", "x"), cmd("b", "y")]))).is_ok());
        let report = wd.check_burst(&id, &port(cmd("c", "z"))).unwrap_err();
        assert_eq!(report.reason, HaltReason::SinkBurst);
        assert_eq!(report.diagnostics["count"], Value::from(3.0));

        wd.begin_tick();
        assert!(wd.check_burst(&id, &port(cmd("c", "z"))).is_ok());
    }

    #[test]
    fn test_oscillation_trips_at_min_length() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let id = NodeId::from("flash");
        for i in 0..5 {
            let mode = if i % 2 == 0 { "on" } else { "off" };
            assert!(wd
                .check_oscillation(&id, &port(cmd("flash", mode)), i as f64 * 33.0)
                .is_ok());
        }
        let report = wd
            .check_oscillation(&id, &port(cmd("flash", "off")), 5.0 * 33.0)
            .unwrap_err();
        assert_eq!(report.reason, HaltReason::Oscillation);
        assert_eq!(report.diagnostics["length"], Value::from(6.0));
    }

    #[test]
    fn test_single_entry_never_trips_with_low_minimum() {
        let config = WatchdogConfig {
            oscillation_window: 1,
            oscillation_min_alternations: 1,
            ..WatchdogConfig::default()
        };
        let mut wd = Watchdog::new(config);
        let id = NodeId::from("flash");
        for i in 0..4 {
            let mode = if i % 2 == 0 { "on" } else { "off" };
            assert!(wd
                .check_oscillation(&id, &port(cmd("flash", mode)), i as f64 * 33.0)
                .is_ok());
        }
    }

    #[test]
    fn test_forget_drops_node_history() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let id = NodeId::from("flash");
        for i in 0..5 {
            let mode = if i % 2 == 0 { "on" } else { "off" };
            assert!(wd
                .check_oscillation(&id, &port(cmd("flash", mode)), i as f64 * 33.0)
                .is_ok());
        }

        wd.forget(&id);
        assert!(wd
            .check_oscillation(&id, &port(cmd("flash", "off")), 5.0 * 33.0)
            .is_ok());
    }

    #[test]
    fn test_slow_alternation_outside_span_is_fine() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let id = NodeId::from("flash");
        for i in 0..20 {
            let mode = if i % 2 == 0 { "on" } else { "off" };
            assert!(wd
                .check_oscillation(&id, &port(cmd("flash", mode)), i as f64 * 400.0)
                .is_ok());
        }
    }

    #[test]
    fn test_continuous_actions_ignored() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let id = NodeId::from("screen");
        for i in 0..50 {
            let value = Value::from(json!({
                "action": "modulateColor",
                "payload": {"hue": (i % 2) as f64}
            }));
            assert!(wd.check_oscillation(&id, &port(value), i as f64).is_ok());
        }
    }

    #[test]
    fn test_halt_reason_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&HaltReason::SinkBurst).unwrap(),
            "\"sink-burst\""
        );
        assert_eq!(HaltReason::CompileError.to_string(), "compile-error");
    }
}
