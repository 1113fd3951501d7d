//! Helpers for command-shaped sink values.
//!
//! A command is an opaque `{action, payload, executeAt?}` map forwarded to
//! the transport layer. The engine only looks inside for two reasons:
//! computing a discrete signature for the oscillation watchdog, and keying
//! commands in a bundle so only the changed ones are re-delivered.

use crate::engine::value::{Value, ValueMap};
use std::collections::{HashMap, HashSet};

/// Payload fields that make up a command's discrete signature.
const SIGNATURE_FIELDS: &[&str] = &["mode", "waveform", "sceneId", "transition"];

/// Quantization steps for blink-style actions.
const FREQUENCY_STEP_HZ: f64 = 0.5;
const DUTY_STEP: f64 = 0.05;

/// Borrowed view of a command value.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    map: &'a ValueMap,
}

impl<'a> Command<'a> {
    /// View a value as a command if it is a map with a string `action`.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        let map = value.as_map()?;
        map.get("action")?.as_str()?;
        Some(Self { map })
    }

    pub fn action(&self) -> &'a str {
        self.map
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn payload(&self) -> Option<&'a Value> {
        self.map.get("payload")
    }

    pub fn execute_at(&self) -> Option<f64> {
        self.map.get("executeAt").and_then(Value::as_f64)
    }

    /// Look a field up in the payload first, then on the command itself.
    fn field(&self, key: &str) -> Option<&'a Value> {
        self.payload()
            .and_then(|p| p.get(key))
            .or_else(|| self.map.get(key))
    }

    /// Discrete signature of this command, or `None` for continuously
    /// varying actions that must never count as oscillation.
    pub fn signature(&self, continuous: &HashSet<String>) -> Option<String> {
        let action = self.action();
        if continuous.contains(action) {
            return None;
        }

        let mut sig = action.to_string();
        for key in SIGNATURE_FIELDS {
            if let Some(v) = self.field(key).and_then(scalar_text) {
                sig.push_str(&format!("|{}={}", key, v));
            }
        }

        if is_blink_action(action) {
            if let Some(hz) = self.field("frequency").and_then(Value::as_f64) {
                sig.push_str(&format!("|f={}", quantize(hz, FREQUENCY_STEP_HZ)));
            }
            if let Some(duty) = self.field("duty").and_then(Value::as_f64) {
                sig.push_str(&format!("|d={}", quantize(duty, DUTY_STEP)));
            }
        }

        Some(sig)
    }
}

fn is_blink_action(action: &str) -> bool {
    let lower = action.to_ascii_lowercase();
    lower.contains("blink") || lower.contains("strobe")
}

fn quantize(value: f64, step: f64) -> i64 {
    (value / step).round() as i64
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Every command found in a sink value, flattening nested lists.
pub fn commands_in(value: &Value) -> Vec<Command<'_>> {
    let mut out = Vec::new();
    collect_commands(value, &mut out);
    out
}

fn collect_commands<'a>(value: &'a Value, out: &mut Vec<Command<'a>>) {
    match value {
        Value::List(items) => items.iter().for_each(|v| collect_commands(v, out)),
        other => {
            if let Some(cmd) = Command::from_value(other) {
                out.push(cmd);
            }
        }
    }
}

/// Whether a sink value carries commands.
pub fn carries_commands(value: &Value) -> bool {
    !commands_in(value).is_empty()
}

/// Combined discrete signature of a whole sink value.
///
/// Continuous commands are left out; `None` when nothing discrete remains.
pub fn value_signature(value: &Value, continuous: &HashSet<String>) -> Option<String> {
    let parts: Vec<String> = commands_in(value)
        .iter()
        .filter_map(|c| c.signature(continuous))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(";"))
    }
}

/// Identity key of each item: the discriminant plus its occurrence index,
/// so the second `flash` in a bundle is always `flash#1`.
fn identity_keys(items: &[Value]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    items
        .iter()
        .map(|item| {
            let discriminant = item
                .get("action")
                .or_else(|| item.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("_")
                .to_string();
            let n = seen.entry(discriminant.clone()).or_insert(0);
            let key = format!("{}#{}", discriminant, n);
            *n += 1;
            key
        })
        .collect()
}

/// Commands of `next` that differ from their identity-matched counterpart in
/// `previous`.
///
/// Returns `None` when the values are not both command bundles, meaning the
/// whole value must be delivered.
pub fn changed_commands(previous: &Value, next: &Value) -> Option<Vec<Value>> {
    let (Some(prev_items), Some(next_items)) = (previous.as_list(), next.as_list()) else {
        return None;
    };
    if !carries_commands(next) {
        return None;
    }

    let prev_by_key: HashMap<String, &Value> = identity_keys(prev_items)
        .into_iter()
        .zip(prev_items.iter())
        .collect();

    Some(
        identity_keys(next_items)
            .into_iter()
            .zip(next_items.iter())
            .filter(|(key, item)| prev_by_key.get(key) != Some(item))
            .map(|(_, item)| item.clone())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn continuous() -> HashSet<String> {
        HashSet::from(["modulateColor".to_string()])
    }

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_signature_uses_discrete_fields_only() {
        let a = v(json!({"action": "flash", "payload": {"mode": "on", "level": 0.3}}));
        let b = v(json!({"action": "flash", "payload": {"mode": "on", "level": 0.9}}));
        let sa = Command::from_value(&a).unwrap().signature(&continuous());
        let sb = Command::from_value(&b).unwrap().signature(&continuous());
        assert_eq!(sa, Some("flash|mode=on".to_string()));
        assert_eq!(sa, sb);
    }

    #[test]
    fn test_signature_skips_continuous_actions() {
        let a = v(json!({"action": "modulateColor", "payload": {"hue": 0.1}}));
        assert_eq!(Command::from_value(&a).unwrap().signature(&continuous()), None);
        assert_eq!(value_signature(&a, &continuous()), None);
    }

    #[test]
    fn test_blink_frequency_is_quantized() {
        let a = v(json!({"action": "blink", "payload": {"frequency": 4.1, "duty": 0.5}}));
        let b = v(json!({"action": "blink", "payload": {"frequency": 3.9, "duty": 0.51}}));
        let c = v(json!({"action": "blink", "payload": {"frequency": 8.0, "duty": 0.5}}));
        let sig = |x: &Value| Command::from_value(x).unwrap().signature(&continuous());
        assert_eq!(sig(&a), sig(&b));
        assert_ne!(sig(&a), sig(&c));
    }

    #[test]
    fn test_commands_in_flattens_lists() {
        let value = v(json!([
            {"action": "flash"},
            [{"action": "tone"}, 3],
            "noise"
        ]));
        let actions: Vec<_> = commands_in(&value).iter().map(|c| c.action()).collect();
        assert_eq!(actions, vec!["flash", "tone"]);
    }

    #[test]
    fn test_changed_commands_keys_by_occurrence() {
        let prev = v(json!([
            {"action": "flash", "payload": {"on": true}},
            {"action": "tone", "payload": {"hz": 440}},
            {"action": "flash", "payload": {"on": false}}
        ]));
        let next = v(json!([
            {"action": "flash", "payload": {"on": true}},
            {"action": "tone", "payload": {"hz": 880}},
            {"action": "flash", "payload": {"on": false}}
        ]));
        let changed = changed_commands(&prev, &next).unwrap();
        assert_eq!(changed, vec![v(json!({"action": "tone", "payload": {"hz": 880}}))]);
        assert!(changed_commands(&next, &next).unwrap().is_empty());
    }

    #[test]
    fn test_changed_commands_requires_bundles() {
        let single = v(json!({"action": "flash"}));
        assert!(changed_commands(&single, &single).is_none());
        let numbers = v(json!([1, 2]));
        assert!(changed_commands(&numbers, &numbers).is_none());
    }

    #[test]
    fn test_execute_at_preserved() {
        let a = v(json!({"action": "flash", "executeAt": 1200}));
        assert_eq!(Command::from_value(&a).unwrap().execute_at(), Some(1200.0));
    }
}
