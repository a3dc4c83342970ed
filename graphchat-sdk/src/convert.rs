//! Conversion between `serde_json::Value` and the CRDT's `yrs::Any`.
//!
//! Yjs peers store numbers as IEEE doubles, so integers are written as
//! `Any::Number` while they are exactly representable and read back as JSON
//! integers when they have no fractional part.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Number, Value};
use yrs::Any;

/// Largest integer a double represents exactly (JS `Number.MAX_SAFE_INTEGER`).
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => number_to_any(n),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect()),
        Value::Object(fields) => {
            let map: HashMap<String, Any> = fields
                .iter()
                .map(|(key, value)| (key.clone(), json_to_any(value)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

fn number_to_any(n: &Number) -> Any {
    match n.as_i64() {
        Some(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => Any::Number(i as f64),
        Some(i) => Any::BigInt(i),
        None => Any::Number(n.as_f64().unwrap_or_default()),
    }
}

pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => double_to_json(*n),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), any_to_json(value)))
                .collect(),
        ),
    }
}

fn double_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
        Value::from(n as i64)
    } else {
        // NaN and infinities have no JSON form
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_record_survives_conversion() {
        let record = json!({
            "id": 1755220895624i64,
            "date": "2025-08-15T01:21:35.624Z",
            "sender": "You",
            "content": "<p>das</p>"
        });
        assert_eq!(any_to_json(&json_to_any(&record)), record);
    }

    #[test]
    fn test_integers_are_stored_as_doubles() {
        assert_eq!(json_to_any(&json!(42)), Any::Number(42.0));
        assert_eq!(json_to_any(&json!(i64::MAX)), Any::BigInt(i64::MAX));
    }

    #[test]
    fn test_whole_doubles_read_back_as_integers() {
        assert_eq!(any_to_json(&Any::Number(3.0)), json!(3));
        assert_eq!(any_to_json(&Any::Number(2.5)), json!(2.5));
        assert_eq!(any_to_json(&Any::Number(f64::NAN)), Value::Null);
    }

    #[test]
    fn test_nested_structures() {
        let value = json!({"out_node_id": ["a", "b"], "meta": {"weight": 0.5, "tags": []}});
        assert_eq!(any_to_json(&json_to_any(&value)), value);
    }

    #[test]
    fn test_undefined_and_buffer() {
        assert_eq!(any_to_json(&Any::Undefined), Value::Null);
        let buffer = Any::Buffer(Arc::from(vec![1u8, 2, 3]));
        assert_eq!(any_to_json(&buffer), json!([1, 2, 3]));
    }
}
