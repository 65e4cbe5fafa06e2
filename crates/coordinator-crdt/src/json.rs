//! Conversion between `serde_json::Value` and yrs's `Any` leaf type.
//!
//! Node parameters, settings, and pinned items are stored as opaque JSON
//! blobs inside the CRDT (`Any::Map` / `Any::Array`), not as nested Y.Map/Y.Array
//! shared types — fine-grained field-level merge inside `parameters` is not a
//! requirement here; what matters is that replacing a node's `parameters` key
//! is observable at the node-entry level, which a plain `Any` value already is.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use yrs::Any;

pub fn json_to_any(value: &Value) -> Any {
	match value {
		Value::Null => Any::Null,
		Value::Bool(b) => Any::Bool(*b),
		Value::Number(n) => Any::Number(n.as_f64().unwrap_or(0.0)),
		Value::String(s) => Any::String(s.as_str().into()),
		Value::Array(items) => {
			let converted: Vec<Any> = items.iter().map(json_to_any).collect();
			Any::Array(converted.into())
		}
		Value::Object(map) => {
			let converted: HashMap<String, Any> =
				map.iter().map(|(k, v)| (k.clone(), json_to_any(v))).collect();
			Any::Map(Box::new(converted))
		}
	}
}

pub fn any_to_json(value: &Any) -> Value {
	match value {
		Any::Null | Any::Undefined => Value::Null,
		Any::Bool(b) => Value::Bool(*b),
		Any::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
		Any::BigInt(n) => Value::Number((*n).into()),
		Any::String(s) => Value::String(s.to_string()),
		Any::Buffer(bytes) => {
			Value::Array(bytes.iter().map(|b| Value::Number((*b).into())).collect())
		}
		Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
		Any::Map(map) => {
			let mut obj = Map::new();
			for (k, v) in map.iter() {
				obj.insert(k.clone(), any_to_json(v));
			}
			Value::Object(obj)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn round_trips_nested_object() {
		let value = json!({"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}});
		let any = json_to_any(&value);
		assert_eq!(any_to_json(&any), value);
	}

	#[test]
	fn round_trips_empty_array_and_object() {
		assert_eq!(any_to_json(&json_to_any(&json!([]))), json!([]));
		assert_eq!(any_to_json(&json_to_any(&json!({}))), json!({}));
	}
}

// vim: ts=4
