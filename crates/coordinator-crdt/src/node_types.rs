//! Node-type descriptions and handle computation.
//!
//! A node's handle metadata (its current set of input/output connectors) is a
//! pure function of its parameters and its node-type description. The
//! coordinator recomputes it whenever either input changes and stores the
//! result on the node for fast UI lookup, per the workflow document's
//! handle-consistency invariant.

use serde_json::Value;
use std::collections::HashMap;

/// A single input or output connector on a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPort {
	pub connection_type: String,
}

impl ConnectionPort {
	pub fn main() -> Self {
		Self { connection_type: "main".into() }
	}
}

/// Static description of a node type, as loaded from the active peer's
/// node-types cache (`<name>@<version>` keyed).
#[derive(Debug, Clone)]
pub struct NodeTypeDescription {
	pub name: String,
	pub version: u32,
	pub inputs: Vec<ConnectionPort>,
	pub outputs: Vec<ConnectionPort>,
	pub is_trigger: bool,
}

impl NodeTypeDescription {
	pub fn key(&self) -> String {
		format!("{}@{}", self.name, self.version)
	}
}

/// Computed handle set for a node, written back into the workflow document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeHandles {
	pub inputs: Vec<String>,
	pub outputs: Vec<String>,
}

/// A loaded cache of node-type descriptions keyed by `<name>@<version>`.
pub type NodeTypeCache = HashMap<String, NodeTypeDescription>;

/// Compute a node's handle set from its current parameters and node type.
///
/// Outputs whose port count is itself parameter-driven (e.g. a Switch node's
/// number of output branches) read that count from `parameters`; everything
/// else falls back to the node type's static port list.
pub fn compute_handles(parameters: &Value, node_type: &NodeTypeDescription) -> NodeHandles {
	let inputs = node_type
		.inputs
		.iter()
		.enumerate()
		.map(|(i, port)| format!("inputs/{}/{}", port.connection_type, i))
		.collect();

	let dynamic_output_count = parameters
		.get("numberOutputs")
		.and_then(Value::as_u64)
		.map(|n| n as usize);

	let outputs = if let Some(count) = dynamic_output_count {
		let connection_type =
			node_type.outputs.first().map_or("main", |p| p.connection_type.as_str());
		(0..count).map(|i| format!("outputs/{connection_type}/{i}")).collect()
	} else {
		node_type
			.outputs
			.iter()
			.enumerate()
			.map(|(i, port)| format!("outputs/{}/{}", port.connection_type, i))
			.collect()
	};

	NodeHandles { inputs, outputs }
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn sample_node_type() -> NodeTypeDescription {
		NodeTypeDescription {
			name: "n8n-nodes-base.set".into(),
			version: 1,
			inputs: vec![ConnectionPort::main()],
			outputs: vec![ConnectionPort::main()],
			is_trigger: false,
		}
	}

	#[test]
	fn static_handles_follow_node_type() {
		let handles = compute_handles(&json!({}), &sample_node_type());
		assert_eq!(handles.inputs, vec!["inputs/main/0"]);
		assert_eq!(handles.outputs, vec!["outputs/main/0"]);
	}

	#[test]
	fn dynamic_output_count_overrides_static_ports() {
		let handles = compute_handles(&json!({"numberOutputs": 3}), &sample_node_type());
		assert_eq!(handles.outputs.len(), 3);
		assert_eq!(handles.outputs[2], "outputs/main/2");
	}

	#[test]
	fn node_type_key_combines_name_and_version() {
		assert_eq!(sample_node_type().key(), "n8n-nodes-base.set@1");
	}
}

// vim: ts=4
