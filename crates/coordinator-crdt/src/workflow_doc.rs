//! The workflow document (`D_w`): nodes, edges, pinned data, and settings as
//! a Yjs CRDT document.

use crate::json::{any_to_json, json_to_any};
use crate::node_types::{compute_handles, NodeHandles, NodeTypeCache};
use crate::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::{Doc, In, Map, ReadTxn, Transact, Update};

/// A single node as exchanged with the REST API / execution invoker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
	pub id: String,
	pub name: String,
	#[serde(rename = "type")]
	pub node_type: String,
	pub type_version: u32,
	pub position: [f64; 2],
	#[serde(default)]
	pub parameters: Value,
	#[serde(default)]
	pub disabled: bool,
	#[serde(default)]
	pub notes: Option<String>,
	#[serde(default)]
	pub retry_on_fail: bool,
	#[serde(default)]
	pub always_output_data: bool,
}

/// A single edge, in the coordinator's flattened representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
	pub id: String,
	pub source: String,
	pub target: String,
	pub source_handle: String,
	pub target_handle: String,
}

/// The full workflow, as loaded from / saved to `<base>/rest/workflows/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPayload {
	pub id: String,
	pub name: String,
	pub nodes: Vec<NodeRecord>,
	pub edges: Vec<EdgeRecord>,
	#[serde(default)]
	pub settings: Value,
	#[serde(default)]
	pub pin_data: Value,
	pub version_id: Option<String>,
}

/// A Yjs CRDT document hosting one workflow's collaborative state.
pub struct WorkflowDoc {
	pub doc: Doc,
}

impl Default for WorkflowDoc {
	fn default() -> Self {
		Self::new()
	}
}

impl WorkflowDoc {
	pub fn new() -> Self {
		let doc = Doc::new();
		doc.get_or_insert_map("meta");
		doc.get_or_insert_map("nodes");
		doc.get_or_insert_map("edges");
		doc.get_or_insert_map("pinData");
		Self { doc }
	}

	/// Seed the document from a freshly-fetched workflow payload, computing
	/// initial handle metadata for every node. Runs in one transaction.
	pub fn seed(&self, workflow: &WorkflowPayload, node_types: &NodeTypeCache) {
		let meta = self.doc.get_or_insert_map("meta");
		let nodes = self.doc.get_or_insert_map("nodes");
		let edges = self.doc.get_or_insert_map("edges");
		let pin_data = self.doc.get_or_insert_map("pinData");

		let mut txn = self.doc.transact_mut();
		meta.insert(&mut txn, "name", In::Any(json_to_any(&json!(workflow.name))));
		meta.insert(&mut txn, "settings", In::Any(json_to_any(&workflow.settings)));
		if let Some(version_id) = &workflow.version_id {
			meta.insert(&mut txn, "versionId", In::Any(json_to_any(&json!(version_id))));
		}

		for node in &workflow.nodes {
			let handles = node_types
				.get(&format!("{}@{}", node.node_type, node.type_version))
				.map(|nt| compute_handles(&node.parameters, nt))
				.unwrap_or_default();
			let node_value = node_to_any(node, &handles);
			nodes.insert(&mut txn, node.id.as_str(), In::Any(node_value));
		}

		for edge in &workflow.edges {
			edges.insert(&mut txn, edge.id.as_str(), In::Any(edge_to_any(edge)));
		}

		if let Value::Object(pins) = &workflow.pin_data {
			for (node_id, items) in pins {
				pin_data.insert(&mut txn, node_id.as_str(), In::Any(json_to_any(items)));
			}
		}
	}

	pub fn apply_update(&self, bytes: &[u8]) -> CoordResult<()> {
		let update = Update::decode_v1(bytes)
			.map_err(|e| Error::Serialization(format!("invalid CRDT update: {e}")))?;
		let mut txn = self.doc.transact_mut();
		txn.apply_update(update)
			.map_err(|e| Error::Serialization(format!("failed to apply CRDT update: {e}")))?;
		Ok(())
	}

	pub fn encode_state_as_update(&self) -> Vec<u8> {
		let sv = yrs::StateVector::default();
		let txn = self.doc.transact();
		txn.encode_state_as_update_v1(&sv)
	}

	/// Recompute and store a single node's handle metadata. Called whenever
	/// its `parameters` or `typeVersion` change.
	pub fn recompute_node_handles(
		&self,
		node_id: &str,
		node_types: &NodeTypeCache,
	) -> CoordResult<()> {
		let nodes = self.doc.get_or_insert_map("nodes");
		let mut txn = self.doc.transact_mut();
		let Some(existing) = nodes.get(&txn, node_id) else {
			return Err(Error::UnknownDocument(format!("node {node_id} not found")));
		};
		let mut node_json = any_to_json(&existing.to_json(&txn));

		let type_name = node_json.get("type").and_then(Value::as_str).unwrap_or_default();
		let type_version = node_json.get("typeVersion").and_then(Value::as_u64).unwrap_or(1);
		let node_type_key = format!("{type_name}@{type_version}");
		let parameters = node_json.get("parameters").cloned().unwrap_or(Value::Null);

		let Some(nt) = node_types.get(&node_type_key) else {
			return Ok(()); // node type not loaded yet; nothing to recompute
		};
		let handles = compute_handles(&parameters, nt);
		node_json["handles"] = json!({"inputs": handles.inputs, "outputs": handles.outputs});
		nodes.insert(&mut txn, node_id, In::Any(json_to_any(&node_json)));
		Ok(())
	}

	/// Rewrite every expression string referencing `old_name` to `new_name`.
	/// Runs in a single transaction; returns the number of nodes touched.
	pub fn rename_node(&self, old_name: &str, new_name: &str) -> CoordResult<usize> {
		let nodes = self.doc.get_or_insert_map("nodes");
		let mut txn = self.doc.transact_mut();
		let entries: Vec<(String, Value)> = nodes
			.iter(&txn)
			.map(|(id, out)| (id.to_string(), any_to_json(&out.to_json(&txn))))
			.collect();

		let mut rewritten = 0usize;
		for (node_id, mut node_json) in entries {
			let params = node_json.get("parameters").cloned().unwrap_or(Value::Null);
			let mut rewritten_this_node = false;
			let new_params = rewrite_value(&params, old_name, new_name, &mut rewritten_this_node);
			if rewritten_this_node {
				node_json["parameters"] = new_params;
				nodes.insert(&mut txn, node_id.as_str(), In::Any(json_to_any(&node_json)));
				rewritten += 1;
			}
		}
		Ok(rewritten)
	}

	/// Build the flat payload used for REST saves and the execution invoker.
	pub fn to_payload(&self, id: &str) -> WorkflowPayload {
		let meta = self.doc.get_or_insert_map("meta");
		let nodes = self.doc.get_or_insert_map("nodes");
		let edges = self.doc.get_or_insert_map("edges");
		let pin_data = self.doc.get_or_insert_map("pinData");
		let txn = self.doc.transact();

		let name = meta
			.get(&txn, "name")
			.map(|v| any_to_json(&v.to_json(&txn)))
			.and_then(|v| v.as_str().map(str::to_string))
			.unwrap_or_default();
		let settings =
			meta.get(&txn, "settings").map(|v| any_to_json(&v.to_json(&txn))).unwrap_or(json!({}));
		let version_id = meta
			.get(&txn, "versionId")
			.map(|v| any_to_json(&v.to_json(&txn)))
			.and_then(|v| v.as_str().map(str::to_string));

		let node_records: Vec<NodeRecord> = nodes
			.iter(&txn)
			.filter_map(|(id, out)| any_to_node_record(id, &any_to_json(&out.to_json(&txn))))
			.collect();

		let edge_records: Vec<EdgeRecord> = edges
			.iter(&txn)
			.filter_map(|(id, out)| any_to_edge_record(id, &any_to_json(&out.to_json(&txn))))
			.collect();

		let mut pin_map = serde_json::Map::new();
		for (node_id, out) in pin_data.iter(&txn) {
			pin_map.insert(node_id.to_string(), any_to_json(&out.to_json(&txn)));
		}

		WorkflowPayload {
			id: id.to_string(),
			name,
			nodes: node_records,
			edges: edge_records,
			settings,
			pin_data: Value::Object(pin_map),
			version_id,
		}
	}

	/// Node id → node name, used to build the execution document's `nodeIndex`.
	pub fn node_names(&self) -> HashMap<String, String> {
		let nodes = self.doc.get_or_insert_map("nodes");
		let txn = self.doc.transact();
		nodes
			.iter(&txn)
			.map(|(id, out)| {
				let name = any_to_json(&out.to_json(&txn))
					.get("name")
					.and_then(Value::as_str)
					.unwrap_or(id)
					.to_string();
				(id.to_string(), name)
			})
			.collect()
	}
}

fn node_to_any(node: &NodeRecord, handles: &NodeHandles) -> yrs::Any {
	json_to_any(&json!({
		"id": node.id,
		"name": node.name,
		"type": node.node_type,
		"typeVersion": node.type_version,
		"position": node.position,
		"parameters": node.parameters,
		"disabled": node.disabled,
		"notes": node.notes,
		"retryOnFail": node.retry_on_fail,
		"alwaysOutputData": node.always_output_data,
		"handles": {"inputs": handles.inputs, "outputs": handles.outputs},
	}))
}

fn edge_to_any(edge: &EdgeRecord) -> yrs::Any {
	json_to_any(&json!({
		"source": edge.source,
		"target": edge.target,
		"sourceHandle": edge.source_handle,
		"targetHandle": edge.target_handle,
	}))
}

fn any_to_node_record(id: &str, value: &Value) -> Option<NodeRecord> {
	Some(NodeRecord {
		id: id.to_string(),
		name: value.get("name")?.as_str()?.to_string(),
		node_type: value.get("type")?.as_str()?.to_string(),
		type_version: value.get("typeVersion").and_then(Value::as_u64).unwrap_or(1) as u32,
		position: [
			value.get("position").and_then(|p| p.get(0)).and_then(Value::as_f64).unwrap_or(0.0),
			value.get("position").and_then(|p| p.get(1)).and_then(Value::as_f64).unwrap_or(0.0),
		],
		parameters: value.get("parameters").cloned().unwrap_or(json!({})),
		disabled: value.get("disabled").and_then(Value::as_bool).unwrap_or(false),
		notes: value.get("notes").and_then(Value::as_str).map(str::to_string),
		retry_on_fail: value.get("retryOnFail").and_then(Value::as_bool).unwrap_or(false),
		always_output_data: value.get("alwaysOutputData").and_then(Value::as_bool).unwrap_or(false),
	})
}

fn any_to_edge_record(id: &str, value: &Value) -> Option<EdgeRecord> {
	Some(EdgeRecord {
		id: id.to_string(),
		source: value.get("source")?.as_str()?.to_string(),
		target: value.get("target")?.as_str()?.to_string(),
		source_handle: value.get("sourceHandle")?.as_str()?.to_string(),
		target_handle: value.get("targetHandle")?.as_str()?.to_string(),
	})
}

fn rewrite_value(value: &Value, old_name: &str, new_name: &str, touched: &mut bool) -> Value {
	match value {
		Value::String(s) => {
			let rewritten = crate::expression::rewrite_node_references(s, old_name, new_name);
			if rewritten != *s {
				*touched = true;
			}
			Value::String(rewritten)
		}
		Value::Array(items) => {
			Value::Array(items.iter().map(|v| rewrite_value(v, old_name, new_name, touched)).collect())
		}
		Value::Object(map) => {
			let mut out = serde_json::Map::new();
			for (k, v) in map {
				out.insert(k.clone(), rewrite_value(v, old_name, new_name, touched));
			}
			Value::Object(out)
		}
		other => other.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node_types::{ConnectionPort, NodeTypeDescription};

	fn sample_workflow() -> WorkflowPayload {
		WorkflowPayload {
			id: "wf-1".into(),
			name: "Demo".into(),
			nodes: vec![NodeRecord {
				id: "n1".into(),
				name: "Set".into(),
				node_type: "n8n-nodes-base.set".into(),
				type_version: 1,
				position: [0.0, 0.0],
				parameters: json!({"value": "={{ $json.x }}"}),
				disabled: false,
				notes: None,
				retry_on_fail: false,
				always_output_data: false,
			}],
			edges: vec![],
			settings: json!({}),
			pin_data: json!({}),
			version_id: Some("v1".into()),
		}
	}

	fn node_types() -> NodeTypeCache {
		let mut cache = NodeTypeCache::new();
		cache.insert(
			"n8n-nodes-base.set@1".into(),
			NodeTypeDescription {
				name: "n8n-nodes-base.set".into(),
				version: 1,
				inputs: vec![ConnectionPort::main()],
				outputs: vec![ConnectionPort::main()],
				is_trigger: false,
			},
		);
		cache
	}

	#[test]
	fn seed_then_round_trip_to_payload() {
		let doc = WorkflowDoc::new();
		let workflow = sample_workflow();
		doc.seed(&workflow, &node_types());

		let payload = doc.to_payload("wf-1");
		assert_eq!(payload.name, "Demo");
		assert_eq!(payload.nodes.len(), 1);
		assert_eq!(payload.nodes[0].name, "Set");
		assert_eq!(payload.version_id.as_deref(), Some("v1"));
	}

	#[test]
	fn apply_update_merges_state_from_another_doc() {
		let a = WorkflowDoc::new();
		a.seed(&sample_workflow(), &node_types());
		let update = a.encode_state_as_update();

		let b = WorkflowDoc::new();
		b.apply_update(&update).unwrap();
		assert_eq!(b.to_payload("wf-1").nodes.len(), 1);
	}

	#[test]
	fn rename_node_rewrites_referencing_expressions() {
		let doc = WorkflowDoc::new();
		let mut workflow = sample_workflow();
		workflow.nodes.push(NodeRecord {
			id: "n2".into(),
			name: "Consumer".into(),
			node_type: "n8n-nodes-base.set".into(),
			type_version: 1,
			position: [1.0, 0.0],
			parameters: json!({"value": r#"={{ $("Set").item.json.x }}"#}),
			disabled: false,
			notes: None,
			retry_on_fail: false,
			always_output_data: false,
		});
		doc.seed(&workflow, &node_types());

		let touched = doc.rename_node("Set", "Set Renamed").unwrap();
		assert_eq!(touched, 1);

		let payload = doc.to_payload("wf-1");
		let consumer = payload.nodes.iter().find(|n| n.id == "n2").unwrap();
		assert_eq!(
			consumer.parameters.get("value").unwrap().as_str().unwrap(),
			r#"={{ $("Set Renamed").item.json.x }}"#
		);
	}

	#[test]
	fn recompute_node_handles_reflects_dynamic_output_count() {
		let doc = WorkflowDoc::new();
		let mut workflow = sample_workflow();
		workflow.nodes[0].parameters = json!({"numberOutputs": 2});
		doc.seed(&workflow, &node_types());

		doc.recompute_node_handles("n1", &node_types()).unwrap();
		let handles = node_handles_from_any(&doc, "n1");
		assert_eq!(handles.outputs.len(), 2);
	}

	fn node_handles_from_any(doc: &WorkflowDoc, node_id: &str) -> NodeHandles {
		let nodes = doc.doc.get_or_insert_map("nodes");
		let txn = doc.doc.transact();
		let Some(node) = nodes.get(&txn, node_id) else {
			return NodeHandles::default();
		};
		let handles_json = any_to_json(&node.to_json(&txn))
			.get("handles")
			.cloned()
			.unwrap_or(json!({"inputs": [], "outputs": []}));
		NodeHandles {
			inputs: handles_json["inputs"]
				.as_array()
				.map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
				.unwrap_or_default(),
			outputs: handles_json["outputs"]
				.as_array()
				.map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
				.unwrap_or_default(),
		}
	}
}

// vim: ts=4
