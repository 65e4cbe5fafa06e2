//! Seeder & persister (C5): the "Room". Fetches a workflow via REST, seeds
//! the CRDT document, and debounce-saves it back whenever it goes dirty.

use crate::dispatcher::QueryDispatcher;
use crate::prelude::*;
use crate::registry::{DocumentRegistry, WorkflowEntry};
use crate::resolver;
use crate::rest_client::RestClient;
use coordinator_crdt::node_types::{ConnectionPort, NodeTypeCache, NodeTypeDescription};
use coordinator_crdt::wire::{Envelope, MessageType};
use coordinator_crdt::workflow_doc::{EdgeRecord, NodeRecord, WorkflowPayload};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns the debounced-save lifecycle for one workflow document, plus the
/// debounced expression-resolution sweep triggered by parameter edits.
pub struct Room {
	workflow_id: String,
	base_url: String,
	entry: Arc<WorkflowEntry>,
	registry: Arc<DocumentRegistry>,
	rest: Arc<RestClient>,
	broadcast: Arc<BroadcastManager<Vec<u8>>>,
	config: Arc<CoordinatorConfig>,
	generation: AtomicU64,
	resolve_generation: AtomicU64,
}

impl Room {
	pub fn new(
		workflow_id: String,
		base_url: String,
		entry: Arc<WorkflowEntry>,
		registry: Arc<DocumentRegistry>,
		rest: Arc<RestClient>,
		broadcast: Arc<BroadcastManager<Vec<u8>>>,
		config: Arc<CoordinatorConfig>,
	) -> Self {
		Self {
			workflow_id,
			base_url,
			entry,
			registry,
			rest,
			broadcast,
			config,
			generation: AtomicU64::new(0),
			resolve_generation: AtomicU64::new(0),
		}
	}

	/// Seed the document from `GET <baseUrl>/rest/workflows/<id>`, awaiting
	/// the node-types cache first. No-op if already seeded.
	pub async fn seed(&self, dispatcher: &QueryDispatcher) -> CoordResult<()> {
		if self.entry.is_seeded() {
			return Ok(());
		}
		dispatcher.wait_for_node_types().await;
		let node_types = build_node_type_cache(&dispatcher.node_types_snapshot().await);

		let raw = self.rest.get_workflow(&self.base_url, &self.workflow_id).await?;
		let payload = payload_from_rest_json(&raw)?;
		self.entry.doc.seed(&payload, &node_types);
		if let Some(version_id) = &payload.version_id {
			*self.entry.last_version_id.write().await = Some(version_id.clone());
		}
		self.entry.mark_seeded();
		Ok(())
	}

	/// Mark the document dirty and schedule a debounced save. Superseded by
	/// any later call within the debounce window.
	pub fn schedule_save(self: &Arc<Self>) {
		self.entry.mark_dirty();
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let room = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(room.config.save_debounce).await;
			if room.generation.load(Ordering::SeqCst) != generation {
				return; // superseded by a later edit
			}
			if let Err(err) = room.flush().await {
				warn!(workflow_id = %room.workflow_id, error = %err, "debounced save failed");
			}
		});
	}

	/// Await any pending debounce and save unconditionally if dirty.
	pub async fn final_save(&self) -> CoordResult<()> {
		self.flush().await
	}

	/// §4.7 trigger point 2: debounce-trigger a full expression-resolution
	/// sweep after a node parameter edit. Superseded by any later call within
	/// the debounce window, matching [`Self::schedule_save`]'s pattern.
	pub fn schedule_resolve(self: &Arc<Self>) {
		let generation = self.resolve_generation.fetch_add(1, Ordering::SeqCst) + 1;
		let room = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(room.config.param_debounce).await;
			if room.resolve_generation.load(Ordering::SeqCst) != generation {
				return; // superseded by a later edit
			}
			let exec_doc_id = DocId::execution(&room.workflow_id);
			let execution = room.registry.get_or_create_execution(exec_doc_id.as_str()).await;
			resolver::resolve_workflow(&room.entry, &execution);

			let update = execution.doc.encode_state_as_update();
			let envelope = Envelope::new(MessageType::Sync, exec_doc_id.clone(), update).encode();
			room.broadcast.broadcast(&exec_doc_id, envelope, None).await;
		});
	}

	async fn flush(&self) -> CoordResult<()> {
		if !self.entry.take_dirty() {
			return Ok(());
		}
		let payload = self.entry.doc.to_payload(&self.workflow_id);
		let body = workflow_payload_to_rest_body(&payload);
		match self.rest.save_workflow(&self.base_url, &self.workflow_id, &body).await {
			Ok(()) => Ok(()),
			Err(err) => {
				self.entry.mark_dirty(); // leave dirty so the next tick retries
				Err(err)
			}
		}
	}
}

pub(crate) fn build_node_type_cache(rows: &HashMap<String, Value>) -> NodeTypeCache {
	let mut cache = NodeTypeCache::new();
	for (key, row) in rows {
		let name = row.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
		let version = row.get("version").and_then(Value::as_u64).unwrap_or(1) as u32;
		let ports = |field: &str| -> Vec<ConnectionPort> {
			row.get(field)
				.and_then(Value::as_array)
				.map(|arr| {
					arr.iter()
						.map(|p| ConnectionPort {
							connection_type: p.as_str().unwrap_or("main").to_string(),
						})
						.collect()
				})
				.unwrap_or_else(|| vec![ConnectionPort::main()])
		};
		cache.insert(
			key.clone(),
			NodeTypeDescription {
				name,
				version,
				inputs: ports("inputs"),
				outputs: ports("outputs"),
				is_trigger: row.get("isTrigger").and_then(Value::as_bool).unwrap_or(false),
			},
		);
	}
	cache
}

/// Parse a REST workflow response (`connections` in n8n's object-of-arrays
/// form, keyed by source node name) into our flat internal payload.
pub fn payload_from_rest_json(raw: &Value) -> CoordResult<WorkflowPayload> {
	let id = raw.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
	let name = raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
	let version_id = raw.get("versionId").and_then(Value::as_str).map(str::to_string);
	let settings = raw.get("settings").cloned().unwrap_or(json!({}));
	let pin_data = raw.get("pinData").cloned().unwrap_or(json!({}));

	let nodes: Vec<NodeRecord> = raw
		.get("nodes")
		.and_then(Value::as_array)
		.map(|arr| arr.iter().filter_map(node_record_from_rest).collect())
		.unwrap_or_default();

	let name_to_id: HashMap<&str, &str> =
		nodes.iter().map(|n| (n.name.as_str(), n.id.as_str())).collect();

	let edges = raw
		.get("connections")
		.map(|connections| connections_to_edges(connections, &name_to_id))
		.unwrap_or_default();

	Ok(WorkflowPayload { id, name, nodes, edges, settings, pin_data, version_id })
}

fn node_record_from_rest(value: &Value) -> Option<NodeRecord> {
	Some(NodeRecord {
		id: value.get("id")?.as_str()?.to_string(),
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
		always_output_data: value
			.get("alwaysOutputData")
			.and_then(Value::as_bool)
			.unwrap_or(false),
	})
}

/// `{ [sourceName]: { [connectionType]: [ [ {node, type, index}, ... ], ... ] } }`.
fn connections_to_edges(connections: &Value, name_to_id: &HashMap<&str, &str>) -> Vec<EdgeRecord> {
	let Value::Object(by_source) = connections else {
		return Vec::new();
	};
	let mut edges = Vec::new();
	for (source_name, by_type) in by_source {
		let Some(source_id) = name_to_id.get(source_name.as_str()) else { continue };
		let Value::Object(by_type) = by_type else { continue };
		for (connection_type, output_groups) in by_type {
			let Value::Array(output_groups) = output_groups else { continue };
			for (output_index, targets) in output_groups.iter().enumerate() {
				let Value::Array(targets) = targets else { continue };
				for target in targets {
					let Some(target_name) = target.get("node").and_then(Value::as_str) else {
						continue;
					};
					let Some(target_id) = name_to_id.get(target_name) else { continue };
					let target_index =
						target.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
					edges.push(EdgeRecord {
						id: format!("{source_id}:{connection_type}:{output_index}->{target_id}"),
						source: (*source_id).to_string(),
						target: (*target_id).to_string(),
						source_handle: format!("outputs/{connection_type}/{output_index}"),
						target_handle: format!("inputs/{connection_type}/{target_index}"),
					});
				}
			}
		}
	}
	edges
}

/// Build the PATCH body from the current in-memory payload, converting our
/// flat edges back into n8n's `connections` object form.
pub fn workflow_payload_to_rest_body(payload: &WorkflowPayload) -> Value {
	let id_to_name: HashMap<&str, &str> =
		payload.nodes.iter().map(|n| (n.id.as_str(), n.name.as_str())).collect();

	json!({
		"name": payload.name,
		"nodes": payload.nodes.iter().map(node_record_to_rest).collect::<Vec<_>>(),
		"connections": edges_to_connections(&payload.edges, &id_to_name),
		"settings": payload.settings,
		"pinData": payload.pin_data,
		"autosaved": true,
	})
}

pub(crate) fn node_record_to_rest(node: &NodeRecord) -> Value {
	json!({
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
	})
}

pub(crate) fn edges_to_connections(edges: &[EdgeRecord], id_to_name: &HashMap<&str, &str>) -> Value {
	// source name -> connection type -> output index -> target refs
	let mut by_source: HashMap<String, HashMap<String, Vec<Vec<Value>>>> = HashMap::new();
	for edge in edges {
		let Some(source_name) = id_to_name.get(edge.source.as_str()) else { continue };
		let Some(target_name) = id_to_name.get(edge.target.as_str()) else { continue };
		let (connection_type, output_index) = parse_handle(&edge.source_handle);
		let (_, target_index) = parse_handle(&edge.target_handle);

		let groups = by_source.entry(source_name.to_string()).or_default().entry(connection_type.clone()).or_default();
		while groups.len() <= output_index {
			groups.push(Vec::new());
		}
		groups[output_index].push(json!({
			"node": target_name,
			"type": connection_type,
			"index": target_index,
		}));
	}

	let mut out = Map::new();
	for (source_name, by_type) in by_source {
		let mut type_map = Map::new();
		for (connection_type, groups) in by_type {
			type_map.insert(connection_type, Value::Array(groups.into_iter().map(Value::Array).collect()));
		}
		out.insert(source_name, Value::Object(type_map));
	}
	Value::Object(out)
}

fn parse_handle(handle: &str) -> (String, usize) {
	let mut parts = handle.split('/');
	let _direction = parts.next();
	let connection_type = parts.next().unwrap_or("main").to_string();
	let index = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
	(connection_type, index)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rest_payload_round_trips_connections_through_flat_edges() {
		let raw = json!({
			"id": "wf-1",
			"name": "Demo",
			"nodes": [
				{"id": "n1", "name": "Start", "type": "n8n-nodes-base.manualTrigger", "typeVersion": 1, "position": [0.0, 0.0]},
				{"id": "n2", "name": "Set", "type": "n8n-nodes-base.set", "typeVersion": 1, "position": [1.0, 0.0]},
			],
			"connections": {
				"Start": { "main": [ [ { "node": "Set", "type": "main", "index": 0 } ] ] }
			},
		});

		let payload = payload_from_rest_json(&raw).unwrap();
		assert_eq!(payload.edges.len(), 1);
		assert_eq!(payload.edges[0].source, "n1");
		assert_eq!(payload.edges[0].target, "n2");
		assert_eq!(payload.edges[0].source_handle, "outputs/main/0");

		let body = workflow_payload_to_rest_body(&payload);
		let roundtrip_targets = &body["connections"]["Start"]["main"][0];
		assert_eq!(roundtrip_targets[0]["node"], "Set");
	}
}

// vim: ts=4
