//! Push projector (C8): one outbound WebSocket for the coordinator's
//! lifetime, translating streaming execution events into CRDT updates on
//! the relevant execution documents.

use crate::prelude::*;
use crate::registry::DocumentRegistry;
use crate::resolver;
use coordinator_crdt::execution_doc::{EdgeRunStats, ExecutionMeta, TaskData};
use coordinator_crdt::wire::{Envelope, MessageType};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
	Idle,
	Connecting,
	Open,
	Closed,
}

/// Owns the singleton push connection and projects its frames onto
/// execution documents.
pub struct PushProjector {
	push_ref: String,
	registry: Arc<DocumentRegistry>,
	broadcast: Arc<BroadcastManager<Vec<u8>>>,
	config: Arc<CoordinatorConfig>,
	state: RwLock<ConnState>,
	connecting: Notify,
	generation: AtomicU64,
}

impl PushProjector {
	pub fn new(
		registry: Arc<DocumentRegistry>,
		broadcast: Arc<BroadcastManager<Vec<u8>>>,
		config: Arc<CoordinatorConfig>,
	) -> Self {
		Self {
			push_ref: format!("push-{}", random_id()),
			registry,
			broadcast,
			config,
			state: RwLock::new(ConnState::Idle),
			connecting: Notify::new(),
			generation: AtomicU64::new(0),
		}
	}

	pub fn push_ref(&self) -> &str {
		&self.push_ref
	}

	/// Idempotent, race-safe: concurrent callers share the in-flight attempt.
	pub async fn ensure_connection(self: &Arc<Self>, ws_base_url: &str) -> CoordResult<()> {
		loop {
			let mut state = self.state.write().await;
			match *state {
				ConnState::Open => return Ok(()),
				ConnState::Connecting => {
					drop(state);
					self.connecting.notified().await;
					continue;
				}
				ConnState::Idle | ConnState::Closed => {
					*state = ConnState::Connecting;
					drop(state);
					break;
				}
			}
		}

		let url = format!("{ws_base_url}/rest/push?pushRef={}", self.push_ref);
		let projector = self.clone();
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		tokio::spawn(async move {
			projector.run_connection(url, generation).await;
		});
		Ok(())
	}

	async fn run_connection(self: Arc<Self>, url: String, generation: u64) {
		let mut backoff = self.config.push_reconnect_backoff;
		loop {
			if self.generation.load(Ordering::SeqCst) != generation {
				return; // superseded by a newer connection attempt
			}
			match tokio_tungstenite::connect_async(&url).await {
				Ok((stream, _response)) => {
					*self.state.write().await = ConnState::Open;
					self.connecting.notify_waiters();
					backoff = self.config.push_reconnect_backoff;
					self.drive(stream).await;
					*self.state.write().await = ConnState::Closed;
					self.connecting.notify_waiters();
				}
				Err(err) => {
					warn!(error = %err, "push socket connect failed, backing off");
				}
			}
			if self.generation.load(Ordering::SeqCst) != generation {
				return;
			}
			tokio::time::sleep(backoff).await;
			backoff = std::cmp::min(backoff * 2, self.config.push_reconnect_backoff_max);
		}
	}

	async fn drive(
		&self,
		stream: tokio_tungstenite::WebSocketStream<
			tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
		>,
	) {
		let (mut tx, mut rx) = stream.split();
		let heartbeat_interval = self.config.heartbeat_interval;
		loop {
			tokio::select! {
				msg = rx.next() => {
					match msg {
						Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
						Some(Ok(Message::Binary(bytes))) => {
							if let Ok(text) = std::str::from_utf8(&bytes) {
								self.handle_frame(text).await;
							}
						}
						Some(Ok(Message::Close(_))) | None => {
							debug!("push socket closed by peer");
							return;
						}
						Some(Err(err)) => {
							warn!(error = %err, "push socket read error");
							return;
						}
						_ => {}
					}
				}
				() = tokio::time::sleep(heartbeat_interval) => {
					if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
						debug!("push socket ping failed, reconnecting");
						return;
					}
				}
			}
		}
	}

	async fn handle_frame(&self, text: &str) {
		let Ok(frame) = serde_json::from_str::<Value>(text) else {
			return; // malformed frame, dropped silently per protocol error handling
		};
		let Some(frame_type) = frame.get("type").and_then(Value::as_str) else {
			return;
		};
		let Some(workflow_id) = frame.get("workflowId").and_then(Value::as_str) else {
			return;
		};
		let exec_doc_id = DocId::execution(workflow_id);
		let execution = self.registry.get_or_create_execution(exec_doc_id.as_str()).await;

		let mut resolve_all = false;
		match frame_type {
			"executionStarted" => {
				let Some(execution_id) = frame.get("executionId").and_then(Value::as_str) else {
					return;
				};
				let started_at =
					frame.get("startedAt").and_then(Value::as_i64).unwrap_or_else(|| Timestamp::now().0);
				let mode = frame.get("mode").and_then(Value::as_str).unwrap_or("manual").to_string();

				let node_index = if let Some(workflow) = self.registry.workflow(workflow_id).await {
					workflow.doc.node_names()
				} else {
					std::collections::HashMap::new()
				};
				execution.doc.start_execution(
					&ExecutionMeta {
						execution_id: execution_id.to_string(),
						workflow_id: workflow_id.to_string(),
						status: "running".into(),
						mode,
						started_at,
						finished_at: None,
					},
					&node_index,
				);
			}
			// All three node-execute frame types nest their fields one level
			// under "data" — only `type`/`workflowId`/`nodeName` sit at the top.
			"nodeExecuteBefore" => {
				let Some(node_name) = frame.get("nodeName").and_then(Value::as_str) else { return };
				let data = frame.get("data");
				let task = TaskData {
					start_time: Timestamp::now().0,
					execution_index: data
						.and_then(|d| d.get("executionIndex"))
						.and_then(Value::as_u64)
						.unwrap_or(0) as u32,
					source: data.and_then(|d| d.get("source")).cloned().unwrap_or(Value::Array(vec![])),
					hints: data
						.and_then(|d| d.get("hints"))
						.and_then(Value::as_array)
						.cloned()
						.unwrap_or_default(),
					execution_status: "running".into(),
					execution_time: None,
					error: None,
					data: None,
				};
				let _ = execution.doc.push_task(node_name, &task);
			}
			"nodeExecuteAfter" | "nodeExecuteAfterData" => {
				let Some(node_name) = frame.get("nodeName").and_then(Value::as_str) else { return };
				let Some(data) = frame.get("data") else { return };
				let Some(execution_index) = data.get("executionIndex").and_then(Value::as_u64) else {
					return;
				};
				let mut patch = serde_json::Map::new();
				if let Some(status) = data.get("executionStatus") {
					patch.insert("executionStatus".into(), status.clone());
				}
				if let Some(time) = data.get("executionTime") {
					patch.insert("executionTime".into(), time.clone());
				}
				if let Some(error) = data.get("error") {
					patch.insert("error".into(), error.clone());
				}
				if frame_type == "nodeExecuteAfterData" {
					if let Some(inner_data) = data.get("data") {
						patch.insert("data".into(), inner_data.clone());
					}
					resolve_all = true;
				}
				let _ = execution.doc.patch_task(node_name, execution_index as u32, &Value::Object(patch));
				self.record_edges(&execution, workflow_id, node_name, &frame).await;
			}
			"executionFinished" => {
				let status =
					frame.get("status").and_then(Value::as_str).unwrap_or("success").to_string();
				execution.doc.finish_execution(&status, Timestamp::now().0);
			}
			_ => return, // heartbeat or unrecognized frame type, ignored
		}

		if resolve_all {
			if let Some(workflow) = self.registry.workflow(workflow_id).await {
				resolver::resolve_workflow(&workflow, &execution);
			}
		}

		let update = execution.doc.encode_state_as_update();
		let envelope = Envelope::new(MessageType::Sync, exec_doc_id.clone(), update).encode();
		self.broadcast.broadcast(&exec_doc_id, envelope, None).await;
	}

	/// `itemCountByConnectionType` maps each connection type to an array of
	/// item counts, one per output index (`{main: [1, 0]}` means output 0
	/// emitted 1 item, output 1 emitted none).
	async fn record_edges(
		&self,
		execution: &crate::registry::ExecutionEntry,
		workflow_id: &str,
		emitter_name: &str,
		frame: &Value,
	) {
		let Some(workflow) = self.registry.workflow(workflow_id).await else { return };
		let payload = workflow.doc.to_payload(workflow_id);
		let Some(by_connection_type) =
			frame.get("itemCountByConnectionType").and_then(Value::as_object)
		else {
			return;
		};
		let Some(emitter) = payload.nodes.iter().find(|n| n.name == emitter_name) else { return };

		for (connection_type, counts) in by_connection_type {
			let Some(counts) = counts.as_array() else { continue };
			for (output_index, item_count) in counts.iter().enumerate() {
				let Some(item_count) = item_count.as_u64() else { continue };
				let source_handle = format!("outputs/{connection_type}/{output_index}");
				for edge in
					payload.edges.iter().filter(|e| e.source == emitter.id && e.source_handle == source_handle)
				{
					let target_name =
						payload.nodes.iter().find(|n| n.id == edge.target).map(|n| n.name.clone());
					execution.doc.record_edge_items(
						&edge.id,
						&EdgeRunStats {
							source_node_name: emitter_name.to_string(),
							target_node_name: target_name,
							connection_type: connection_type.clone(),
							output_index,
							total_items: 0,
							iterations: 0,
						},
						item_count,
					);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::{DocMode, DocumentRegistry};
	use coordinator_crdt::node_types::{ConnectionPort, NodeTypeCache, NodeTypeDescription};
	use coordinator_crdt::workflow_doc::{EdgeRecord, NodeRecord, WorkflowPayload};
	use serde_json::json;

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

	async fn seeded_projector() -> (PushProjector, Arc<DocumentRegistry>) {
		let registry = Arc::new(DocumentRegistry::new());
		let entry = registry.get_or_create_workflow("wf-1", DocMode::Local).await;
		entry.doc.seed(
			&WorkflowPayload {
				id: "wf-1".into(),
				name: "Demo".into(),
				nodes: vec![
					NodeRecord {
						id: "n1".into(),
						name: "Start".into(),
						node_type: "n8n-nodes-base.set".into(),
						type_version: 1,
						position: [0.0, 0.0],
						parameters: json!({}),
						disabled: false,
						notes: None,
						retry_on_fail: false,
						always_output_data: false,
					},
					NodeRecord {
						id: "n2".into(),
						name: "Consumer".into(),
						node_type: "n8n-nodes-base.set".into(),
						type_version: 1,
						position: [1.0, 0.0],
						parameters: json!({"value": "={{ $json.x }}"}),
						disabled: false,
						notes: None,
						retry_on_fail: false,
						always_output_data: false,
					},
				],
				edges: vec![EdgeRecord {
					id: "e1".into(),
					source: "n1".into(),
					target: "n2".into(),
					source_handle: "outputs/main/0".into(),
					target_handle: "inputs/main/0".into(),
				}],
				settings: json!({}),
				pin_data: json!({}),
				version_id: None,
			},
			&node_types(),
		);

		let projector = PushProjector::new(
			registry.clone(),
			Arc::new(BroadcastManager::new()),
			Arc::new(CoordinatorConfig::default()),
		);
		(projector, registry)
	}

	/// S5: an `executionStarted` frame populates meta and builds the node
	/// index from the live workflow mirror, with empty run data and edges.
	#[tokio::test]
	async fn execution_started_seeds_meta_and_node_index() {
		let (projector, registry) = seeded_projector().await;
		let frame = json!({
			"type": "executionStarted",
			"workflowId": "wf-1",
			"executionId": "exec-1",
			"startedAt": 1_000,
			"mode": "manual",
		});
		projector.handle_frame(&frame.to_string()).await;

		let execution = registry.execution("exec-wf-1").await.unwrap();
		let meta = execution.doc.meta().unwrap();
		assert_eq!(meta.execution_id, "exec-1");
		assert_eq!(meta.status, "running");
		assert!(meta.finished_at.is_none());
	}

	/// S6: `nodeExecuteAfterData` updates the run data and flips a dependent
	/// node's resolved param from pending to valid.
	#[tokio::test]
	async fn node_execute_after_data_updates_run_data_and_resolves_dependents() {
		let (projector, registry) = seeded_projector().await;
		projector
			.handle_frame(
				&json!({
					"type": "executionStarted",
					"workflowId": "wf-1",
					"executionId": "exec-1",
					"startedAt": 0,
					"mode": "manual",
				})
				.to_string(),
			)
			.await;
		projector
			.handle_frame(
				&json!({
					"type": "nodeExecuteBefore",
					"workflowId": "wf-1",
					"nodeName": "Start",
					"data": {"executionIndex": 0},
				})
				.to_string(),
			)
			.await;
		projector
			.handle_frame(
				&json!({
					"type": "nodeExecuteAfterData",
					"workflowId": "wf-1",
					"nodeName": "Start",
					"data": {
						"executionIndex": 0,
						"executionStatus": "success",
						"executionTime": 5,
						"data": {"x": 42},
					},
					"itemCountByConnectionType": {"main": [1]},
				})
				.to_string(),
			)
			.await;

		let execution = registry.execution("exec-wf-1").await.unwrap();
		let resolved = execution.doc.resolved_param("n2", "value").unwrap();
		assert_eq!(resolved.state, coordinator_crdt::execution_doc::ResolvedParamState::Valid);
		assert_eq!(resolved.resolved, json!(42));
	}

	/// Malformed or unrecognized frames are dropped without panicking and
	/// without creating an execution document.
	#[tokio::test]
	async fn unrecognized_frame_type_is_ignored() {
		let (projector, registry) = seeded_projector().await;
		projector.handle_frame("not json").await;
		projector
			.handle_frame(&json!({"type": "heartbeat", "workflowId": "wf-1"}).to_string())
			.await;
		assert!(registry.execution("exec-wf-1").await.is_none());
	}
}

// vim: ts=4
