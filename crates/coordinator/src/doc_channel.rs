//! Doc channel multiplexer (C3): turns `SUBSCRIBE`/`UNSUBSCRIBE`/`SYNC`/
//! `AWARENESS` envelopes from a peer into document-registry/transport calls
//! and fan-out through the broadcast fabric (C10).
//!
//! A peer's "doc channel" is an in-process call surface, not a socket: the
//! peer hands envelopes to [`DocChannelHub::handle_envelope`] and separately
//! holds a [`BroadcastManager`] subscription to receive envelopes addressed
//! to it.

use crate::dispatcher::QueryDispatcher;
use crate::prelude::*;
use crate::registry::{DocMode, DocumentRegistry, WorkflowEntry};
use crate::rest_client::RestClient;
use crate::room::{build_node_type_cache, Room};
use crate::server_transport::ServerTransport;
use coordinator_crdt::wire::{Envelope, MessageType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct DocChannelHub {
	registry: Arc<DocumentRegistry>,
	broadcast: Arc<BroadcastManager<Vec<u8>>>,
	rest: Arc<RestClient>,
	config: Arc<CoordinatorConfig>,
	rooms: RwLock<HashMap<String, Arc<Room>>>,
	server_links: RwLock<HashMap<String, Arc<ServerTransport>>>,
	client_ids_by_doc: RwLock<HashMap<(PeerId, DocId), Vec<u64>>>,
}

impl DocChannelHub {
	pub fn new(
		registry: Arc<DocumentRegistry>,
		broadcast: Arc<BroadcastManager<Vec<u8>>>,
		rest: Arc<RestClient>,
		config: Arc<CoordinatorConfig>,
	) -> Self {
		Self {
			registry,
			broadcast,
			rest,
			config,
			rooms: RwLock::new(HashMap::new()),
			server_links: RwLock::new(HashMap::new()),
			client_ids_by_doc: RwLock::new(HashMap::new()),
		}
	}

	pub async fn subscribe_broadcast(
		&self,
		doc_id: &DocId,
		peer_id: &PeerId,
	) -> tokio::sync::broadcast::Receiver<DocMessage<Vec<u8>>> {
		self.broadcast.subscribe(doc_id, peer_id).await
	}

	/// Handle one envelope from a peer, returning any envelopes to send back
	/// to that peer directly (current state, initial-sync latch, etc).
	pub async fn handle_envelope(
		&self,
		dispatcher: &crate::dispatcher::QueryDispatcher,
		peer_id: &PeerId,
		envelope: Envelope,
	) -> CoordResult<Vec<Envelope>> {
		match envelope.message_type {
			MessageType::Subscribe => {
				let server_url = String::from_utf8(envelope.payload)
					.map_err(|e| Error::ValidationError(format!("non-utf8 serverUrl: {e}")))?;
				self.handle_subscribe(dispatcher, peer_id, envelope.doc_id, server_url).await
			}
			MessageType::Unsubscribe => {
				self.handle_unsubscribe(peer_id, envelope.doc_id).await;
				Ok(Vec::new())
			}
			MessageType::Sync => {
				self.handle_sync(dispatcher, peer_id, envelope.doc_id, envelope.payload).await?;
				Ok(Vec::new())
			}
			MessageType::Awareness => {
				self.handle_awareness(peer_id, envelope.doc_id, envelope.payload).await?;
				Ok(Vec::new())
			}
			_ => Ok(Vec::new()), // control frames only ever flow outbound
		}
	}

	async fn handle_subscribe(
		&self,
		dispatcher: &crate::dispatcher::QueryDispatcher,
		peer_id: &PeerId,
		doc_id: DocId,
		server_url: String,
	) -> CoordResult<Vec<Envelope>> {
		self.broadcast.subscribe(&doc_id, peer_id).await;

		if doc_id.is_execution() {
			let existing = self.registry.execution(doc_id.as_str()).await;
			let mut out = Vec::new();
			if let Some(execution) = existing {
				out.push(Envelope::new(
					MessageType::Sync,
					doc_id.clone(),
					execution.doc.encode_state_as_update(),
				));
			}
			out.push(Envelope::new(MessageType::InitialSync, doc_id, Vec::new()));
			return Ok(out);
		}

		let workflow_id = doc_id.as_str().to_string();
		let mode = if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
			DocMode::Server
		} else {
			DocMode::Local
		};
		let entry = self.registry.get_or_create_workflow(&workflow_id, mode).await;

		match mode {
			DocMode::Local => {
				if !entry.is_seeded() {
					let room = self.get_or_create_room(&workflow_id, &server_url, &entry).await;
					if let Err(err) = room.seed(dispatcher).await {
						warn!(%workflow_id, error = %err, "seed failed, document remains unseeded");
					} else {
						let exec_doc_id = DocId::execution(&workflow_id);
						let execution = self.registry.get_or_create_execution(exec_doc_id.as_str()).await;
						crate::resolver::resolve_workflow(&entry, &execution);
					}
				}
				let mut out = vec![Envelope::new(
					MessageType::Sync,
					doc_id.clone(),
					entry.doc.encode_state_as_update(),
				)];
				if !entry.awareness.is_empty() {
					out.push(Envelope::new(
						MessageType::Awareness,
						doc_id.clone(),
						entry.awareness.encode_full_state(),
					));
				}
				out.push(Envelope::new(MessageType::InitialSync, doc_id, Vec::new()));
				Ok(out)
			}
			DocMode::Server => {
				let link = self.get_or_create_server_link(&workflow_id, &server_url).await;
				if link.state().await == crate::server_transport::LinkState::Connected {
					let mut out = vec![Envelope::new(
						MessageType::Sync,
						doc_id.clone(),
						entry.doc.encode_state_as_update(),
					)];
					if !entry.awareness.is_empty() {
						out.push(Envelope::new(
							MessageType::Awareness,
							doc_id.clone(),
							entry.awareness.encode_full_state(),
						));
					}
					out.push(Envelope::new(MessageType::InitialSync, doc_id, Vec::new()));
					Ok(out)
				} else {
					Ok(Vec::new()) // first server sync will trigger INITIAL_SYNC via the link
				}
			}
		}
	}

	async fn handle_unsubscribe(&self, peer_id: &PeerId, doc_id: DocId) {
		self.broadcast.unsubscribe(&doc_id, peer_id).await;

		if let Some(client_ids) = self.client_ids_by_doc.write().await.remove(&(peer_id.clone(), doc_id.clone())) {
			if let Some(workflow) = self.registry.workflow(doc_id.as_str()).await {
				let removal = workflow.awareness.remove(&client_ids);
				self.broadcast
					.broadcast(&doc_id, Envelope::new(MessageType::Awareness, doc_id.clone(), removal).encode(), None)
					.await;
			}
		}

		if !self.broadcast.is_empty(&doc_id).await {
			return;
		}

		if doc_id.is_execution() {
			self.registry.remove_execution(doc_id.as_str()).await;
			return;
		}

		let workflow_id = doc_id.as_str().to_string();
		if let Some(room) = self.rooms.write().await.remove(&workflow_id) {
			if let Err(err) = room.final_save().await {
				warn!(%workflow_id, error = %err, "final save failed on last subscriber leaving");
			}
		}
		self.server_links.write().await.remove(&workflow_id);
		self.registry.remove_workflow(&workflow_id).await;
	}

	async fn handle_sync(
		&self,
		dispatcher: &QueryDispatcher,
		peer_id: &PeerId,
		doc_id: DocId,
		payload: Vec<u8>,
	) -> CoordResult<()> {
		if doc_id.is_execution() {
			return Ok(()); // peers never originate execution-doc syncs
		}
		let workflow_id = doc_id.as_str().to_string();
		if let Some(link) = self.server_links.read().await.get(&workflow_id) {
			link.send_sync(payload);
			return Ok(());
		}
		let entry = self.registry.get_or_create_workflow(&workflow_id, DocMode::Local).await;
		let before = entry.doc.to_payload(&workflow_id);
		entry.doc.apply_update(&payload)?;
		self.apply_node_observers(dispatcher, &entry, &workflow_id, &before).await;

		self.broadcast
			.broadcast(&doc_id, Envelope::new(MessageType::Sync, doc_id.clone(), payload).encode(), Some(peer_id))
			.await;
		if let Some(room) = self.rooms.read().await.get(&workflow_id) {
			room.schedule_save();
		}
		Ok(())
	}

	/// §4.5 step 5 / §4.7 trigger point 2, run against the diff a SYNC just
	/// applied: rewrite expression references on a node rename, recompute
	/// handle metadata on a parameter/version change, and debounce-trigger a
	/// resolver sweep when any parameter changed.
	async fn apply_node_observers(
		&self,
		dispatcher: &QueryDispatcher,
		entry: &Arc<WorkflowEntry>,
		workflow_id: &str,
		before: &coordinator_crdt::workflow_doc::WorkflowPayload,
	) {
		let after = entry.doc.to_payload(workflow_id);
		let before_by_id: HashMap<&str, _> = before.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

		let mut params_changed = false;
		for node in &after.nodes {
			let Some(prev) = before_by_id.get(node.id.as_str()) else { continue };
			if prev.name != node.name {
				if let Err(err) = entry.doc.rename_node(&prev.name, &node.name) {
					warn!(%workflow_id, error = %err, "expression rename rewrite failed");
				}
			}
			if prev.parameters != node.parameters || prev.type_version != node.type_version {
				params_changed = true;
				let node_types = build_node_type_cache(&dispatcher.node_types_snapshot().await);
				if let Err(err) = entry.doc.recompute_node_handles(&node.id, &node_types) {
					warn!(%workflow_id, error = %err, "handle recomputation failed");
				}
			}
		}

		if params_changed {
			if let Some(room) = self.rooms.read().await.get(workflow_id) {
				room.schedule_resolve();
			}
		}
	}

	async fn handle_awareness(&self, peer_id: &PeerId, doc_id: DocId, payload: Vec<u8>) -> CoordResult<()> {
		let workflow_id = doc_id.as_str().to_string();
		let entry = self.registry.get_or_create_workflow(&workflow_id, DocMode::Local).await;
		let (changed, removed) = entry
			.awareness
			.apply(&payload)
			.map_err(|e| Error::Serialization(format!("invalid awareness update: {e}")))?;

		let mut tracked = self.client_ids_by_doc.write().await;
		let ids = tracked.entry((peer_id.clone(), doc_id.clone())).or_default();
		ids.retain(|id| !removed.contains(id));
		for id in changed {
			if !ids.contains(&id) {
				ids.push(id);
			}
		}
		drop(tracked);

		if let Some(link) = self.server_links.read().await.get(&workflow_id) {
			link.send_awareness(payload.clone());
		}
		self.broadcast
			.broadcast(&doc_id, Envelope::new(MessageType::Awareness, doc_id.clone(), payload).encode(), None)
			.await;
		Ok(())
	}

	async fn get_or_create_room(
		&self,
		workflow_id: &str,
		base_url: &str,
		entry: &Arc<crate::registry::WorkflowEntry>,
	) -> Arc<Room> {
		if let Some(room) = self.rooms.read().await.get(workflow_id) {
			return room.clone();
		}
		let room = Arc::new(Room::new(
			workflow_id.to_string(),
			base_url.to_string(),
			entry.clone(),
			self.registry.clone(),
			self.rest.clone(),
			self.broadcast.clone(),
			self.config.clone(),
		));
		self.rooms.write().await.insert(workflow_id.to_string(), room.clone());
		room
	}

	async fn get_or_create_server_link(
		&self,
		workflow_id: &str,
		server_url: &str,
	) -> Arc<ServerTransport> {
		if let Some(link) = self.server_links.read().await.get(workflow_id) {
			return link.clone();
		}
		let link = ServerTransport::new(
			workflow_id.to_string(),
			server_url.to_string(),
			self.registry.clone(),
			self.broadcast.clone(),
			self.config.clone(),
		);
		link.spawn();
		self.server_links.write().await.insert(workflow_id.to_string(), link.clone());
		link
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::peer::PeerRegistry;
	use coordinator_crdt::node_types::{ConnectionPort, NodeTypeCache, NodeTypeDescription};
	use coordinator_crdt::workflow_doc::{EdgeRecord, NodeRecord, WorkflowPayload};
	use serde_json::json;

	fn hub() -> DocChannelHub {
		DocChannelHub::new(
			Arc::new(DocumentRegistry::new()),
			Arc::new(BroadcastManager::new()),
			Arc::new(RestClient::new()),
			Arc::new(CoordinatorConfig::default()),
		)
	}

	fn dispatcher() -> crate::dispatcher::QueryDispatcher {
		crate::dispatcher::QueryDispatcher::new(Arc::new(PeerRegistry::new()))
	}

	async fn seeded_entry(hub: &DocChannelHub, workflow_id: &str) -> Arc<crate::registry::WorkflowEntry> {
		let mut node_types = NodeTypeCache::new();
		node_types.insert(
			"n8n-nodes-base.set@1".into(),
			NodeTypeDescription {
				name: "n8n-nodes-base.set".into(),
				version: 1,
				inputs: vec![ConnectionPort::main()],
				outputs: vec![ConnectionPort::main()],
				is_trigger: false,
			},
		);
		let entry = hub.registry.get_or_create_workflow(workflow_id, DocMode::Local).await;
		entry.doc.seed(
			&WorkflowPayload {
				id: workflow_id.to_string(),
				name: "Demo".into(),
				nodes: vec![NodeRecord {
					id: "n1".into(),
					name: "A".into(),
					node_type: "n8n-nodes-base.set".into(),
					type_version: 1,
					position: [0.0, 0.0],
					parameters: json!({}),
					disabled: false,
					notes: None,
					retry_on_fail: false,
					always_output_data: false,
				}],
				edges: Vec::<EdgeRecord>::new(),
				settings: json!({}),
				pin_data: json!({}),
				version_id: None,
			},
			&node_types,
		);
		entry.mark_seeded();
		entry
	}

	fn peer(id: &str) -> PeerId {
		PeerId(id.into())
	}

	/// S1/S2: a subscriber to an already-seeded document gets SYNC then
	/// INITIAL_SYNC and nothing else (no awareness yet).
	#[tokio::test]
	async fn subscribe_to_seeded_document_yields_sync_then_initial_sync() {
		let hub = hub();
		seeded_entry(&hub, "wf-1").await;
		let dispatcher = dispatcher();

		let envelope = Envelope::new(MessageType::Subscribe, DocId::workflow("wf-1"), b"http://h".to_vec());
		let replies = hub.handle_envelope(&dispatcher, &peer("p1"), envelope).await.unwrap();

		assert_eq!(replies.len(), 2);
		assert_eq!(replies[0].message_type, MessageType::Sync);
		assert_eq!(replies[1].message_type, MessageType::InitialSync);
	}

	/// S2: a second, later subscriber observes the same current state and the
	/// first subscriber receives nothing as a side effect of the second's subscribe.
	#[tokio::test]
	async fn second_subscriber_does_not_disturb_the_first() {
		let hub = hub();
		seeded_entry(&hub, "wf-1").await;
		let dispatcher = dispatcher();
		let doc_id = DocId::workflow("wf-1");

		let mut p1_inbox = hub.subscribe_broadcast(&doc_id, &peer("p1")).await;
		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://h".to_vec()),
		)
		.await
		.unwrap();

		let replies = hub
			.handle_envelope(
				&dispatcher,
				&peer("p2"),
				Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://h".to_vec()),
			)
			.await
			.unwrap();
		assert_eq!(replies.len(), 2);
		assert!(p1_inbox.try_recv().is_err());
	}

	/// S3: a SYNC from one peer is broadcast to every other subscriber, and
	/// applying it reproduces the same node rename on their mirror.
	#[tokio::test]
	async fn sync_from_one_peer_is_broadcast_to_others_and_applies_identically() {
		let hub = hub();
		let entry = seeded_entry(&hub, "wf-1").await;
		let dispatcher = dispatcher();
		let doc_id = DocId::workflow("wf-1");

		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://h".to_vec()),
		)
		.await
		.unwrap();
		let mut p2_inbox = hub.subscribe_broadcast(&doc_id, &peer("p2")).await;
		hub.handle_envelope(
			&dispatcher,
			&peer("p2"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), Vec::new()),
		)
		.await
		.unwrap();

		entry.doc.rename_node("A", "B").unwrap();
		let delta = entry.doc.encode_state_as_update();
		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Sync, doc_id.clone(), delta.clone()),
		)
		.await
		.unwrap();

		let received = p2_inbox.recv().await.unwrap();
		let incoming = Envelope::decode(&received.body).unwrap();
		assert_eq!(incoming.message_type, MessageType::Sync);

		let mirror = coordinator_crdt::workflow_doc::WorkflowDoc::new();
		mirror.apply_update(&entry.doc.encode_state_as_update()).unwrap();
		mirror.apply_update(&incoming.payload).unwrap();
		assert_eq!(mirror.to_payload("wf-1").nodes[0].name, "B");
	}

	/// §8 invariant 2: unsubscribing a peer removes its tracked awareness
	/// clients and broadcasts the removal to the peers left behind.
	#[tokio::test]
	async fn unsubscribe_removes_tracked_awareness_clients() {
		let hub = hub();
		seeded_entry(&hub, "wf-1").await;
		let dispatcher = dispatcher();
		let doc_id = DocId::workflow("wf-1");

		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://h".to_vec()),
		)
		.await
		.unwrap();
		let mut p2_inbox = hub.subscribe_broadcast(&doc_id, &peer("p2")).await;
		hub.handle_envelope(
			&dispatcher,
			&peer("p2"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), Vec::new()),
		)
		.await
		.unwrap();

		let awareness_update =
			serde_json::to_vec(&json!({"entries": [{"client_id": 7, "clock": 0, "state": {}}], "removed": []}))
				.unwrap();
		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Awareness, doc_id.clone(), awareness_update),
		)
		.await
		.unwrap();
		let _ = p2_inbox.recv().await; // the awareness apply broadcast

		hub.handle_unsubscribe(&peer("p1"), doc_id.clone()).await;
		let removal = p2_inbox.recv().await.unwrap();
		let decoded = Envelope::decode(&removal.body).unwrap();
		assert_eq!(decoded.message_type, MessageType::Awareness);

		let entry = hub.registry.workflow("wf-1").await.unwrap();
		assert!(entry.awareness.is_empty());
	}

	/// S7-adjacent: the last subscriber leaving a workflow document disposes it.
	#[tokio::test]
	async fn last_subscriber_leaving_disposes_the_document() {
		let hub = hub();
		seeded_entry(&hub, "wf-1").await;
		let dispatcher = dispatcher();
		let doc_id = DocId::workflow("wf-1");

		hub.handle_envelope(
			&dispatcher,
			&peer("p1"),
			Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://h".to_vec()),
		)
		.await
		.unwrap();
		hub.handle_unsubscribe(&peer("p1"), doc_id).await;

		assert!(hub.registry.workflow("wf-1").await.is_none());
	}
}

// vim: ts=4
