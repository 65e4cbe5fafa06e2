//! Server-backed CRDT transport (C6): a reconnecting WebSocket that mirrors
//! a workflow document hosted on a remote collaboration server, used when a
//! peer subscribes with a `serverUrl` instead of seeding locally.

use crate::prelude::*;
use crate::registry::DocumentRegistry;
use coordinator_crdt::wire::{Envelope, MessageType};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	Disconnected,
	Connecting,
	Connected,
}

/// One reconnecting link to a remote CRDT server, mirroring a single
/// workflow document into the local `WorkflowEntry`.
pub struct ServerTransport {
	workflow_id: String,
	server_url: String,
	registry: Arc<DocumentRegistry>,
	broadcast: Arc<BroadcastManager<Vec<u8>>>,
	config: Arc<CoordinatorConfig>,
	state: RwLock<LinkState>,
	first_sync_done: AtomicBool,
	outbound: mpsc::UnboundedSender<Vec<u8>>,
	outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
	generation: AtomicU64,
}

impl ServerTransport {
	pub fn new(
		workflow_id: String,
		server_url: String,
		registry: Arc<DocumentRegistry>,
		broadcast: Arc<BroadcastManager<Vec<u8>>>,
		config: Arc<CoordinatorConfig>,
	) -> Arc<Self> {
		let (tx, rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			workflow_id,
			server_url,
			registry,
			broadcast,
			config,
			state: RwLock::new(LinkState::Disconnected),
			first_sync_done: AtomicBool::new(false),
			outbound: tx,
			outbound_rx: std::sync::Mutex::new(Some(rx)),
			generation: AtomicU64::new(0),
		})
	}

	pub async fn state(&self) -> LinkState {
		*self.state.read().await
	}

	/// Forward a SYNC envelope's raw payload from a local peer to the server.
	pub fn send_sync(&self, payload: Vec<u8>) {
		let _ = self.outbound.send(Envelope::new(MessageType::Sync, self.doc_id(), payload).encode());
	}

	pub fn send_awareness(&self, payload: Vec<u8>) {
		let _ =
			self.outbound.send(Envelope::new(MessageType::Awareness, self.doc_id(), payload).encode());
	}

	fn doc_id(&self) -> DocId {
		DocId::workflow(&self.workflow_id)
	}

	pub fn spawn(self: &Arc<Self>) {
		let Ok(mut rx_guard) = self.outbound_rx.lock() else { return };
		let Some(outbound_rx) = rx_guard.take() else { return };
		drop(rx_guard);
		let transport = self.clone();
		let generation = transport.generation.fetch_add(1, Ordering::SeqCst) + 1;
		tokio::spawn(async move {
			transport.run(outbound_rx, generation).await;
		});
	}

	async fn run(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>, generation: u64) {
		let mut backoff = self.config.push_reconnect_backoff;
		loop {
			if self.generation.load(Ordering::SeqCst) != generation {
				return;
			}
			*self.state.write().await = LinkState::Connecting;
			match tokio_tungstenite::connect_async(&self.server_url).await {
				Ok((stream, _response)) => {
					*self.state.write().await = LinkState::Connected;
					self.first_sync_done.store(false, Ordering::Release);
					info!(workflow_id = %self.workflow_id, "server transport connected");
					backoff = self.config.push_reconnect_backoff;
					self.drive(stream, &mut outbound_rx).await;
				}
				Err(err) => {
					warn!(error = %err, "server transport connect failed, backing off");
				}
			}
			*self.state.write().await = LinkState::Disconnected;
			self.broadcast_control(MessageType::Disconnected).await;
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
		outbound_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
	) {
		let (mut tx, mut rx) = stream.split();
		self.broadcast_control(MessageType::Connected).await;
		let heartbeat_interval = self.config.heartbeat_interval;
		loop {
			tokio::select! {
				outgoing = outbound_rx.recv() => {
					match outgoing {
						Some(bytes) => {
							if tx.send(Message::Binary(bytes.into())).await.is_err() {
								return;
							}
						}
						None => return,
					}
				}
				incoming = rx.next() => {
					match incoming {
						Some(Ok(Message::Binary(bytes))) => self.handle_inbound(&bytes).await,
						Some(Ok(Message::Close(_))) | None => return,
						Some(Err(err)) => {
							warn!(error = %err, "server transport read error");
							return;
						}
						_ => {}
					}
				}
				() = tokio::time::sleep(heartbeat_interval) => {
					if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
						return;
					}
				}
			}
		}
	}

	async fn handle_inbound(&self, bytes: &[u8]) {
		let Ok(envelope) = Envelope::decode(bytes) else { return };
		let Some(workflow) = self.registry.workflow(&self.workflow_id).await else { return };
		match envelope.message_type {
			MessageType::Sync => {
				if workflow.doc.apply_update(&envelope.payload).is_err() {
					return;
				}
				if !self.first_sync_done.swap(true, Ordering::AcqRel) {
					workflow.mark_seeded();
					self.broadcast_control(MessageType::InitialSync).await;
				}
				let out = Envelope::new(MessageType::Sync, self.doc_id(), envelope.payload).encode();
				self.broadcast.broadcast(&self.doc_id(), out, None).await;
			}
			MessageType::Awareness => {
				if workflow.awareness.apply(&envelope.payload).is_err() {
					return;
				}
				let out = Envelope::new(MessageType::Awareness, self.doc_id(), envelope.payload).encode();
				self.broadcast.broadcast(&self.doc_id(), out, None).await;
			}
			_ => {}
		}
	}

	async fn broadcast_control(&self, message_type: MessageType) {
		let envelope = Envelope::new(message_type, self.doc_id(), Vec::new()).encode();
		self.broadcast.broadcast(&self.doc_id(), envelope, None).await;
	}
}

// vim: ts=4
