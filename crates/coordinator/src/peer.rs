//! Peer registry and active-data-worker leadership (C1).
//!
//! A peer is a browser tab: it owns an embedded SQL engine (the "data
//! worker") and a doc-channel endpoint. The coordinator never touches SQL
//! itself — each peer hands over a [`DataWorkerClient`] implementation when
//! it registers, and the registry elects exactly one peer's client as the
//! active writer.

use crate::prelude::*;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The SQL-exec surface a registered peer exposes. Implemented by whatever
/// carries RPC calls back to that tab (a message port, a test double, ...).
#[async_trait]
pub trait DataWorkerClient: Send + Sync {
	async fn exec(&self, sql: &str) -> CoordResult<Value>;
	async fn query(&self, sql: &str) -> CoordResult<Value>;
	async fn query_with_params(&self, sql: &str, params: &Value) -> CoordResult<Value>;
	async fn load_node_types(&self, base_url: &str) -> CoordResult<Vec<Value>>;
}

struct PeerRecord {
	data_worker: Arc<dyn DataWorkerClient>,
	doc_endpoint: PeerId,
	registered_at: Timestamp,
}

#[derive(Default)]
struct RegistryState {
	peers: BTreeMap<PeerId, PeerRecord>,
	active: Option<PeerId>,
	remembered_init: Option<(String, String)>,
}

/// Tracks connected peers and which one is currently the active data worker.
pub struct PeerRegistry {
	state: RwLock<RegistryState>,
}

impl Default for PeerRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl PeerRegistry {
	pub fn new() -> Self {
		Self { state: RwLock::new(RegistryState::default()) }
	}

	/// Register a newly connected tab; promotes it to active if none exists yet.
	pub async fn register(&self, data_worker: Arc<dyn DataWorkerClient>) -> PeerId {
		let peer_id = PeerId(random_id().into_boxed_str());
		let mut state = self.state.write().await;
		state.peers.insert(
			peer_id.clone(),
			PeerRecord {
				data_worker,
				doc_endpoint: peer_id.clone(),
				registered_at: Timestamp::now(),
			},
		);
		if state.active.is_none() {
			state.active = Some(peer_id.clone());
			info!(peer = %peer_id, "promoted to active data worker");
		}
		peer_id
	}

	/// Remove a disconnected peer, re-electing the next-oldest registrant if it was active.
	pub async fn unregister(&self, peer_id: &PeerId) {
		let mut state = self.state.write().await;
		state.peers.remove(peer_id);
		if state.active.as_ref() == Some(peer_id) {
			state.active = state
				.peers
				.iter()
				.min_by_key(|(_, record)| record.registered_at.0)
				.map(|(id, _)| id.clone());
			match &state.active {
				Some(new_active) => info!(peer = %new_active, "re-elected active data worker"),
				None => info!("no peers remain; coordinator idle"),
			}
		}
	}

	pub async fn active_peer(&self) -> Option<PeerId> {
		self.state.read().await.active.clone()
	}

	pub async fn peer_count(&self) -> usize {
		self.state.read().await.peers.len()
	}

	/// Remember the `(version, baseUrl)` pair so it can be replayed against a
	/// newly elected active peer.
	pub async fn remember_init(&self, version: String, base_url: String) {
		self.state.write().await.remembered_init = Some((version, base_url));
	}

	pub async fn remembered_init(&self) -> Option<(String, String)> {
		self.state.read().await.remembered_init.clone()
	}

	/// Fetch the active peer's data-worker client, or fail with the
	/// appropriate dispatcher error.
	pub async fn active_data_worker(&self) -> CoordResult<Arc<dyn DataWorkerClient>> {
		let state = self.state.read().await;
		if state.remembered_init.is_none() {
			return Err(Error::NotInitialized);
		}
		let active = state.active.as_ref().ok_or(Error::NoActivePeer)?;
		state
			.peers
			.get(active)
			.map(|record| record.data_worker.clone())
			.ok_or(Error::NoActivePeer)
	}

	pub async fn doc_endpoint(&self, peer_id: &PeerId) -> Option<PeerId> {
		self.state.read().await.peers.get(peer_id).map(|r| r.doc_endpoint.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct NullWorker;

	#[async_trait]
	impl DataWorkerClient for NullWorker {
		async fn exec(&self, _sql: &str) -> CoordResult<Value> {
			Ok(Value::Null)
		}
		async fn query(&self, _sql: &str) -> CoordResult<Value> {
			Ok(Value::Null)
		}
		async fn query_with_params(&self, _sql: &str, _params: &Value) -> CoordResult<Value> {
			Ok(Value::Null)
		}
		async fn load_node_types(&self, _base_url: &str) -> CoordResult<Vec<Value>> {
			Ok(vec![])
		}
	}

	#[tokio::test]
	async fn first_registrant_becomes_active() {
		let registry = PeerRegistry::new();
		let peer = registry.register(Arc::new(NullWorker)).await;
		assert_eq!(registry.active_peer().await, Some(peer));
	}

	#[tokio::test]
	async fn unregister_reelects_remaining_peer() {
		let registry = PeerRegistry::new();
		let first = registry.register(Arc::new(NullWorker)).await;
		let second = registry.register(Arc::new(NullWorker)).await;
		assert_eq!(registry.active_peer().await, Some(first.clone()));

		registry.unregister(&first).await;
		assert_eq!(registry.active_peer().await, Some(second));
	}

	#[tokio::test]
	async fn last_peer_leaving_clears_active_but_keeps_remembered_init() {
		let registry = PeerRegistry::new();
		let peer = registry.register(Arc::new(NullWorker)).await;
		registry.remember_init("1.0.0".into(), "https://example.com".into()).await;

		registry.unregister(&peer).await;
		assert_eq!(registry.active_peer().await, None);
		assert!(registry.remembered_init().await.is_some());
	}

	#[tokio::test]
	async fn active_data_worker_fails_when_not_initialized() {
		let registry = PeerRegistry::new();
		registry.register(Arc::new(NullWorker)).await;
		assert!(matches!(registry.active_data_worker().await, Err(Error::NotInitialized)));
	}

	#[tokio::test]
	async fn active_data_worker_fails_when_no_peers() {
		let registry = PeerRegistry::new();
		registry.remember_init("1.0.0".into(), "https://example.com".into()).await;
		assert!(matches!(registry.active_data_worker().await, Err(Error::NoActivePeer)));
	}
}

// vim: ts=4
