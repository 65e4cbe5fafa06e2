//! Broadcast fabric: fan out per-document messages to subscribed peers.
//!
//! One document may have many subscribed peers (browser tabs). Delivering a
//! CRDT update means sending it to every peer subscribed to that document,
//! optionally excluding the peer that produced the update.

use coordinator_types::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// A message queued for delivery to a document's subscribers.
#[derive(Clone, Debug)]
pub struct DocMessage<T> {
	pub doc_id: DocId,
	pub origin: Option<PeerId>,
	pub body: T,
}

/// Result of a targeted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
	Delivered(usize),
	PeerOffline,
}

type SubscriberMap<T> = HashMap<DocId, HashMap<PeerId, broadcast::Sender<DocMessage<T>>>>;

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
	pub buffer_size: usize,
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self { buffer_size: 256 }
	}
}

/// Fans out document messages to every peer subscribed to that document.
pub struct BroadcastManager<T: Clone + Send + 'static> {
	subs: Arc<RwLock<SubscriberMap<T>>>,
	config: BroadcastConfig,
}

impl<T: Clone + Send + 'static> BroadcastManager<T> {
	pub fn new() -> Self {
		Self::with_config(BroadcastConfig::default())
	}

	pub fn with_config(config: BroadcastConfig) -> Self {
		Self { subs: Arc::new(RwLock::new(HashMap::new())), config }
	}

	/// Subscribe a peer to a document's broadcast stream.
	pub async fn subscribe(
		&self,
		doc_id: &DocId,
		peer_id: &PeerId,
	) -> broadcast::Receiver<DocMessage<T>> {
		let mut subs = self.subs.write().await;
		let doc_subs = subs.entry(doc_id.clone()).or_default();
		if let Some(sender) = doc_subs.get(peer_id) {
			return sender.subscribe();
		}
		let (tx, rx) = broadcast::channel(self.config.buffer_size);
		doc_subs.insert(peer_id.clone(), tx);
		debug!(%doc_id, %peer_id, "peer subscribed to document broadcast");
		rx
	}

	/// Remove a peer's subscription to one document.
	pub async fn unsubscribe(&self, doc_id: &DocId, peer_id: &PeerId) {
		let mut subs = self.subs.write().await;
		if let Some(doc_subs) = subs.get_mut(doc_id) {
			doc_subs.remove(peer_id);
			if doc_subs.is_empty() {
				subs.remove(doc_id);
			}
		}
		debug!(%doc_id, %peer_id, "peer unsubscribed from document broadcast");
	}

	/// Remove a peer's subscriptions to every document (on disconnect).
	pub async fn unsubscribe_all(&self, peer_id: &PeerId) -> Vec<DocId> {
		let mut subs = self.subs.write().await;
		let mut removed = Vec::new();
		subs.retain(|doc_id, doc_subs| {
			if doc_subs.remove(peer_id).is_some() {
				removed.push(doc_id.clone());
			}
			!doc_subs.is_empty()
		});
		removed
	}

	/// Broadcast to every subscriber of `doc_id`, optionally skipping `exclude`.
	pub async fn broadcast(
		&self,
		doc_id: &DocId,
		body: T,
		exclude: Option<&PeerId>,
	) -> usize {
		let subs = self.subs.read().await;
		let Some(doc_subs) = subs.get(doc_id) else {
			return 0;
		};

		let msg = DocMessage { doc_id: doc_id.clone(), origin: exclude.cloned(), body };
		let mut delivered = 0;
		for (peer_id, sender) in doc_subs {
			if exclude.is_some_and(|e| e == peer_id) {
				continue;
			}
			if sender.send(msg.clone()).is_ok() {
				delivered += 1;
			}
		}
		delivered
	}

	/// Send to exactly one subscriber.
	pub async fn send_to_peer(&self, doc_id: &DocId, peer_id: &PeerId, body: T) -> DeliveryResult {
		let subs = self.subs.read().await;
		if let Some(sender) = subs.get(doc_id).and_then(|d| d.get(peer_id)) {
			let msg = DocMessage { doc_id: doc_id.clone(), origin: None, body };
			if sender.send(msg).is_ok() {
				return DeliveryResult::Delivered(1);
			}
		}
		DeliveryResult::PeerOffline
	}

	/// Number of peers currently subscribed to a document.
	pub async fn subscriber_count(&self, doc_id: &DocId) -> usize {
		self.subs.read().await.get(doc_id).map_or(0, HashMap::len)
	}

	/// Documents with no remaining subscribers (for disposal sweeps).
	pub async fn is_empty(&self, doc_id: &DocId) -> bool {
		self.subscriber_count(doc_id).await == 0
	}
}

impl<T: Clone + Send + 'static> Default for BroadcastManager<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc(id: &str) -> DocId {
		DocId::from(id)
	}
	fn peer(id: &str) -> PeerId {
		PeerId::from(id.to_string())
	}

	#[tokio::test]
	async fn subscribe_and_broadcast() {
		let mgr: BroadcastManager<u32> = BroadcastManager::new();
		let d = doc("wf-1");
		let mut rx_a = mgr.subscribe(&d, &peer("a")).await;
		let mut rx_b = mgr.subscribe(&d, &peer("b")).await;

		let delivered = mgr.broadcast(&d, 42, None).await;
		assert_eq!(delivered, 2);
		assert_eq!(rx_a.recv().await.unwrap().body, 42);
		assert_eq!(rx_b.recv().await.unwrap().body, 42);
	}

	#[tokio::test]
	async fn broadcast_excludes_origin() {
		let mgr: BroadcastManager<u32> = BroadcastManager::new();
		let d = doc("wf-1");
		let mut rx_a = mgr.subscribe(&d, &peer("a")).await;
		let _rx_b = mgr.subscribe(&d, &peer("b")).await;

		let delivered = mgr.broadcast(&d, 7, Some(&peer("a"))).await;
		assert_eq!(delivered, 1);
		assert!(rx_a.try_recv().is_err());
	}

	#[tokio::test]
	async fn unsubscribe_all_removes_every_document() {
		let mgr: BroadcastManager<u32> = BroadcastManager::new();
		let a = peer("a");
		mgr.subscribe(&doc("wf-1"), &a).await;
		mgr.subscribe(&doc("wf-2"), &a).await;

		let removed = mgr.unsubscribe_all(&a).await;
		assert_eq!(removed.len(), 2);
		assert!(mgr.is_empty(&doc("wf-1")).await);
		assert!(mgr.is_empty(&doc("wf-2")).await);
	}

	#[tokio::test]
	async fn broadcast_to_unknown_document_is_noop() {
		let mgr: BroadcastManager<u32> = BroadcastManager::new();
		assert_eq!(mgr.broadcast(&doc("missing"), 1, None).await, 0);
	}
}

// vim: ts=4
