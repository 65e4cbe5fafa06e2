//! Per-client ephemeral presence state (cursor, selection, identity).
//!
//! Awareness is not part of the Yjs CRDT algebra — it is last-writer-wins,
//! keyed by a numeric client id, and expected to be dropped entirely when a
//! client disconnects. We model it as a small versioned map rather than
//! reusing the document's CRDT machinery, matching how Yjs itself keeps
//! awareness out of the document update stream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessEntry {
	pub client_id: u64,
	pub clock: u32,
	pub state: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct AwarenessUpdate {
	entries: Vec<AwarenessEntry>,
	removed: Vec<u64>,
}

#[derive(Default)]
pub struct AwarenessState {
	clients: RwLock<HashMap<u64, AwarenessEntry>>,
}

impl AwarenessState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Apply an incoming awareness update; returns the set of client ids that
	/// were added or updated and the set that were removed, for subscription
	/// bookkeeping (§4.3's per-peer `clientIds` tracking).
	pub fn apply(&self, bytes: &[u8]) -> Result<(Vec<u64>, Vec<u64>), serde_json::Error> {
		let update: AwarenessUpdate = serde_json::from_slice(bytes)?;
		let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
		let mut changed = Vec::new();
		for entry in update.entries {
			let should_apply = clients
				.get(&entry.client_id)
				.is_none_or(|existing| entry.clock >= existing.clock);
			if should_apply {
				changed.push(entry.client_id);
				clients.insert(entry.client_id, entry);
			}
		}
		for client_id in &update.removed {
			clients.remove(client_id);
		}
		Ok((changed, update.removed))
	}

	/// Remove a set of client ids (peer disconnect / ghost-client cleanup).
	pub fn remove(&self, client_ids: &[u64]) -> Vec<u8> {
		let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
		for client_id in client_ids {
			clients.remove(client_id);
		}
		let removal = AwarenessUpdate { entries: Vec::new(), removed: client_ids.to_vec() };
		serde_json::to_vec(&removal).unwrap_or_default()
	}

	/// Encode the full current awareness state for a late-joining peer.
	pub fn encode_full_state(&self) -> Vec<u8> {
		let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
		let update =
			AwarenessUpdate { entries: clients.values().cloned().collect(), removed: Vec::new() };
		serde_json::to_vec(&update).unwrap_or_default()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.read().unwrap_or_else(|e| e.into_inner()).is_empty()
	}
}


// vim: ts=4
