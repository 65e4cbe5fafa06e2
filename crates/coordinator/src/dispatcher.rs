//! Query dispatcher (C2): forwards SQL-exec / schema operations and
//! node-type loading to the active peer's data worker.

use crate::peer::PeerRegistry;
use crate::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

/// `<name>@<version>` keyed node-type descriptions, populated by
/// [`QueryDispatcher::load_node_types`].
pub type NodeTypeRow = Value;

#[derive(Default)]
struct VersionState {
	stored: Option<String>,
}

/// Forwards queries to whichever peer currently holds the active data
/// worker, and owns the node-types cache every document seeder waits on.
pub struct QueryDispatcher {
	registry: Arc<PeerRegistry>,
	node_types: RwLock<HashMap<String, NodeTypeRow>>,
	node_types_ready: Notify,
	node_types_loaded: RwLock<bool>,
	version: RwLock<VersionState>,
}

impl QueryDispatcher {
	pub fn new(registry: Arc<PeerRegistry>) -> Self {
		Self {
			registry,
			node_types: RwLock::new(HashMap::new()),
			node_types_ready: Notify::new(),
			node_types_loaded: RwLock::new(false),
			version: RwLock::new(VersionState::default()),
		}
	}

	pub async fn exec(&self, sql: &str) -> CoordResult<Value> {
		self.registry.active_data_worker().await?.exec(sql).await
	}

	pub async fn query(&self, sql: &str) -> CoordResult<Value> {
		self.registry.active_data_worker().await?.query(sql).await
	}

	pub async fn query_with_params(&self, sql: &str, params: &Value) -> CoordResult<Value> {
		self.registry.active_data_worker().await?.query_with_params(sql, params).await
	}

	/// Bulk-load node types through the active worker, then populate the
	/// in-memory cache and unblock anyone awaiting [`Self::wait_for_node_types`].
	pub async fn load_node_types(&self, base_url: &str) -> CoordResult<()> {
		let worker = self.registry.active_data_worker().await?;
		let rows = worker.load_node_types(base_url).await?;
		let mut cache = self.node_types.write().await;
		cache.clear();
		for row in rows {
			let key = match (row.get("name").and_then(Value::as_str), row.get("version").and_then(Value::as_u64)) {
				(Some(name), Some(version)) => format!("{name}@{version}"),
				_ => continue,
			};
			cache.insert(key, row);
		}
		drop(cache);
		*self.node_types_loaded.write().await = true;
		self.node_types_ready.notify_waiters();
		Ok(())
	}

	/// Await node types being loaded at least once; returns immediately if
	/// they already are.
	pub async fn wait_for_node_types(&self) {
		if *self.node_types_loaded.read().await {
			return;
		}
		self.node_types_ready.notified().await;
	}

	pub async fn node_type(&self, key: &str) -> Option<NodeTypeRow> {
		self.node_types.read().await.get(key).cloned()
	}

	pub async fn node_types_snapshot(&self) -> HashMap<String, NodeTypeRow> {
		self.node_types.read().await.clone()
	}

	pub async fn store_version(&self, version: String) {
		self.version.write().await.stored = Some(version);
	}

	pub async fn stored_version(&self) -> Option<String> {
		self.version.read().await.stored.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::peer::DataWorkerClient;
	use async_trait::async_trait;
	use serde_json::json;

	struct FakeWorker;

	#[async_trait]
	impl DataWorkerClient for FakeWorker {
		async fn exec(&self, _sql: &str) -> CoordResult<Value> {
			Ok(json!({"ok": true}))
		}
		async fn query(&self, _sql: &str) -> CoordResult<Value> {
			Ok(json!([]))
		}
		async fn query_with_params(&self, _sql: &str, _params: &Value) -> CoordResult<Value> {
			Ok(json!([]))
		}
		async fn load_node_types(&self, _base_url: &str) -> CoordResult<Vec<Value>> {
			Ok(vec![json!({"name": "n8n-nodes-base.set", "version": 1})])
		}
	}

	async fn dispatcher_with_active_peer() -> QueryDispatcher {
		let registry = Arc::new(PeerRegistry::new());
		registry.register(Arc::new(FakeWorker)).await;
		registry.remember_init("1.0.0".into(), "https://example.com".into()).await;
		QueryDispatcher::new(registry)
	}

	#[tokio::test]
	async fn exec_forwards_to_active_peer() {
		let dispatcher = dispatcher_with_active_peer().await;
		let result = dispatcher.exec("select 1").await.unwrap();
		assert_eq!(result, json!({"ok": true}));
	}

	#[tokio::test]
	async fn load_node_types_populates_cache_and_unblocks_waiters() {
		let dispatcher = dispatcher_with_active_peer().await;
		dispatcher.load_node_types("https://example.com").await.unwrap();
		dispatcher.wait_for_node_types().await;

		let cached = dispatcher.node_type("n8n-nodes-base.set@1").await;
		assert!(cached.is_some());
	}

	#[tokio::test]
	async fn exec_without_init_fails() {
		let registry = Arc::new(PeerRegistry::new());
		registry.register(Arc::new(FakeWorker)).await;
		let dispatcher = QueryDispatcher::new(registry);
		assert!(matches!(dispatcher.exec("select 1").await, Err(Error::NotInitialized)));
	}
}

// vim: ts=4
