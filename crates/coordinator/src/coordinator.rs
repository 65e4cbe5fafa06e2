//! Top-level `Coordinator`: the single shared background-agent instance a
//! browser tab's `SharedWorker` (or equivalent host) talks to. Wires C1–C10
//! together and exposes the RPC surface peers call into.

use crate::dispatcher::QueryDispatcher;
use crate::doc_channel::DocChannelHub;
use crate::invoker::ExecutionInvoker;
use crate::peer::{DataWorkerClient, PeerRegistry};
use crate::prelude::*;
use crate::push::PushProjector;
use crate::registry::DocumentRegistry;
use crate::rest_client::RestClient;
use coordinator_crdt::wire::Envelope;
use serde_json::Value;
use std::sync::Arc;

pub struct Coordinator {
	peers: Arc<PeerRegistry>,
	dispatcher: Arc<QueryDispatcher>,
	registry: Arc<DocumentRegistry>,
	doc_channel: Arc<DocChannelHub>,
	push: Arc<PushProjector>,
	invoker: Arc<ExecutionInvoker>,
	config: Arc<CoordinatorConfig>,
	stored_version: tokio::sync::RwLock<Option<String>>,
	ws_base_url: tokio::sync::RwLock<Option<String>>,
}

impl Coordinator {
	pub fn new(config: CoordinatorConfig) -> Self {
		let config = Arc::new(config);
		let peers = Arc::new(PeerRegistry::new());
		let dispatcher = Arc::new(QueryDispatcher::new(peers.clone()));
		let registry = Arc::new(DocumentRegistry::new());
		let broadcast: Arc<BroadcastManager<Vec<u8>>> = Arc::new(BroadcastManager::new());
		let rest = Arc::new(RestClient::new());
		let doc_channel =
			Arc::new(DocChannelHub::new(registry.clone(), broadcast.clone(), rest.clone(), config.clone()));
		let push = Arc::new(PushProjector::new(registry.clone(), broadcast.clone(), config.clone()));
		let invoker =
			Arc::new(ExecutionInvoker::new(registry.clone(), push.clone(), rest.clone(), dispatcher.clone()));

		Self {
			peers,
			dispatcher,
			registry,
			doc_channel,
			push,
			invoker,
			config,
			stored_version: tokio::sync::RwLock::new(None),
			ws_base_url: tokio::sync::RwLock::new(None),
		}
	}

	// --- C1: peer lifecycle ---------------------------------------------

	pub async fn register_tab(&self, data_worker: Arc<dyn DataWorkerClient>) -> PeerId {
		self.peers.register(data_worker).await
	}

	pub async fn unregister_tab(&self, peer_id: &PeerId) {
		self.peers.unregister(peer_id).await;
	}

	pub async fn get_active_tab_id(&self) -> Option<PeerId> {
		self.peers.active_peer().await
	}

	pub async fn get_tab_count(&self) -> usize {
		self.peers.peer_count().await
	}

	pub async fn is_initialized(&self) -> bool {
		self.peers.remembered_init().await.is_some()
	}

	/// `initialize({ version, baseUrl })`: remembers the version/base URL
	/// pair so a later-registering peer's dispatcher calls have a target,
	/// and loads node types against it.
	pub async fn initialize(&self, version: &str, base_url: &str) -> CoordResult<()> {
		self.peers.remember_init(version.to_string(), base_url.to_string()).await;
		*self.ws_base_url.write().await = Some(to_ws_url(base_url));
		self.dispatcher.load_node_types(base_url).await
	}

	// --- C2: data-worker RPC passthrough ----------------------------------

	pub async fn exec(&self, sql: &str) -> CoordResult<Value> {
		self.dispatcher.exec(sql).await
	}

	pub async fn query(&self, sql: &str) -> CoordResult<Value> {
		self.dispatcher.query(sql).await
	}

	pub async fn query_with_params(&self, sql: &str, params: &Value) -> CoordResult<Value> {
		self.dispatcher.query_with_params(sql, params).await
	}

	pub async fn load_node_types(&self, base_url: &str) -> CoordResult<()> {
		self.dispatcher.load_node_types(base_url).await
	}

	pub async fn store_version(&self, version: &str) {
		*self.stored_version.write().await = Some(version.to_string());
		self.dispatcher.store_version(version.to_string()).await;
	}

	pub async fn get_stored_version(&self) -> Option<String> {
		self.stored_version.read().await.clone()
	}

	// --- C3: doc channel ---------------------------------------------------

	pub async fn subscribe_broadcast(
		&self,
		doc_id: &DocId,
		peer_id: &PeerId,
	) -> tokio::sync::broadcast::Receiver<DocMessage<Vec<u8>>> {
		self.doc_channel.subscribe_broadcast(doc_id, peer_id).await
    }

	pub async fn handle_doc_channel_envelope(
		&self,
		peer_id: &PeerId,
		envelope: Envelope,
	) -> CoordResult<Vec<Envelope>> {
		self.doc_channel.handle_envelope(&self.dispatcher, peer_id, envelope).await
	}

	// --- C9: execution invoker ---------------------------------------------

	pub async fn execute_workflow(
		&self,
		workflow_id: &str,
		base_url: &str,
		trigger_node_name: Option<&str>,
	) -> CoordResult<Option<String>> {
		let ws_base_url = self.ws_base_url.read().await.clone().unwrap_or_else(|| to_ws_url(base_url));
		self.invoker.execute_workflow(workflow_id, base_url, &ws_base_url, trigger_node_name).await
	}

	/// `resolveExpression(workflowId, expression, nodeName)`: an on-demand,
	/// non-persisting evaluation for inline previews in the editor.
	pub async fn resolve_expression(
		&self,
		workflow_id: &str,
		expression: &str,
		node_name: &str,
	) -> CoordResult<Option<Value>> {
		let Some(workflow) = self.registry.workflow(workflow_id).await else {
			return Ok(None);
		};
		let exec_doc_id = DocId::execution(workflow_id);
		let execution = self.registry.get_or_create_execution(exec_doc_id.as_str()).await;
		Ok(crate::resolver::evaluate_ad_hoc(&workflow, &execution, expression, node_name))
	}

	pub fn config(&self) -> &CoordinatorConfig {
		&self.config
	}
}

fn to_ws_url(base_url: &str) -> String {
	if let Some(rest) = base_url.strip_prefix("https://") {
		format!("wss://{rest}")
	} else if let Some(rest) = base_url.strip_prefix("http://") {
		format!("ws://{rest}")
	} else {
		base_url.to_string()
	}
}

// vim: ts=4
