//! Binary entry point for the workflow-editor coordinator.
//!
//! Wires together a [`Coordinator`], installs tracing, and drives a small
//! in-process demonstration harness: a couple of simulated peers register,
//! one subscribes to a workflow document and exchanges a sync envelope, and
//! both unregister cleanly. It stands in for the real host — a browser
//! `SharedWorker` talking to tabs over `postMessage` — which is outside
//! Rust's purview here.

use async_trait::async_trait;
use coordinator::peer::DataWorkerClient;
use coordinator::Coordinator;
use coordinator_core::config::CoordinatorConfig;
use coordinator_crdt::wire::{Envelope, MessageType};
use coordinator_types::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

/// A stand-in `DataWorkerClient`: answers schema-shaped queries without a
/// real embedded database, good enough to exercise the dispatcher and seed
/// path's node-types plumbing.
struct DemoWorker;

#[async_trait]
impl DataWorkerClient for DemoWorker {
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
		Ok(vec![json!({"name": "n8n-nodes-base.manualTrigger", "version": 1, "isTrigger": true})])
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = CoordinatorConfig::from_env();
	let coordinator = Coordinator::new(config);

	let tab_a = coordinator.register_tab(Arc::new(DemoWorker)).await;
	let tab_b = coordinator.register_tab(Arc::new(DemoWorker)).await;
	info!(active = %tab_a, tabs = coordinator.get_tab_count().await, "peers registered");

	if let Err(err) = coordinator.initialize("1.0.0", "http://localhost:5678").await {
		warn!(error = %err, "initialize failed; continuing with defaults");
	}

	let doc_id = DocId::workflow("demo-workflow");
	let mut inbox = coordinator.subscribe_broadcast(&doc_id, &tab_b).await;

	let subscribe = Envelope::new(MessageType::Subscribe, doc_id.clone(), b"http://localhost:5678".to_vec());
	match coordinator.handle_doc_channel_envelope(&tab_a, subscribe).await {
		Ok(replies) => info!(count = replies.len(), "subscribe acknowledged"),
		Err(err) => warn!(error = %err, "subscribe failed"),
	}

	if let Ok(message) = inbox.try_recv() {
		debug!(len = message.body.len(), "tab_b observed a fanned-out doc message");
	}

	coordinator.unregister_tab(&tab_a).await;
	coordinator.unregister_tab(&tab_b).await;
	info!("demo harness complete");
}

// vim: ts=4
