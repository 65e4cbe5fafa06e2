//! Integration tests exercising the coordinator's REST-backed paths (seed,
//! save, run) against a mocked HTTP backend rather than the in-process
//! call surfaces the unit tests cover.

mod common;

use async_trait::async_trait;
use coordinator::dispatcher::QueryDispatcher;
use coordinator::invoker::ExecutionInvoker;
use coordinator::peer::{DataWorkerClient, PeerRegistry};
use coordinator::push::PushProjector;
use coordinator::registry::{DocMode, DocumentRegistry};
use coordinator::rest_client::RestClient;
use coordinator::room::Room;
use coordinator_core::broadcast::BroadcastManager;
use coordinator_core::config::CoordinatorConfig;
use serde_json::Value;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeWorker {
	node_types: Vec<Value>,
}

#[async_trait]
impl DataWorkerClient for FakeWorker {
	async fn exec(&self, _sql: &str) -> coordinator_types::error::CoordResult<Value> {
		Ok(Value::Null)
	}
	async fn query(&self, _sql: &str) -> coordinator_types::error::CoordResult<Value> {
		Ok(Value::Null)
	}
	async fn query_with_params(
		&self,
		_sql: &str,
		_params: &Value,
	) -> coordinator_types::error::CoordResult<Value> {
		Ok(Value::Null)
	}
	async fn load_node_types(
		&self,
		_base_url: &str,
	) -> coordinator_types::error::CoordResult<Vec<Value>> {
		Ok(self.node_types.clone())
	}
}

/// S1: seeding a workflow document fetches it over REST, converts the
/// `connections` object into flat edges, and marks the entry seeded.
#[tokio::test]
async fn room_seed_fetches_and_converts_the_workflow() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/rest/workflows/wf-1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(common::sample_workflow_rest_body()))
		.mount(&server)
		.await;

	let peers = Arc::new(PeerRegistry::new());
	peers.register(Arc::new(FakeWorker { node_types: common::sample_node_type_rows() })).await;
	peers.remember_init("1.0.0".into(), server.uri()).await;
	let dispatcher = QueryDispatcher::new(peers);
	dispatcher.load_node_types(&server.uri()).await.unwrap();

	let registry = Arc::new(DocumentRegistry::new());
	let entry = registry.get_or_create_workflow("wf-1", DocMode::Local).await;
	let room = Room::new(
		"wf-1".into(),
		server.uri(),
		entry.clone(),
		registry.clone(),
		Arc::new(RestClient::new()),
		Arc::new(BroadcastManager::new()),
		Arc::new(CoordinatorConfig::default()),
	);

	room.seed(&dispatcher).await.unwrap();

	assert!(entry.is_seeded());
	let payload = entry.doc.to_payload("wf-1");
	assert_eq!(payload.nodes.len(), 2);
	assert_eq!(payload.edges.len(), 1);
	assert_eq!(payload.edges[0].source_handle, "outputs/main/0");
}

/// S4: `executeWorkflow` POSTs the workflow and trigger to `/run` and
/// returns the execution id the REST API hands back.
#[tokio::test]
async fn execute_workflow_posts_run_request_and_returns_execution_id() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/rest/workflows/wf-1/run"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"data": { "executionId": "exec-123" }
		})))
		.mount(&server)
		.await;

	let registry = Arc::new(DocumentRegistry::new());
	let entry = registry.get_or_create_workflow("wf-1", DocMode::Local).await;
	let raw = common::sample_workflow_rest_body()["data"].clone();
	let payload = coordinator::room::payload_from_rest_json(&raw).unwrap();
	entry.doc.seed(&payload, &coordinator_crdt::node_types::NodeTypeCache::new());

	let push = Arc::new(PushProjector::new(
		registry.clone(),
		Arc::new(BroadcastManager::new()),
		Arc::new(CoordinatorConfig::default()),
	));
	let dispatcher = Arc::new(QueryDispatcher::new(Arc::new(PeerRegistry::new())));
	let invoker = ExecutionInvoker::new(registry, push, Arc::new(RestClient::new()), dispatcher);

	let execution_id = invoker
		.execute_workflow("wf-1", &server.uri(), "ws://127.0.0.1:0", None)
		.await
		.unwrap();

	assert_eq!(execution_id, Some("exec-123".to_string()));
}

// vim: ts=4
