//! Execution invoker (C9): kicks off a workflow run against the local REST
//! API and hands back the resulting execution id.

use crate::dispatcher::QueryDispatcher;
use crate::prelude::*;
use crate::push::PushProjector;
use crate::registry::DocumentRegistry;
use crate::rest_client::RestClient;
use serde_json::{json, Value};
use std::sync::Arc;

/// Node types the invoker accepts as an implicit trigger when the caller
/// doesn't name one explicitly.
const MANUAL_TRIGGER_TYPES: &[&str] =
	&["n8n-nodes-base.manualTrigger", "n8n-nodes-base.executeWorkflowTrigger"];

pub struct ExecutionInvoker {
	registry: Arc<DocumentRegistry>,
	push: Arc<PushProjector>,
	rest: Arc<RestClient>,
	dispatcher: Arc<QueryDispatcher>,
}

impl ExecutionInvoker {
	pub fn new(
		registry: Arc<DocumentRegistry>,
		push: Arc<PushProjector>,
		rest: Arc<RestClient>,
		dispatcher: Arc<QueryDispatcher>,
	) -> Self {
		Self { registry, push, rest, dispatcher }
	}

	/// Returns `Ok(None)` for the "fail, return null" cases the spec treats as
	/// non-exceptional (no workflow mirror, no trigger, non-2xx response).
	pub async fn execute_workflow(
		&self,
		workflow_id: &str,
		base_url: &str,
		ws_base_url: &str,
		trigger_node_name: Option<&str>,
	) -> CoordResult<Option<String>> {
		self.push.ensure_connection(ws_base_url).await?;
		let push_ref = self.push.push_ref().to_string();

		let Some(workflow) = self.registry.workflow(workflow_id).await else {
			return Ok(None);
		};
		let payload = workflow.doc.to_payload(workflow_id);

		let Some(trigger_name) = self.resolve_trigger_name(&payload, trigger_node_name).await else {
			return Ok(None);
		};

		let connections = crate::room::edges_to_connections(
			&payload.edges,
			&payload.nodes.iter().map(|n| (n.id.as_str(), n.name.as_str())).collect(),
		);
		let nodes: Vec<Value> = payload.nodes.iter().map(crate::room::node_record_to_rest).collect();

		let body = json!({
			"workflowData": {
				"id": payload.id,
				"name": payload.name,
				"nodes": nodes,
				"connections": connections,
				"settings": payload.settings,
				"staticData": Value::Null,
				"pinData": payload.pin_data,
			},
			"triggerToStartFrom": { "name": trigger_name },
		});

		match self.rest.run_workflow(base_url, workflow_id, &push_ref, &body).await {
			Ok(execution_id) => Ok(Some(execution_id)),
			Err(Error::Rest(_, _)) => Ok(None),
			Err(other) => Err(other),
		}
	}

	/// Explicit argument wins outright; else the first node on the manual-
	/// trigger whitelist; else the first node whose loaded type description
	/// declares `isTrigger: true`.
	async fn resolve_trigger_name(
		&self,
		payload: &coordinator_crdt::workflow_doc::WorkflowPayload,
		explicit: Option<&str>,
	) -> Option<String> {
		if let Some(name) = explicit {
			return payload.nodes.iter().any(|n| n.name == name).then(|| name.to_string());
		}
		if let Some(node) = payload.nodes.iter().find(|n| MANUAL_TRIGGER_TYPES.contains(&n.node_type.as_str())) {
			return Some(node.name.clone());
		}
		for node in &payload.nodes {
			let key = format!("{}@{}", node.node_type, node.type_version);
			let is_trigger = self
				.dispatcher
				.node_type(&key)
				.await
				.and_then(|row| row.get("isTrigger").and_then(Value::as_bool))
				.unwrap_or(false);
			if is_trigger {
				return Some(node.name.clone());
			}
		}
		None
	}
}


// vim: ts=4
