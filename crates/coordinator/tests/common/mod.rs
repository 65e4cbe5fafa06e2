//! Shared fixtures for the coordinator's REST-dependent integration tests.

use serde_json::{json, Value};

/// A two-node workflow (`Manual Trigger` -> `Set`) in n8n's REST wire shape,
/// the body a mocked `GET /rest/workflows/<id>` would return under `data`.
pub fn sample_workflow_rest_body() -> Value {
	json!({
		"data": {
			"id": "wf-1",
			"name": "Demo",
			"versionId": "v1",
			"nodes": [
				{
					"id": "n1",
					"name": "Manual Trigger",
					"type": "n8n-nodes-base.manualTrigger",
					"typeVersion": 1,
					"position": [0.0, 0.0],
				},
				{
					"id": "n2",
					"name": "Set",
					"type": "n8n-nodes-base.set",
					"typeVersion": 1,
					"position": [1.0, 0.0],
					"parameters": {"value": "={{ $json.x }}"},
				},
			],
			"connections": {
				"Manual Trigger": { "main": [ [ { "node": "Set", "type": "main", "index": 0 } ] ] },
			},
			"settings": {},
			"pinData": {},
		}
	})
}

/// The node-type rows a mocked data worker would hand back for the nodes
/// referenced by [`sample_workflow_rest_body`].
pub fn sample_node_type_rows() -> Vec<Value> {
	vec![
		json!({"name": "n8n-nodes-base.manualTrigger", "version": 1, "isTrigger": true}),
		json!({"name": "n8n-nodes-base.set", "version": 1, "isTrigger": false}),
	]
}

// vim: ts=4
