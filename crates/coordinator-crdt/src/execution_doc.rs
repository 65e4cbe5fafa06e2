//! The execution document (`D_e`): live run state for one in-flight or
//! completed workflow execution, as a Yjs CRDT document sibling to the
//! workflow document it tracks (`exec-<workflowId>`).

use crate::json::{any_to_json, json_to_any};
use crate::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::{Doc, In, Map, ReadTxn, Transact, Update};

/// One task entry appended to `runData[nodeName]` on `nodeExecuteBefore` /
/// `nodeExecuteAfter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
	pub start_time: i64,
	pub execution_index: u32,
	pub source: Value,
	#[serde(default)]
	pub hints: Vec<Value>,
	pub execution_status: String,
	#[serde(default)]
	pub execution_time: Option<i64>,
	#[serde(default)]
	pub error: Option<Value>,
	#[serde(default)]
	pub data: Option<Value>,
}

/// One edge's running item-count stats, keyed by edge id in `D_e.edges`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRunStats {
	pub source_node_name: String,
	#[serde(default)]
	pub target_node_name: Option<String>,
	pub connection_type: String,
	pub output_index: usize,
	#[serde(default)]
	pub total_items: u64,
	#[serde(default)]
	pub iterations: u32,
}

/// Resolution state of one expression-bearing parameter, keyed by
/// `"<nodeId>:<paramPath>"` in `D_e.resolvedParams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedParam {
	pub expression: String,
	#[serde(default)]
	pub resolved: Value,
	pub state: ResolvedParamState,
	#[serde(default)]
	pub error: Option<String>,
	pub resolved_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedParamState {
	Valid,
	Pending,
	Invalid,
}

/// Execution metadata: `{ executionId, workflowId, status, mode, startedAt, finishedAt? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMeta {
	pub execution_id: String,
	pub workflow_id: String,
	pub status: String,
	pub mode: String,
	pub started_at: i64,
	#[serde(default)]
	pub finished_at: Option<i64>,
}

/// A Yjs CRDT document hosting one workflow execution's live run state.
pub struct ExecutionDoc {
	pub doc: Doc,
}

impl Default for ExecutionDoc {
	fn default() -> Self {
		Self::new()
	}
}

impl ExecutionDoc {
	pub fn new() -> Self {
		let doc = Doc::new();
		doc.get_or_insert_map("meta");
		doc.get_or_insert_map("nodeIndex");
		doc.get_or_insert_map("runData");
		doc.get_or_insert_map("edges");
		doc.get_or_insert_map("resolvedParams");
		Self { doc }
	}

	/// Reset signal: a write to `meta.executionId` with a new value clears
	/// `runData` and `edges` and rebuilds `nodeIndex` from the workflow
	/// document's current node names, all in one transaction.
	pub fn start_execution(&self, meta: &ExecutionMeta, node_index: &HashMap<String, String>) {
		let meta_map = self.doc.get_or_insert_map("meta");
		let node_index_map = self.doc.get_or_insert_map("nodeIndex");
		let run_data = self.doc.get_or_insert_map("runData");
		let edges = self.doc.get_or_insert_map("edges");

		let mut txn = self.doc.transact_mut();
		for key in run_data.keys(&txn).map(|k| k.to_string()).collect::<Vec<_>>() {
			run_data.remove(&mut txn, &key);
		}
		for key in edges.keys(&txn).map(|k| k.to_string()).collect::<Vec<_>>() {
			edges.remove(&mut txn, &key);
		}
		for key in node_index_map.keys(&txn).map(|k| k.to_string()).collect::<Vec<_>>() {
			node_index_map.remove(&mut txn, &key);
		}
		for (node_id, node_name) in node_index {
			node_index_map.insert(&mut txn, node_id.as_str(), In::Any(json_to_any(&json!(node_name))));
		}
		meta_map.insert(&mut txn, "executionId", In::Any(json_to_any(&json!(meta.execution_id))));
		meta_map.insert(&mut txn, "workflowId", In::Any(json_to_any(&json!(meta.workflow_id))));
		meta_map.insert(&mut txn, "status", In::Any(json_to_any(&json!(meta.status))));
		meta_map.insert(&mut txn, "mode", In::Any(json_to_any(&json!(meta.mode))));
		meta_map.insert(&mut txn, "startedAt", In::Any(json_to_any(&json!(meta.started_at))));
		meta_map.remove(&mut txn, "finishedAt");
	}

	pub fn finish_execution(&self, status: &str, finished_at: i64) {
		let meta_map = self.doc.get_or_insert_map("meta");
		let mut txn = self.doc.transact_mut();
		meta_map.insert(&mut txn, "status", In::Any(json_to_any(&json!(status))));
		meta_map.insert(&mut txn, "finishedAt", In::Any(json_to_any(&json!(finished_at))));
	}

	pub fn meta(&self) -> Option<ExecutionMeta> {
		let meta_map = self.doc.get_or_insert_map("meta");
		let txn = self.doc.transact();
		let get_str = |key: &str| -> Option<String> {
			meta_map.get(&txn, key).map(|v| any_to_json(&v.to_json(&txn))).and_then(|v| {
				v.as_str().map(str::to_string)
			})
		};
		let get_i64 = |key: &str| -> Option<i64> {
			meta_map.get(&txn, key).map(|v| any_to_json(&v.to_json(&txn))).and_then(|v| v.as_i64())
		};
		Some(ExecutionMeta {
			execution_id: get_str("executionId")?,
			workflow_id: get_str("workflowId")?,
			status: get_str("status")?,
			mode: get_str("mode")?,
			started_at: get_i64("startedAt")?,
			finished_at: get_i64("finishedAt"),
		})
	}

	/// Append a task to `runData[nodeName]`. Creates the sequence on first use.
	pub fn push_task(&self, node_name: &str, task: &TaskData) -> CoordResult<()> {
		let run_data = self.doc.get_or_insert_map("runData");
		let mut txn = self.doc.transact_mut();
		let mut tasks: Vec<Value> = run_data
			.get(&txn, node_name)
			.map(|existing| any_to_json(&existing.to_json(&txn)))
			.and_then(|v| v.as_array().cloned())
			.unwrap_or_default();
		let task_json = serde_json::to_value(task)
			.map_err(|e| Error::Serialization(format!("invalid task data: {e}")))?;
		tasks.push(task_json);
		run_data.insert(&mut txn, node_name, In::Any(json_to_any(&Value::Array(tasks))));
		Ok(())
	}

	/// Merge fields into the task matching `execution_index` in `runData[nodeName]`
	/// (`nodeExecuteAfter`/`nodeExecuteAfterData` updating the task opened by
	/// `nodeExecuteBefore`). Concurrent or retried nodes mean the matching task
	/// isn't necessarily the last one pushed, so this searches rather than
	/// assuming tail position.
	pub fn patch_task(&self, node_name: &str, execution_index: u32, patch: &Value) -> CoordResult<()> {
		let run_data = self.doc.get_or_insert_map("runData");
		let mut txn = self.doc.transact_mut();
		let Some(existing) = run_data.get(&txn, node_name) else {
			return Err(Error::UnknownDocument(format!("no run data for node {node_name}")));
		};
		let mut tasks = any_to_json(&existing.to_json(&txn));
		let Some(task) = tasks.as_array_mut().and_then(|a| {
			a.iter_mut().find(|t| t.get("executionIndex").and_then(Value::as_u64) == Some(u64::from(execution_index)))
		}) else {
			return Err(Error::UnknownDocument(format!(
				"no task with executionIndex {execution_index} recorded for node {node_name}"
			)));
		};
		if let (Value::Object(task_obj), Value::Object(patch_obj)) = (task, patch) {
			for (k, v) in patch_obj {
				task_obj.insert(k.clone(), v.clone());
			}
		}
		run_data.insert(&mut txn, node_name, In::Any(json_to_any(&tasks)));
		Ok(())
	}

	/// Apply an item-count delta to one edge's running stats, creating the
	/// entry on first use.
	pub fn record_edge_items(&self, edge_id: &str, stats: &EdgeRunStats, delta_items: u64) {
		let edges = self.doc.get_or_insert_map("edges");
		let mut txn = self.doc.transact_mut();
		let mut current = edges
			.get(&txn, edge_id)
			.map(|existing| any_to_json(&existing.to_json(&txn)))
			.and_then(|v| serde_json::from_value::<EdgeRunStats>(v).ok())
			.unwrap_or_else(|| EdgeRunStats {
				source_node_name: stats.source_node_name.clone(),
				target_node_name: stats.target_node_name.clone(),
				connection_type: stats.connection_type.clone(),
				output_index: stats.output_index,
				total_items: 0,
				iterations: 0,
			});
		current.total_items += delta_items;
		current.iterations += 1;
		let value = serde_json::to_value(&current).unwrap_or(json!({}));
		edges.insert(&mut txn, edge_id, In::Any(json_to_any(&value)));
	}

	/// Write or replace the resolution state of one expression-bearing
	/// parameter. At most one entry exists per `"<nodeId>:<paramPath>"` key.
	pub fn set_resolved_param(&self, node_id: &str, param_path: &str, resolved: &ResolvedParam) {
		let resolved_params = self.doc.get_or_insert_map("resolvedParams");
		let mut txn = self.doc.transact_mut();
		let key = format!("{node_id}:{param_path}");
		let value = serde_json::to_value(resolved).unwrap_or(json!({}));
		resolved_params.insert(&mut txn, key.as_str(), In::Any(json_to_any(&value)));
	}

	pub fn resolved_param(&self, node_id: &str, param_path: &str) -> Option<ResolvedParam> {
		let resolved_params = self.doc.get_or_insert_map("resolvedParams");
		let txn = self.doc.transact();
		let key = format!("{node_id}:{param_path}");
		let value = any_to_json(&resolved_params.get(&txn, &key)?.to_json(&txn));
		serde_json::from_value(value).ok()
	}

	/// Every `resolvedParams` key currently recorded for `node_id`, as the
	/// bare `paramPath` suffix (without the `"<nodeId>:"` prefix).
	pub fn resolved_param_paths_for_node(&self, node_id: &str) -> Vec<String> {
		let resolved_params = self.doc.get_or_insert_map("resolvedParams");
		let txn = self.doc.transact();
		let prefix = format!("{node_id}:");
		resolved_params
			.keys(&txn)
			.filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
			.collect()
	}

	/// Remove a stale `resolvedParams` entry (its expression no longer exists
	/// or is no longer expression-tagged).
	pub fn remove_resolved_param(&self, node_id: &str, param_path: &str) {
		let resolved_params = self.doc.get_or_insert_map("resolvedParams");
		let mut txn = self.doc.transact_mut();
		resolved_params.remove(&mut txn, &format!("{node_id}:{param_path}"));
	}

	pub fn apply_update(&self, bytes: &[u8]) -> CoordResult<()> {
		let update = Update::decode_v1(bytes)
			.map_err(|e| Error::Serialization(format!("invalid CRDT update: {e}")))?;
		let mut txn = self.doc.transact_mut();
		txn.apply_update(update)
			.map_err(|e| Error::Serialization(format!("failed to apply CRDT update: {e}")))?;
		Ok(())
	}

	pub fn encode_state_as_update(&self) -> Vec<u8> {
		let sv = yrs::StateVector::default();
		let txn = self.doc.transact();
		txn.encode_state_as_update_v1(&sv)
	}
}


// vim: ts=4
