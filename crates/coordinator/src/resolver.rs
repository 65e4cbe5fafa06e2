//! Expression resolver (C7): walks a workflow's node parameters, evaluates
//! expression-tagged leaf values against the current run and pin data, and
//! writes the results into the sibling execution document's `resolvedParams`.

use crate::prelude::*;
use crate::registry::{ExecutionEntry, WorkflowEntry};
use coordinator_crdt::execution_doc::{ResolvedParam, ResolvedParamState};
use coordinator_crdt::expression::is_expression;
use coordinator_crdt::workflow_doc::{EdgeRecord, NodeRecord};
use serde_json::Value;
use std::collections::HashMap;

/// Classification the evaluator raises; maps onto `resolvedParams.state`.
enum EvalError {
	Pending(String),
	Invalid(String),
}

/// Everything the evaluator needs to resolve expressions for one workflow:
/// the node graph, each node's most recent output (if any), and pinned data.
struct EvalContext<'a> {
	nodes_by_id: HashMap<&'a str, &'a NodeRecord>,
	edges: &'a [EdgeRecord],
	last_output: HashMap<&'a str, Value>,
	pin_data: &'a Value,
}

impl<'a> EvalContext<'a> {
	fn parent_of(&self, node_id: &str) -> Option<&'a NodeRecord> {
		let edge = self.edges.iter().find(|e| e.target == node_id)?;
		self.nodes_by_id.get(edge.source.as_str()).copied()
	}

	/// `$json` resolves to the target node's own pinned data if present, else
	/// its first parent's last output item.
	fn input_data(&self, target: &NodeRecord) -> Result<Value, EvalError> {
		if let Some(pinned) = self.pin_data.get(&target.id).and_then(|p| p.get(0)) {
			return Ok(pinned.clone());
		}
		let parent = self
			.parent_of(&target.id)
			.ok_or_else(|| EvalError::Pending("no execution data".into()))?;
		self.node_output(&parent.name)
	}

	fn node_output(&self, node_name: &str) -> Result<Value, EvalError> {
		self.last_output
			.get(node_name)
			.cloned()
			.ok_or_else(|| EvalError::Pending("no node execution data".into()))
	}
}

/// Resolve every expression-bearing parameter on one node; returns the
/// `"<nodeId>:<paramPath>"` keys touched (written) this pass.
fn resolve_node(node: &NodeRecord, ctx: &EvalContext) -> Vec<(String, ResolvedParam)> {
	let mut out = Vec::new();
	walk_parameters(&node.parameters, "", node, ctx, &mut out);
	out
}

fn walk_parameters(
	value: &Value,
	path: &str,
	node: &NodeRecord,
	ctx: &EvalContext,
	out: &mut Vec<(String, ResolvedParam)>,
) {
	match value {
		Value::String(s) if is_expression(s) => {
			let resolved = evaluate(s, node, ctx);
			let entry = match resolved {
				Ok(value) => ResolvedParam {
					expression: s.clone(),
					resolved: value,
					state: ResolvedParamState::Valid,
					error: None,
					resolved_at: Timestamp::now().0,
				},
				Err(EvalError::Pending(message)) => ResolvedParam {
					expression: s.clone(),
					resolved: Value::Null,
					state: ResolvedParamState::Pending,
					error: Some(message),
					resolved_at: Timestamp::now().0,
				},
				Err(EvalError::Invalid(message)) => ResolvedParam {
					expression: s.clone(),
					resolved: Value::Null,
					state: ResolvedParamState::Invalid,
					error: Some(message),
					resolved_at: Timestamp::now().0,
				},
			};
			out.push((path.to_string(), entry));
		}
		Value::Array(items) => {
			for (i, item) in items.iter().enumerate() {
				walk_parameters(item, &format!("{path}[{i}]"), node, ctx, out);
			}
		}
		Value::Object(map) => {
			for (key, item) in map {
				let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
				walk_parameters(item, &child_path, node, ctx, out);
			}
		}
		_ => {}
	}
}

/// Evaluate a single `={{ ... }}` expression string against `node`'s context.
/// Supports a deliberately small path-access subset: `$json.<path>`,
/// `$input.item.json.<path>`, `$node["Name"].json.<path>`, and
/// `$("Name").item.json.<path>`.
fn evaluate(expression: &str, node: &NodeRecord, ctx: &EvalContext) -> Result<Value, EvalError> {
	let inner = expression
		.strip_prefix('=')
		.and_then(|s| s.trim().strip_prefix("{{"))
		.and_then(|s| s.trim().strip_suffix("}}"))
		.map(str::trim)
		.ok_or_else(|| EvalError::Invalid("malformed expression".into()))?;

	let (mut base, rest) = if let Some(rest) = inner.strip_prefix("$json") {
		(ctx.input_data(node)?, rest)
	} else if let Some(rest) = inner.strip_prefix("$input.item.json") {
		(ctx.input_data(node)?, rest)
	} else if let Some(rest) = inner.strip_prefix("$node[") {
		let (name, rest) = parse_bracketed_name(rest)
			.ok_or_else(|| EvalError::Invalid("malformed $node reference".into()))?;
		let rest = rest.strip_prefix(".json").unwrap_or(rest);
		(ctx.node_output(name)?, rest)
	} else if let Some(rest) = inner.strip_prefix("$(") {
		let (name, rest) = parse_quoted_call_name(rest)
			.ok_or_else(|| EvalError::Invalid("malformed $() reference".into()))?;
		let rest = rest.strip_prefix(".item.json").or_else(|| rest.strip_prefix(".json")).unwrap_or(rest);
		(ctx.node_output(name)?, rest)
	} else {
		return Err(EvalError::Invalid(format!("unsupported expression: {inner}")));
	};

	for segment in rest.split('.').map(str::trim).filter(|s| !s.is_empty()) {
		base = base
			.get(segment)
			.cloned()
			.ok_or_else(|| EvalError::Invalid(format!("no field '{segment}' on resolved value")))?;
	}
	Ok(base)
}

fn parse_bracketed_name(rest: &str) -> Option<(&str, &str)> {
	let quote = rest.chars().next()?;
	if quote != '"' && quote != '\'' {
		return None;
	}
	let body = &rest[1..];
	let end = body.find(quote)?;
	let name = &body[..end];
	let after = &body[end + 1..];
	let after = after.strip_prefix(']')?;
	Some((name, after))
}

fn parse_quoted_call_name(rest: &str) -> Option<(&str, &str)> {
	let quote = rest.chars().next()?;
	if quote != '"' && quote != '\'' {
		return None;
	}
	let body = &rest[1..];
	let end = body.find(quote)?;
	let name = &body[..end];
	let after = &body[end + 1..];
	let after = after.strip_prefix(')')?;
	Some((name, after))
}

fn collect_last_output<'a>(
	payload: &'a coordinator_crdt::workflow_doc::WorkflowPayload,
	execution: &ExecutionEntry,
) -> HashMap<&'a str, Value> {
	let mut last_output = HashMap::new();
	for node in &payload.nodes {
		if let Some(data) = latest_task_data(execution, &node.name) {
			last_output.insert(node.name.as_str(), data);
		}
	}
	last_output
}

/// `resolveExpression(workflowId, expression, nodeName)`: evaluate one
/// expression string against `node_name`'s live context without touching
/// `resolvedParams`. Used for inline previews in the editor; unlike
/// [`resolve_workflow`] nothing is written back.
pub fn evaluate_ad_hoc(
	workflow: &WorkflowEntry,
	execution: &ExecutionEntry,
	expression: &str,
	node_name: &str,
) -> Option<Value> {
	let payload = workflow.doc.to_payload("");
	let node = payload.nodes.iter().find(|n| n.name == node_name)?;
	let last_output = collect_last_output(&payload, execution);
	let ctx = EvalContext {
		nodes_by_id: payload.nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
		edges: &payload.edges,
		last_output,
		pin_data: &payload.pin_data,
	};
	evaluate(expression, node, &ctx).ok()
}

/// Run a full resolution sweep over every node in `workflow`, writing results
/// into `execution`'s `resolvedParams` and sweeping stale entries.
pub fn resolve_workflow(workflow: &WorkflowEntry, execution: &ExecutionEntry) {
	let payload = workflow.doc.to_payload("");
	let last_output = collect_last_output(&payload, execution);
	let ctx = EvalContext {
		nodes_by_id: payload.nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
		edges: &payload.edges,
		last_output,
		pin_data: &payload.pin_data,
	};

	for node in &payload.nodes {
		let resolved_this_node = resolve_node(node, &ctx);
		let touched: std::collections::HashSet<&str> =
			resolved_this_node.iter().map(|(path, _)| path.as_str()).collect();

		for stale in execution.doc.resolved_param_paths_for_node(&node.id) {
			if !touched.contains(stale.as_str()) {
				execution.doc.remove_resolved_param(&node.id, &stale);
			}
		}
		for (param_path, resolved) in resolved_this_node {
			execution.doc.set_resolved_param(&node.id, &param_path, &resolved);
		}
	}
}

fn latest_task_data(execution: &ExecutionEntry, node_name: &str) -> Option<Value> {
	let run_data = execution.doc.doc.get_or_insert_map("runData");
	let txn = execution.doc.doc.transact();
	let entry = run_data.get(&txn, node_name)?;
	use yrs::types::ToJson;
	let tasks = coordinator_crdt::json::any_to_json(&entry.to_json(&txn));
	let last = tasks.as_array()?.last()?;
	last.get("data").cloned()
}


// vim: ts=4
