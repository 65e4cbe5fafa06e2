//! Document registry (C4): per-document state — the CRDT document itself,
//! its transport mode, seeding status, and the handles the Room and
//! server-backed transport attach to it.

use crate::prelude::*;
use coordinator_crdt::awareness::AwarenessState;
use coordinator_crdt::{ExecutionDoc, WorkflowDoc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Whether a workflow document is seeded from the local REST API or mirrors
/// a remote CRDT server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocMode {
	Local,
	Server,
}

/// Per-workflow-document bookkeeping.
pub struct WorkflowEntry {
	pub doc: WorkflowDoc,
	pub awareness: AwarenessState,
	pub mode: DocMode,
	seeded: AtomicBool,
	dirty: AtomicBool,
	pub last_version_id: RwLock<Option<String>>,
	pub server_url: RwLock<Option<String>>,
}

impl WorkflowEntry {
	pub(crate) fn new(mode: DocMode) -> Self {
		Self {
			doc: WorkflowDoc::new(),
			awareness: AwarenessState::new(),
			mode,
			seeded: AtomicBool::new(false),
			dirty: AtomicBool::new(false),
			last_version_id: RwLock::new(None),
			server_url: RwLock::new(None),
		}
	}

	pub fn is_seeded(&self) -> bool {
		self.seeded.load(Ordering::Acquire)
	}

	pub fn mark_seeded(&self) {
		self.seeded.store(true, Ordering::Release);
	}

	pub fn mark_dirty(&self) {
		self.dirty.store(true, Ordering::Release);
	}

	pub fn take_dirty(&self) -> bool {
		self.dirty.swap(false, Ordering::AcqRel)
	}
}

/// Per-execution-document bookkeeping.
pub struct ExecutionEntry {
	pub doc: ExecutionDoc,
}

impl Default for ExecutionEntry {
	fn default() -> Self {
		Self { doc: ExecutionDoc::new() }
	}
}

/// Holds every live workflow and execution document, keyed by id.
#[derive(Default)]
pub struct DocumentRegistry {
	workflows: RwLock<HashMap<String, std::sync::Arc<WorkflowEntry>>>,
	executions: RwLock<HashMap<String, std::sync::Arc<ExecutionEntry>>>,
}

impl DocumentRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fetch an existing workflow entry, or create a fresh unseeded one in
	/// the given mode.
	pub async fn get_or_create_workflow(
		&self,
		workflow_id: &str,
		mode: DocMode,
	) -> std::sync::Arc<WorkflowEntry> {
		if let Some(entry) = self.workflows.read().await.get(workflow_id) {
			return entry.clone();
		}
		let mut workflows = self.workflows.write().await;
		workflows
			.entry(workflow_id.to_string())
			.or_insert_with(|| std::sync::Arc::new(WorkflowEntry::new(mode)))
			.clone()
	}

	pub async fn workflow(&self, workflow_id: &str) -> Option<std::sync::Arc<WorkflowEntry>> {
		self.workflows.read().await.get(workflow_id).cloned()
	}

	pub async fn remove_workflow(&self, workflow_id: &str) -> Option<std::sync::Arc<WorkflowEntry>> {
		self.workflows.write().await.remove(workflow_id)
	}

	pub async fn get_or_create_execution(
		&self,
		execution_doc_id: &str,
	) -> std::sync::Arc<ExecutionEntry> {
		if let Some(entry) = self.executions.read().await.get(execution_doc_id) {
			return entry.clone();
		}
		let mut executions = self.executions.write().await;
		executions.entry(execution_doc_id.to_string()).or_insert_with(Default::default).clone()
	}

	pub async fn execution(&self, execution_doc_id: &str) -> Option<std::sync::Arc<ExecutionEntry>> {
		self.executions.read().await.get(execution_doc_id).cloned()
	}

	pub async fn remove_execution(&self, execution_doc_id: &str) -> Option<std::sync::Arc<ExecutionEntry>> {
		self.executions.write().await.remove(execution_doc_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn get_or_create_is_idempotent_per_id() {
		let registry = DocumentRegistry::new();
		let a = registry.get_or_create_workflow("wf-1", DocMode::Local).await;
		let b = registry.get_or_create_workflow("wf-1", DocMode::Server).await;
		assert!(std::sync::Arc::ptr_eq(&a, &b));
		assert_eq!(a.mode, DocMode::Local);
	}

	#[tokio::test]
	async fn dirty_flag_round_trips() {
		let registry = DocumentRegistry::new();
		let entry = registry.get_or_create_workflow("wf-1", DocMode::Local).await;
		assert!(!entry.take_dirty());
		entry.mark_dirty();
		assert!(entry.take_dirty());
		assert!(!entry.take_dirty());
	}

	#[tokio::test]
	async fn remove_drops_entry() {
		let registry = DocumentRegistry::new();
		registry.get_or_create_workflow("wf-1", DocMode::Local).await;
		assert!(registry.remove_workflow("wf-1").await.is_some());
		assert!(registry.workflow("wf-1").await.is_none());
	}
}

// vim: ts=4
