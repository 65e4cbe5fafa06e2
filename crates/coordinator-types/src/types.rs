//! Small value types shared across the coordinator crates.

use serde::{Deserialize, Serialize};

/// Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		let ms = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or(0);
		Self(ms)
	}

	pub fn from_now(offset_ms: i64) -> Self {
		Self(Self::now().0 + offset_ms)
	}

	pub fn add_seconds(&self, secs: i64) -> Self {
		Self(self.0 + secs * 1000)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Opaque identifier for a connected peer (browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Box<str>);

impl std::fmt::Display for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<String> for PeerId {
	fn from(s: String) -> Self {
		Self(s.into_boxed_str())
	}
}

/// Identifier of a CRDT document: either a workflow id or `exec-<workflowId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub Box<str>);

impl DocId {
	pub fn workflow(workflow_id: &str) -> Self {
		Self(workflow_id.into())
	}

	pub fn execution(workflow_id: &str) -> Self {
		Self(format!("exec-{workflow_id}").into_boxed_str())
	}

	pub fn is_execution(&self) -> bool {
		self.0.starts_with("exec-")
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for DocId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for DocId {
	fn from(s: &str) -> Self {
		Self(s.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn execution_doc_id_is_prefixed() {
		let id = DocId::execution("wf-1");
		assert_eq!(id.as_str(), "exec-wf-1");
		assert!(id.is_execution());
	}

	#[test]
	fn workflow_doc_id_is_not_execution() {
		let id = DocId::workflow("wf-1");
		assert!(!id.is_execution());
	}

	#[test]
	fn timestamp_add_seconds() {
		let t = Timestamp(1_000);
		assert_eq!(t.add_seconds(2).0, 3_000);
	}
}

// vim: ts=4
