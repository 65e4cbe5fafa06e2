//! CRDT document model for the workflow-editor coordinator, using the Yjs
//! protocol via `yrs`.
//!
//! This crate owns the shape of the two document kinds the coordinator hosts
//! (the workflow document and its sibling execution document), the binary
//! wire envelope used on the doc channel, and the pure helpers (handle
//! computation, expression string rewriting) that those documents need.
//! It has no knowledge of peers, transports, or REST calls — that belongs to
//! the `coordinator` crate.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod awareness;
pub mod execution_doc;
pub mod expression;
pub mod json;
pub mod node_types;
pub mod prelude;
pub mod wire;
pub mod workflow_doc;

pub use execution_doc::ExecutionDoc;
pub use workflow_doc::WorkflowDoc;

// vim: ts=4
