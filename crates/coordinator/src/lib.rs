//! The workflow-editor coordinator: a single shared background agent that
//! every tab of a workflow editor talks to, keeping CRDT documents, a
//! cross-tab SQLite-backed data worker, and a server-hosted collaboration
//! session all in sync.
//!
//! `coordinator` wires the document model (`coordinator-crdt`) and the
//! broadcast/config fabric (`coordinator-core`) into the ten collaboration
//! components described by the design: peer lifecycle, data-worker RPC
//! passthrough, the doc channel multiplexer, the expression resolver, the
//! seeder/persister, server-backed transport, the execution push projector,
//! and the execution invoker. [`coordinator::Coordinator`] is the single
//! entry point a host (a `SharedWorker`, or the `coordinator-node` binary in
//! this workspace) constructs and drives.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod coordinator;
pub mod dispatcher;
pub mod doc_channel;
pub mod invoker;
pub mod peer;
pub mod prelude;
pub mod push;
pub mod registry;
pub mod resolver;
pub mod rest_client;
pub mod room;
pub mod server_transport;

pub use coordinator::Coordinator;
pub use peer::DataWorkerClient;

// vim: ts=4
