//! Shared types and error handling for the workflow-editor coordinator.
//!
//! This crate holds the foundational types used by every other coordinator
//! crate: the crate-wide error enum, a handful of small value types, and
//! string utilities. Extracting these keeps the CRDT and transport crates
//! free of a dependency on each other.

pub mod error;
pub mod prelude;
pub mod types;
pub mod utils;

// vim: ts=4
