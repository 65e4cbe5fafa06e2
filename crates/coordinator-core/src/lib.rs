//! Core infrastructure for the workflow-editor coordinator.
//!
//! Holds the ambient concerns shared by every coordination component:
//! startup configuration and the peer-fanout broadcast fabric.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod prelude;

pub use broadcast::BroadcastManager;
pub use config::CoordinatorConfig;

// vim: ts=4
