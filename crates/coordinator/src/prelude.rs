pub use coordinator_core::prelude::*;

// vim: ts=4
