pub use coordinator_types::prelude::*;

// vim: ts=4
