pub use crate::broadcast::{BroadcastManager, DeliveryResult, DocMessage};
pub use crate::config::CoordinatorConfig;
pub use coordinator_types::prelude::*;

// vim: ts=4
