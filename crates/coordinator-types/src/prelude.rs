pub use crate::error::{CoordResult, Error};
pub use crate::types::{DocId, PeerId, Timestamp};
pub use crate::utils::random_id;
pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
