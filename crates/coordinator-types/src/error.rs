//! Error handling subsystem. Implements a custom Error type.

pub type CoordResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core coordinator invariants
	NotInitialized,
	NoActivePeer,
	UnknownDocument(String),
	UnknownPeer(String),

	// Input validation
	ValidationError(String),

	// Network and external services
	Rest(Option<u16>, String), // HTTP status (if any) + body/message
	WebSocket(String),
	Timeout,

	// Processing
	Expression(String),
	Serialization(String),
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Self::Serialization(err.to_string())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		tracing::warn!("tokio join error: {}", err);
		Self::Internal(format!("task join failed: {err}"))
	}
}

impl From<hyper::Error> for Error {
	fn from(err: hyper::Error) -> Self {
		tracing::warn!("hyper error: {}", err);
		Self::Rest(None, err.to_string())
	}
}

impl From<hyper_util::client::legacy::Error> for Error {
	fn from(err: hyper_util::client::legacy::Error) -> Self {
		tracing::warn!("hyper client error: {}", err);
		Self::Rest(None, err.to_string())
	}
}

impl From<hyper::http::Error> for Error {
	fn from(err: hyper::http::Error) -> Self {
		tracing::warn!("http error: {}", err);
		Self::Rest(None, err.to_string())
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		tracing::warn!("websocket error: {}", err);
		Self::WebSocket(err.to_string())
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

/// Helper macro for locking mutexes with automatic internal error handling.
///
/// ```ignore
/// let mut data = lock!(my_mutex)?;
/// ```
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
