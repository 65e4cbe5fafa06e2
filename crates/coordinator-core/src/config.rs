//! Startup configuration, read from the environment with typed defaults.

use std::time::Duration;

/// Tunables for the coordinator, loaded once at process start.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
	/// Timeout applied to every outbound REST call (seed, save, execute).
	pub rest_timeout: Duration,
	/// Debounce window for expression re-resolution after a parameter edit.
	pub param_debounce: Duration,
	/// Debounce window before a dirty workflow document is flushed to the server.
	pub save_debounce: Duration,
	/// Initial backoff before the push socket's first reconnect attempt.
	pub push_reconnect_backoff: Duration,
	/// Ceiling on the exponential push-socket reconnect backoff.
	pub push_reconnect_backoff_max: Duration,
	/// Interval between heartbeat pings on the push socket and server CRDT link.
	pub heartbeat_interval: Duration,
	/// Hard cap on tracked awareness clients per peer, per document.
	pub max_awareness_clients_per_peer: usize,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			rest_timeout: Duration::from_secs(20),
			param_debounce: Duration::from_millis(10),
			save_debounce: Duration::from_millis(800),
			push_reconnect_backoff: Duration::from_millis(250),
			push_reconnect_backoff_max: Duration::from_secs(30),
			heartbeat_interval: Duration::from_secs(30),
			max_awareness_clients_per_peer: 64,
		}
	}
}

impl CoordinatorConfig {
	/// Load configuration from the environment, falling back to defaults for
	/// anything unset or unparsable.
	pub fn from_env() -> Self {
		let defaults = Self::default();
		Self {
			rest_timeout: env_millis("COORD_REST_TIMEOUT_MS").unwrap_or(defaults.rest_timeout),
			param_debounce: env_millis("COORD_PARAM_DEBOUNCE_MS").unwrap_or(defaults.param_debounce),
			save_debounce: env_millis("COORD_SAVE_DEBOUNCE_MS").unwrap_or(defaults.save_debounce),
			push_reconnect_backoff: env_millis("COORD_PUSH_BACKOFF_MS")
				.unwrap_or(defaults.push_reconnect_backoff),
			push_reconnect_backoff_max: env_millis("COORD_PUSH_BACKOFF_MAX_MS")
				.unwrap_or(defaults.push_reconnect_backoff_max),
			heartbeat_interval: env_millis("COORD_HEARTBEAT_MS").unwrap_or(defaults.heartbeat_interval),
			max_awareness_clients_per_peer: std::env::var("COORD_MAX_AWARENESS_CLIENTS")
				.ok()
				.and_then(|v| v.parse().ok())
				.unwrap_or(defaults.max_awareness_clients_per_peer),
		}
	}
}

fn env_millis(name: &str) -> Option<Duration> {
	std::env::var(name).ok()?.parse::<u64>().ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let cfg = CoordinatorConfig::default();
		assert!(cfg.param_debounce < cfg.save_debounce);
		assert!(cfg.push_reconnect_backoff < cfg.push_reconnect_backoff_max);
	}

	#[test]
	fn env_millis_ignores_garbage() {
		std::env::remove_var("COORD_DOES_NOT_EXIST");
		assert_eq!(env_millis("COORD_DOES_NOT_EXIST"), None);
	}
}

// vim: ts=4
