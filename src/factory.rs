//! Backend selection and the process-wide registry.
//!
//! A [`CacheRegistry`] holds at most one live backend. The first
//! [`initialize`](CacheRegistry::initialize) wins for the lifetime of the
//! registry; later calls are no-ops. A process-wide registry backs the
//! crate-level convenience functions, while tests construct their own
//! instances and pass them to [`Cached`](crate::Cached) explicitly.

use crate::backend::CacheBackend;
use crate::config::{BackendConfig, TopologyMode};
use crate::error::{CacheError, Result};
use crate::redis_backend::RedisBackend;
use crate::redis_cluster::RedisClusterBackend;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

static REGISTRY: CacheRegistry = CacheRegistry::new();

/// The process-wide registry used by [`crate::init`] and [`Cached::new`](crate::Cached::new).
pub(crate) fn global() -> &'static CacheRegistry {
	&REGISTRY
}

/// Holds the single live backend instance.
///
/// Lifecycle: uninitialized, then initialized by the first
/// `initialize` call, then optionally closed. A backend is never
/// re-created implicitly; [`reset`](CacheRegistry::reset) exists for tests
/// and explicit teardown.
pub struct CacheRegistry {
	slot: RwLock<Option<Arc<dyn CacheBackend>>>,
}

impl CacheRegistry {
	pub const fn new() -> Self {
		Self {
			slot: RwLock::new(None),
		}
	}

	/// Construct and install the backend; idempotent, first call wins.
	///
	/// Topology selection: an explicit mode is honored as-is, while
	/// [`TopologyMode::Auto`] probes the target node. Construction never
	/// leaves a partially usable registry: an unreachable store yields a
	/// degraded backend that serves from its fallback until the store
	/// recovers.
	pub fn initialize(&self, config: BackendConfig) {
		let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
		if slot.is_some() {
			debug!("cache backend already initialized, keeping existing instance");
			return;
		}
		*slot = Some(build_backend(config));
	}

	/// The active backend, if one was initialized.
	pub fn backend(&self) -> Option<Arc<dyn CacheBackend>> {
		self.slot
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// The active backend, or [`CacheError::NotInitialized`].
	///
	/// This is the strict surface; the caching wrapper itself degrades to
	/// pass-through execution instead of using it.
	pub fn try_backend(&self) -> Result<Arc<dyn CacheBackend>> {
		self.backend().ok_or(CacheError::NotInitialized)
	}

	/// Close the active backend's connections; best-effort.
	pub fn close(&self) {
		if let Some(backend) = self.backend() {
			backend.close();
			info!("cache connections closed");
		}
	}

	/// Drop the active backend so a later `initialize` can install a new
	/// one. For tests and explicit teardown only.
	pub fn reset(&self) {
		let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
		*slot = None;
	}
}

impl Default for CacheRegistry {
	fn default() -> Self {
		Self::new()
	}
}

fn build_backend(config: BackendConfig) -> Arc<dyn CacheBackend> {
	let clustered = match config.mode {
		TopologyMode::Cluster => true,
		TopologyMode::Standalone => false,
		TopologyMode::Auto => detect_cluster(&config),
	};

	if clustered {
		Arc::new(RedisClusterBackend::connect(config))
	} else {
		Arc::new(RedisBackend::connect(config))
	}
}

/// Probe the target node with `CLUSTER INFO`.
///
/// A structured response means the node is part of a cluster. A protocol
/// error ("cluster support disabled") means standalone. A connectivity
/// failure also selects standalone, optimistically, with a warning.
pub(crate) fn detect_cluster(config: &BackendConfig) -> bool {
	let client = match redis::Client::open(config.connection_info()) {
		Ok(client) => client,
		Err(err) => {
			warn!(error = %err, "cluster probe could not build a client, assuming standalone");
			return false;
		}
	};

	let mut conn = match client.get_connection_with_timeout(config.response_timeout) {
		Ok(conn) => conn,
		Err(err) => {
			warn!(error = %err, "cluster probe could not connect, assuming standalone");
			return false;
		}
	};
	let timeout = Some(config.response_timeout);
	if conn.set_read_timeout(timeout).is_err() || conn.set_write_timeout(timeout).is_err() {
		warn!("cluster probe could not configure timeouts, assuming standalone");
		return false;
	}

	match redis::cmd("CLUSTER").arg("INFO").query::<String>(&mut conn) {
		Ok(_) => {
			info!("redis cluster mode detected");
			true
		}
		Err(err) => {
			info!(error = %err, "redis standalone mode detected");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::BackendKind;
	use std::time::Duration;

	fn unreachable(mode: TopologyMode) -> BackendConfig {
		BackendConfig::new("127.0.0.1", 6399)
			.with_mode(mode)
			.with_response_timeout(Duration::from_millis(200))
	}

	#[test]
	fn initialize_is_idempotent_first_call_wins() {
		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Standalone));
		let first = registry.backend().unwrap();

		registry.initialize(unreachable(TopologyMode::Cluster));
		let second = registry.backend().unwrap();
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(second.kind(), BackendKind::Standalone);
	}

	#[test]
	fn try_backend_reports_not_initialized() {
		let registry = CacheRegistry::new();
		assert!(matches!(
			registry.try_backend(),
			Err(CacheError::NotInitialized)
		));
	}

	#[test]
	fn explicit_modes_select_their_backend() {
		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Standalone));
		assert_eq!(
			registry.backend().unwrap().kind(),
			BackendKind::Standalone
		);

		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Cluster));
		assert_eq!(registry.backend().unwrap().kind(), BackendKind::Cluster);
	}

	#[test]
	fn auto_probe_against_a_stalled_node_is_bounded() {
		let port = crate::testsupport::silent_server();
		let (tx, rx) = std::sync::mpsc::channel();
		std::thread::spawn(move || {
			let config = BackendConfig::new("127.0.0.1", port)
				.with_mode(TopologyMode::Auto)
				.with_response_timeout(Duration::from_millis(200));
			let _ = tx.send(detect_cluster(&config));
		});

		let clustered = rx
			.recv_timeout(Duration::from_secs(5))
			.expect("probe blocked on a node that accepts but never replies");
		assert!(!clustered);
	}

	#[test]
	fn auto_detect_defaults_to_standalone_when_unreachable() {
		assert!(!detect_cluster(&unreachable(TopologyMode::Auto)));

		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Auto));
		assert_eq!(
			registry.backend().unwrap().kind(),
			BackendKind::Standalone
		);
	}

	#[test]
	fn reset_clears_the_instance() {
		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Standalone));
		assert!(registry.backend().is_some());

		registry.reset();
		assert!(registry.backend().is_none());

		// A fresh initialize installs a new instance after reset.
		registry.initialize(unreachable(TopologyMode::Standalone));
		assert!(registry.backend().is_some());
	}

	#[test]
	fn close_on_degraded_backend_is_best_effort() {
		let registry = CacheRegistry::new();
		registry.initialize(unreachable(TopologyMode::Standalone));
		registry.close();
		registry.close();
	}
}
