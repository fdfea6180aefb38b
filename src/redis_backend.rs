//! Standalone Redis backend.

use crate::backend::{BackendKind, CacheBackend};
use crate::config::BackendConfig;
use crate::memory::MemoryFallback;
use redis::{Client, Connection, ErrorKind, RedisError, RedisResult};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Keys scanned per SCAN iteration when clearing by pattern.
const SCAN_BATCH_SIZE: usize = 100;

/// Cache backend against a single Redis node.
///
/// Owns one connection handle. A connection failure at construction leaves
/// the backend in a degraded state rather than failing: every operation
/// retries the remote store and falls back to the in-memory table (when
/// enabled) until the node becomes reachable again.
pub struct RedisBackend {
	client: Option<Client>,
	connection: Mutex<Option<Connection>>,
	fallback: Option<MemoryFallback>,
	config: BackendConfig,
}

impl RedisBackend {
	/// Construct the backend and probe connectivity with a ping.
	///
	/// Never fails: an unreachable node is logged and the instance starts
	/// degraded.
	pub fn connect(config: BackendConfig) -> Self {
		let client = match Client::open(config.connection_info()) {
			Ok(client) => Some(client),
			Err(err) => {
				warn!(error = %err, "could not construct redis client");
				None
			}
		};

		let backend = Self {
			client,
			connection: Mutex::new(None),
			fallback: config.fallback_enabled.then(MemoryFallback::new),
			config,
		};

		match backend.with_connection(|conn| redis::cmd("PING").query::<String>(conn)) {
			Ok(pong) => info!(response = %pong, "redis initialized"),
			Err(err) => {
				warn!(error = %err, "redis unreachable, cache starts in degraded mode");
			}
		}

		backend
	}

	fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
		self.connection.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Run `op` on the owned connection, establishing it on demand.
	///
	/// A failed operation drops the connection handle so the next call
	/// reconnects.
	fn with_connection<T>(
		&self,
		op: impl FnOnce(&mut Connection) -> RedisResult<T>,
	) -> RedisResult<T> {
		let mut guard = self.lock_connection();
		if guard.is_none() {
			let client = self.client.as_ref().ok_or_else(|| {
				RedisError::from((ErrorKind::IoError, "redis client unavailable"))
			})?;
			// The timeout covers connection setup too; a node that accepts
			// TCP but never replies must not stall the caller.
			let conn = client.get_connection_with_timeout(self.config.response_timeout)?;
			conn.set_read_timeout(Some(self.config.response_timeout))?;
			conn.set_write_timeout(Some(self.config.response_timeout))?;
			*guard = Some(conn);
		}

		match guard.as_mut() {
			Some(conn) => {
				let result = op(conn);
				if result.is_err() {
					*guard = None;
				}
				result
			}
			None => Err(RedisError::from((
				ErrorKind::IoError,
				"redis connection unavailable",
			))),
		}
	}

	fn clear_remote(&self, prefix: &str) -> RedisResult<bool> {
		let pattern = format!("{prefix}*");
		let mut removed = false;
		let mut cursor: u64 = 0;

		loop {
			let (next_cursor, keys): (u64, Vec<String>) = self.with_connection(|conn| {
				redis::cmd("SCAN")
					.arg(cursor)
					.arg("MATCH")
					.arg(&pattern)
					.arg("COUNT")
					.arg(SCAN_BATCH_SIZE)
					.query(conn)
			})?;

			if !keys.is_empty() {
				let _: () =
					self.with_connection(|conn| redis::cmd("UNLINK").arg(&keys).query(conn))?;
				removed = true;
			}

			cursor = next_cursor;
			if cursor == 0 {
				break;
			}
		}

		Ok(removed)
	}
}

impl CacheBackend for RedisBackend {
	fn get(&self, key: &str) -> Option<Vec<u8>> {
		match self.with_connection(|conn| redis::cmd("GET").arg(key).query::<Option<Vec<u8>>>(conn))
		{
			Ok(value) => value,
			Err(err) => {
				warn!(error = %err, key, "redis get failed, consulting fallback");
				self.fallback.as_ref().and_then(|fallback| fallback.get(key))
			}
		}
	}

	fn set(&self, key: &str, value: &[u8], ttl: Duration) {
		let millis = crate::backend::ttl_millis(ttl);
		let result = self.with_connection(|conn| {
			redis::cmd("SET")
				.arg(key)
				.arg(value)
				.arg("PX")
				.arg(millis)
				.query::<()>(conn)
		});

		if let Err(err) = result {
			warn!(error = %err, key, "redis set failed, writing to fallback");
			if let Some(fallback) = &self.fallback {
				fallback.set(key, value.to_vec(), ttl);
			}
		}
	}

	fn clear(&self, prefix: &str) -> bool {
		match self.clear_remote(prefix) {
			Ok(removed) => removed,
			Err(err) => {
				warn!(error = %err, prefix, "redis clear failed, clearing fallback");
				match &self.fallback {
					Some(fallback) => fallback.clear(prefix) > 0,
					None => false,
				}
			}
		}
	}

	fn close(&self) {
		let mut guard = self.lock_connection();
		if guard.take().is_some() {
			info!("redis connection closed");
		}
	}

	fn config(&self) -> &BackendConfig {
		&self.config
	}

	fn kind(&self) -> BackendKind {
		BackendKind::Standalone
	}
}
