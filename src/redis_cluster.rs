//! Clustered Redis backend.

use crate::backend::{BackendKind, CacheBackend};
use crate::config::BackendConfig;
use crate::memory::MemoryFallback;
use redis::cluster::{ClusterClient, ClusterClientBuilder, ClusterConnection};
use redis::{ErrorKind, RedisError, RedisResult, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

const SCAN_BATCH_SIZE: usize = 100;
/// Keys deleted per UNLINK command, bounding command size on fan-out clears.
const CLEAR_BATCH: usize = 200;

/// Cache backend against a Redis Cluster.
///
/// Same contract as [`RedisBackend`](crate::RedisBackend); construction
/// failures leave a degraded, fallback-only instance. Pattern clears
/// enumerate the primaries and cursor-scan each one, unlinking keys in
/// bounded batches.
pub struct RedisClusterBackend {
	client: Option<ClusterClient>,
	connection: Mutex<Option<ClusterConnection>>,
	fallback: Option<MemoryFallback>,
	config: BackendConfig,
}

impl RedisClusterBackend {
	/// Construct the backend from the configured seed nodes and probe
	/// connectivity. Never fails.
	pub fn connect(config: BackendConfig) -> Self {
		let nodes: Vec<redis::ConnectionInfo> = if config.cluster.startup_nodes.is_empty() {
			vec![config.connection_info()]
		} else {
			config
				.cluster
				.startup_nodes
				.iter()
				.map(|(host, port)| config.node_info(host, *port))
				.collect()
		};

		let mut builder = ClusterClientBuilder::new(nodes)
			.retries(config.cluster.retries)
			.connection_timeout(config.response_timeout)
			.response_timeout(config.response_timeout);
		if let Some(username) = &config.username {
			builder = builder.username(username.clone());
		}
		if let Some(password) = &config.password {
			builder = builder.password(password.clone());
		}
		if config.cluster.read_from_replicas {
			builder = builder.read_from_replicas();
		}

		let client = match builder.build() {
			Ok(client) => Some(client),
			Err(err) => {
				warn!(error = %err, "could not construct redis cluster client");
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
			Ok(pong) => {
				info!(response = %pong, "redis cluster initialized");
				if backend.config.cluster.require_full_coverage {
					backend.check_slot_coverage();
				}
			}
			Err(err) => {
				warn!(error = %err, "redis cluster unreachable, cache starts in degraded mode");
			}
		}

		backend
	}

	fn check_slot_coverage(&self) {
		let state =
			self.with_connection(|conn| redis::cmd("CLUSTER").arg("INFO").query::<String>(conn));
		match state {
			Ok(cluster_info) if cluster_info.contains("cluster_state:ok") => {}
			Ok(_) => warn!("redis cluster does not cover all hash slots"),
			Err(err) => warn!(error = %err, "could not verify cluster slot coverage"),
		}
	}

	fn lock_connection(&self) -> MutexGuard<'_, Option<ClusterConnection>> {
		self.connection.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn with_connection<T>(
		&self,
		op: impl FnOnce(&mut ClusterConnection) -> RedisResult<T>,
	) -> RedisResult<T> {
		let mut guard = self.lock_connection();
		if guard.is_none() {
			let client = self.client.as_ref().ok_or_else(|| {
				RedisError::from((ErrorKind::IoError, "redis cluster client unavailable"))
			})?;
			*guard = Some(client.get_connection()?);
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
				"redis cluster connection unavailable",
			))),
		}
	}

	fn clear_remote(&self, prefix: &str) -> RedisResult<bool> {
		// SCAN sent through the cluster connection lands on an arbitrary
		// node per invocation, which breaks the cursor and misses shards.
		// Enumerate the primaries and walk each one's keyspace directly.
		let slots: Value =
			self.with_connection(|conn| redis::cmd("CLUSTER").arg("SLOTS").query(conn))?;
		let nodes = primary_nodes(&slots);
		if nodes.is_empty() {
			return Err(RedisError::from((
				ErrorKind::ResponseError,
				"no primaries in CLUSTER SLOTS reply",
			)));
		}

		let pattern = format!("{prefix}*");
		let mut removed = false;
		for (host, port) in nodes {
			removed |= self.clear_node(&host, port, &pattern)?;
		}
		Ok(removed)
	}

	/// Cursor-scan one primary and unlink matching keys in bounded batches.
	fn clear_node(&self, host: &str, port: u16, pattern: &str) -> RedisResult<bool> {
		let client = redis::Client::open(self.config.node_info(host, port))?;
		let mut conn = client.get_connection_with_timeout(self.config.response_timeout)?;
		conn.set_read_timeout(Some(self.config.response_timeout))?;
		conn.set_write_timeout(Some(self.config.response_timeout))?;

		let mut removed = false;
		let mut cursor: u64 = 0;
		loop {
			let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
				.arg(cursor)
				.arg("MATCH")
				.arg(pattern)
				.arg("COUNT")
				.arg(SCAN_BATCH_SIZE)
				.query(&mut conn)?;

			// One UNLINK per key inside a pipeline: batched round trips
			// without multi-key commands, which the node would reject when
			// the keys span hash slots.
			for batch in keys.chunks(CLEAR_BATCH) {
				let mut pipe = redis::pipe();
				for key in batch {
					pipe.cmd("UNLINK").arg(key).ignore();
				}
				let _: () = pipe.query(&mut conn)?;
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

/// Unique primary `(host, port)` pairs from a `CLUSTER SLOTS` reply.
///
/// Each slot range lists its primary third, followed by replicas; ranges
/// served by the same node are deduplicated and malformed entries skipped.
fn primary_nodes(slots: &Value) -> Vec<(String, u16)> {
	let Value::Array(ranges) = slots else {
		return Vec::new();
	};

	let mut nodes = Vec::new();
	for range in ranges {
		let Value::Array(parts) = range else { continue };
		let Some(Value::Array(primary)) = parts.get(2) else {
			continue;
		};
		let host = match primary.first() {
			Some(Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
			Some(Value::SimpleString(text)) => text.clone(),
			_ => continue,
		};
		let port = match primary.get(1) {
			Some(Value::Int(port)) => match u16::try_from(*port) {
				Ok(port) => port,
				Err(_) => continue,
			},
			_ => continue,
		};
		if host.is_empty() {
			continue;
		}
		let node = (host, port);
		if !nodes.contains(&node) {
			nodes.push(node);
		}
	}
	nodes
}

impl CacheBackend for RedisClusterBackend {
	fn get(&self, key: &str) -> Option<Vec<u8>> {
		match self.with_connection(|conn| redis::cmd("GET").arg(key).query::<Option<Vec<u8>>>(conn))
		{
			Ok(value) => value,
			Err(err) => {
				warn!(error = %err, key, "cluster get failed, consulting fallback");
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
			warn!(error = %err, key, "cluster set failed, writing to fallback");
			if let Some(fallback) = &self.fallback {
				fallback.set(key, value.to_vec(), ttl);
			}
		}
	}

	fn clear(&self, prefix: &str) -> bool {
		match self.clear_remote(prefix) {
			Ok(removed) => removed,
			Err(err) => {
				warn!(error = %err, prefix, "cluster clear failed, clearing fallback");
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
			info!("redis cluster connection closed");
		}
	}

	fn config(&self) -> &BackendConfig {
		&self.config
	}

	fn kind(&self) -> BackendKind {
		BackendKind::Cluster
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ClusterOptions, TopologyMode};

	fn unreachable_config() -> BackendConfig {
		BackendConfig::new("127.0.0.1", 7399).with_mode(TopologyMode::Cluster)
	}

	#[test]
	fn construction_with_unreachable_seed_does_not_fail() {
		let backend = RedisClusterBackend::connect(unreachable_config());
		assert_eq!(backend.kind(), BackendKind::Cluster);
	}

	#[test]
	fn degraded_cluster_backend_uses_fallback() {
		let backend = RedisClusterBackend::connect(unreachable_config());

		backend.set("p:ns:key", b"v", Duration::from_secs(60));
		assert_eq!(backend.get("p:ns:key"), Some(b"v".to_vec()));
		assert!(backend.clear("p:ns"));
		assert_eq!(backend.get("p:ns:key"), None);
	}

	#[test]
	fn explicit_startup_nodes_are_accepted() {
		let config = unreachable_config().with_startup_nodes(vec![
			("127.0.0.1".to_string(), 7399),
			("127.0.0.1".to_string(), 7398),
		]);
		let backend = RedisClusterBackend::connect(config);
		assert_eq!(backend.config().cluster.startup_nodes.len(), 2);
	}

	#[test]
	fn stalled_seed_honors_the_configured_timeouts() {
		let port = crate::testsupport::silent_server();
		let (tx, rx) = std::sync::mpsc::channel();
		std::thread::spawn(move || {
			let backend = RedisClusterBackend::connect(
				BackendConfig::new("127.0.0.1", port)
					.with_mode(TopologyMode::Cluster)
					.with_response_timeout(Duration::from_millis(200))
					.with_cluster_options(ClusterOptions {
						retries: 1,
						..ClusterOptions::default()
					}),
			);
			backend.set("stall:key", b"v", Duration::from_secs(60));
			let _ = tx.send(backend.get("stall:key"));
		});

		let value = rx
			.recv_timeout(Duration::from_secs(15))
			.expect("cluster backend blocked on a seed that accepts but never replies");
		assert_eq!(value, Some(b"v".to_vec()));
	}

	fn slot_node(host: &str, port: i64) -> Value {
		Value::Array(vec![
			Value::BulkString(host.as_bytes().to_vec()),
			Value::Int(port),
			Value::BulkString(b"node-id".to_vec()),
		])
	}

	#[test]
	fn primary_nodes_are_the_third_slot_entry_deduplicated() {
		let slots = Value::Array(vec![
			Value::Array(vec![
				Value::Int(0),
				Value::Int(5460),
				slot_node("10.0.0.1", 7000),
				slot_node("10.0.0.4", 7003),
			]),
			Value::Array(vec![
				Value::Int(5461),
				Value::Int(10922),
				slot_node("10.0.0.2", 7001),
			]),
			Value::Array(vec![
				Value::Int(10923),
				Value::Int(16383),
				slot_node("10.0.0.1", 7000),
			]),
		]);

		// Replicas (fourth entry onwards) stay out; the node serving two
		// ranges appears once.
		assert_eq!(
			primary_nodes(&slots),
			vec![
				("10.0.0.1".to_string(), 7000),
				("10.0.0.2".to_string(), 7001),
			]
		);
	}

	#[test]
	fn malformed_slot_replies_yield_no_nodes() {
		assert!(primary_nodes(&Value::Nil).is_empty());

		let truncated = Value::Array(vec![Value::Array(vec![Value::Int(0), Value::Int(100)])]);
		assert!(primary_nodes(&truncated).is_empty());
	}
}
