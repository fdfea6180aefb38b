//! Backend configuration.

use crate::codec::{JsonCodec, ValueCodec};
use crate::key::{DefaultKeyBuilder, KeyBuilder};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default qualifier placed ahead of every key digest.
pub const DEFAULT_KEY_PREFIX: &str = "recache";
/// Default namespace segment of the key qualifier.
pub const DEFAULT_NAMESPACE: &str = "main";
/// Default expiration applied when a decorated call does not override it.
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(30);

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the remote store is a single node, a cluster, or should be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
	Standalone,
	Cluster,
	/// Probe the target node with `CLUSTER INFO` and pick accordingly;
	/// connection failure during the probe defaults to standalone.
	Auto,
}

/// Options specific to the clustered backend.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
	/// Seed nodes; when empty, the configured host/port is the single seed.
	pub startup_nodes: Vec<(String, u16)>,
	/// Retry attempts for cluster redirections.
	pub retries: u32,
	/// Require every hash slot to be covered before treating the cluster
	/// as healthy.
	pub require_full_coverage: bool,
	/// Allow reads from replica nodes.
	pub read_from_replicas: bool,
}

impl Default for ClusterOptions {
	fn default() -> Self {
		Self {
			startup_nodes: Vec::new(),
			retries: 3,
			require_full_coverage: true,
			read_from_replicas: false,
		}
	}
}

/// Immutable configuration for a cache backend.
///
/// Built once with the `with_*` methods and handed to
/// [`CacheRegistry::initialize`](crate::CacheRegistry::initialize); not
/// modified afterwards.
#[derive(Clone)]
pub struct BackendConfig {
	pub host: String,
	pub port: u16,
	pub username: Option<String>,
	pub password: Option<String>,
	pub db: i64,
	pub mode: TopologyMode,
	pub namespace: String,
	pub key_prefix: String,
	pub expire: Duration,
	pub codec: Arc<dyn ValueCodec>,
	pub key_builder: Arc<dyn KeyBuilder>,
	pub fallback_enabled: bool,
	pub cluster: ClusterOptions,
	/// Timeout applied to connection establishment and to reads/writes on
	/// established connections; connectivity failures past it count as one
	/// of the caught failure kinds.
	pub response_timeout: Duration,
}

impl BackendConfig {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
			username: None,
			password: None,
			db: 0,
			mode: TopologyMode::Auto,
			namespace: DEFAULT_NAMESPACE.to_string(),
			key_prefix: DEFAULT_KEY_PREFIX.to_string(),
			expire: DEFAULT_EXPIRE,
			codec: Arc::new(JsonCodec),
			key_builder: Arc::new(DefaultKeyBuilder),
			fallback_enabled: true,
			cluster: ClusterOptions::default(),
			response_timeout: DEFAULT_RESPONSE_TIMEOUT,
		}
	}

	pub fn with_username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self
	}

	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(password.into());
		self
	}

	pub fn with_db(mut self, db: i64) -> Self {
		self.db = db;
		self
	}

	pub fn with_mode(mut self, mode: TopologyMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();
		self
	}

	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = prefix.into();
		self
	}

	pub fn with_expire(mut self, expire: Duration) -> Self {
		self.expire = expire;
		self
	}

	pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
		self.codec = codec;
		self
	}

	pub fn with_key_builder(mut self, key_builder: Arc<dyn KeyBuilder>) -> Self {
		self.key_builder = key_builder;
		self
	}

	pub fn with_fallback(mut self, enabled: bool) -> Self {
		self.fallback_enabled = enabled;
		self
	}

	pub fn with_cluster_options(mut self, cluster: ClusterOptions) -> Self {
		self.cluster = cluster;
		self
	}

	pub fn with_startup_nodes(mut self, nodes: Vec<(String, u16)>) -> Self {
		self.cluster.startup_nodes = nodes;
		self
	}

	pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
		self.response_timeout = timeout;
		self
	}

	/// Connection info for the configured host/port.
	pub(crate) fn connection_info(&self) -> redis::ConnectionInfo {
		self.node_info(&self.host, self.port)
	}

	/// Connection info for an arbitrary node, carrying this config's
	/// credentials and database index.
	pub(crate) fn node_info(&self, host: &str, port: u16) -> redis::ConnectionInfo {
		redis::ConnectionInfo {
			addr: redis::ConnectionAddr::Tcp(host.to_string(), port),
			redis: redis::RedisConnectionInfo {
				db: self.db,
				username: self.username.clone(),
				password: self.password.clone(),
				..Default::default()
			},
		}
	}
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self::new("localhost", 6379)
	}
}

impl fmt::Debug for BackendConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BackendConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("db", &self.db)
			.field("mode", &self.mode)
			.field("namespace", &self.namespace)
			.field("key_prefix", &self.key_prefix)
			.field("expire", &self.expire)
			.field("fallback_enabled", &self.fallback_enabled)
			.field("cluster", &self.cluster)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_documented_values() {
		let config = BackendConfig::default();
		assert_eq!(config.host, "localhost");
		assert_eq!(config.port, 6379);
		assert_eq!(config.db, 0);
		assert_eq!(config.mode, TopologyMode::Auto);
		assert_eq!(config.namespace, DEFAULT_NAMESPACE);
		assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
		assert_eq!(config.expire, DEFAULT_EXPIRE);
		assert!(config.fallback_enabled);
		assert!(config.cluster.startup_nodes.is_empty());
		assert_eq!(config.cluster.retries, 3);
	}

	#[test]
	fn builder_overrides_stick() {
		let config = BackendConfig::new("cache.internal", 7000)
			.with_password("secret")
			.with_db(2)
			.with_mode(TopologyMode::Cluster)
			.with_namespace("reports")
			.with_key_prefix("app")
			.with_expire(Duration::from_secs(120))
			.with_fallback(false)
			.with_startup_nodes(vec![("cache.internal".to_string(), 7001)]);

		assert_eq!(config.password.as_deref(), Some("secret"));
		assert_eq!(config.db, 2);
		assert_eq!(config.mode, TopologyMode::Cluster);
		assert_eq!(config.namespace, "reports");
		assert_eq!(config.key_prefix, "app");
		assert_eq!(config.expire, Duration::from_secs(120));
		assert!(!config.fallback_enabled);
		assert_eq!(config.cluster.startup_nodes.len(), 1);
	}
}
