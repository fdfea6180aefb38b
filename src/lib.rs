//! Transparent function-result memoization on Redis.
//!
//! `recache` wraps a unit of work (synchronous or asynchronous), derives a
//! deterministic key from the call's identity and arguments, and serves
//! repeat calls from a Redis-backed cache. The backend is selected once per
//! process (standalone or clustered, with `CLUSTER INFO` auto-detection)
//! and degrades gracefully: when the remote store is unreachable, entries
//! live in a bounded in-memory fallback table with the same expiry
//! semantics, and when no backend was initialized at all, wrapped calls
//! execute exactly as if they were never cached.
//!
//! Caching is strictly best-effort. Connectivity, timeout, protocol, and
//! codec failures are caught, logged through `tracing`, and never surface
//! to the wrapped call's caller; the worst case is the performance of an
//! uncached call.
//!
//! # Quick start
//!
//! ```no_run
//! use recache::BackendConfig;
//!
//! fn monthly_totals(region: &str) -> Vec<u64> {
//!     vec![1, 2, 3]
//! }
//!
//! // Once per process, typically at startup. Idempotent.
//! recache::init(BackendConfig::new("localhost", 6379));
//!
//! let totals = recache::cached!(monthly_totals("north"));
//!
//! // At shutdown; best-effort.
//! recache::close();
//! ```
//!
//! Per-call settings and explicit registries go through [`Cached`].

mod backend;
mod cached;
mod codec;
mod config;
mod entry;
mod error;
mod factory;
mod key;
mod memory;
mod redis_backend;
mod redis_cluster;
#[cfg(test)]
mod testsupport;

pub use backend::{BackendKind, CacheBackend};
pub use cached::Cached;
pub use codec::{JsonCodec, ValueCodec};
pub use config::{
	BackendConfig, ClusterOptions, DEFAULT_EXPIRE, DEFAULT_KEY_PREFIX, DEFAULT_NAMESPACE,
	TopologyMode,
};
pub use error::{CacheError, Result};
pub use factory::CacheRegistry;
pub use key::{CallArg, CallArgs, CallSite, DefaultKeyBuilder, KeyBuilder};
pub use memory::MemoryFallback;
pub use redis_backend::RedisBackend;
pub use redis_cluster::RedisClusterBackend;

use std::sync::Arc;

/// Initialize the process-wide cache backend; idempotent, first call wins.
pub fn init(config: BackendConfig) {
	registry().initialize(config);
}

/// The process-wide registry behind [`init`] and the `cached!` macros.
pub fn registry() -> &'static CacheRegistry {
	factory::global()
}

/// The active process-wide backend, if [`init`] has been called.
pub fn backend() -> Option<Arc<dyn CacheBackend>> {
	registry().backend()
}

/// The active process-wide backend, or [`CacheError::NotInitialized`].
pub fn try_backend() -> Result<Arc<dyn CacheBackend>> {
	registry().try_backend()
}

/// Close the process-wide backend's connections; best-effort.
pub fn close() {
	registry().close();
}
