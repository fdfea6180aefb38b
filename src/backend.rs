//! The capability interface shared by all cache backends.

use crate::config::BackendConfig;
use std::time::Duration;

/// Which backend variant is serving cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	Standalone,
	Cluster,
}

/// A cache backend: owns the remote connection and hides its failures.
///
/// Remote connectivity, timeout, and protocol errors never cross this
/// boundary. Each operation either succeeds against the remote store,
/// degrades to the in-memory fallback (when enabled), or quietly reports
/// absence/no-op. The raw bytes stored here are opaque; encoding and
/// decoding happen in the caching wrapper.
pub trait CacheBackend: Send + Sync {
	/// Raw bytes under `key`, from the remote store or the fallback.
	fn get(&self, key: &str) -> Option<Vec<u8>>;

	/// Store `value` under `key` with the given expiration; best-effort.
	fn set(&self, key: &str, value: &[u8], ttl: Duration);

	/// Delete every key matching `prefix*`; returns whether anything was
	/// removed.
	fn clear(&self, prefix: &str) -> bool;

	/// Drop the remote connection; best-effort, never fails.
	fn close(&self);

	/// The configuration this backend was built from; supplies per-call
	/// defaults to the caching wrapper.
	fn config(&self) -> &BackendConfig;

	fn kind(&self) -> BackendKind;
}

/// Remote expirations are set with `PX` so sub-second TTLs expire at the
/// same moment as their fallback counterparts. Zero is a protocol error;
/// clamp to one millisecond.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
	u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_ttls_preserve_sub_second_precision() {
		assert_eq!(ttl_millis(Duration::from_millis(250)), 250);
		assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
		assert_eq!(ttl_millis(Duration::ZERO), 1);
	}
}
