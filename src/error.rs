//! Error types for the caching layer.

use thiserror::Error;

/// Result type for caching operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the caching layer.
///
/// Connectivity and protocol failures against the remote store are never
/// surfaced here: they are caught at the backend boundary and either routed
/// to the in-memory fallback or dropped with a logged warning. Caching is
/// strictly best-effort.
#[derive(Debug, Error)]
pub enum CacheError {
	/// No cache backend has been initialized for this process
	#[error("cache backend is not initialized")]
	NotInitialized,

	/// Encoding or decoding a cached value failed
	#[error("codec error: {0}")]
	Codec(String),
}
