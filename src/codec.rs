//! Pluggable encoding of cached values to bytes.

use crate::error::{CacheError, Result};
use serde_json::Value;

/// Encodes and decodes cached values.
///
/// The interchange type is [`serde_json::Value`]: the caching wrapper
/// converts the wrapped function's result to a `Value` with serde, and the
/// codec decides the byte representation stored in the backend. Codecs are
/// stored as trait objects in the backend configuration and can be swapped
/// per decorated call.
pub trait ValueCodec: Send + Sync {
	fn encode(&self, value: &Value) -> Result<Vec<u8>>;
	fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Default codec: compact JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
	fn encode(&self, value: &Value) -> Result<Vec<u8>> {
		serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))
	}

	fn decode(&self, bytes: &[u8]) -> Result<Value> {
		serde_json::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
	}
}
