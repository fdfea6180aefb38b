//! Internal fallback entry structure

use std::time::{Duration, SystemTime};

/// Fallback entry with absolute expiry
#[derive(Debug, Clone)]
pub(crate) struct FallbackEntry {
	pub(crate) value: Vec<u8>,
	pub(crate) expires_at: SystemTime,
}

impl FallbackEntry {
	pub(crate) fn new(value: Vec<u8>, ttl: Duration) -> Self {
		Self {
			value,
			expires_at: SystemTime::now() + ttl,
		}
	}

	pub(crate) fn is_expired(&self) -> bool {
		SystemTime::now() > self.expires_at
	}
}
