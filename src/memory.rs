//! Bounded in-process expiring store.
//!
//! Used by the Redis backends as a stand-in while the remote store is
//! unreachable, so TTL semantics are duplicated here: every entry carries an
//! absolute expiry, expired entries are dropped lazily on read, and the
//! whole table is swept once it grows past [`SWEEP_THRESHOLD`] entries.
//!
//! A single mutex guards the table, which is sufficient for concurrent
//! read/insert/delete from multiple threads.

use crate::entry::FallbackEntry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Sweep all expired entries once the table grows past this many entries.
pub(crate) const SWEEP_THRESHOLD: usize = 1000;

/// In-memory fallback cache with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryFallback {
	store: Mutex<HashMap<String, FallbackEntry>>,
}

impl MemoryFallback {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, FallbackEntry>> {
		self.store.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Store `value` under `key` for `ttl`.
	pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
		let mut store = self.lock();
		store.insert(key.to_string(), FallbackEntry::new(value, ttl));
		if store.len() > SWEEP_THRESHOLD {
			store.retain(|_, entry| !entry.is_expired());
		}
	}

	/// Return the value under `key` if present and unexpired.
	///
	/// An expired entry is removed on read.
	pub fn get(&self, key: &str) -> Option<Vec<u8>> {
		let mut store = self.lock();
		let entry = store.get(key)?;
		if entry.is_expired() {
			store.remove(key);
			return None;
		}
		Some(entry.value.clone())
	}

	/// Remove every key starting with `prefix`; returns the removed count.
	pub fn clear(&self, prefix: &str) -> usize {
		let mut store = self.lock();
		let before = store.len();
		store.retain(|key, _| !key.starts_with(prefix));
		before - store.len()
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}
