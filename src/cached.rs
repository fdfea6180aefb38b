//! The caching wrapper around a unit of work.

use crate::backend::CacheBackend;
use crate::codec::ValueCodec;
use crate::error::CacheError;
use crate::factory::{self, CacheRegistry};
use crate::key::{CallArgs, CallSite, KeyBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Memoizes a unit of work behind the active cache backend.
///
/// Per-call settings (expiration, namespace, key prefix, codec, key
/// builder) override the backend's defaults; anything left unset falls back
/// to the backend configuration. With no backend initialized, calls degrade
/// to plain invocation of the wrapped function; the wrapper never fails a
/// call on account of the cache.
///
/// The wrapped function's own panics and errors propagate unchanged; only
/// caching-layer failures are swallowed (and logged).
///
/// Known limitations, carried over deliberately:
///
/// * No single-flight suppression: concurrent calls that miss on the same
///   key all execute the wrapped function, and the last write wins.
/// * Backend I/O is blocking even on [`call_async`](Cached::call_async);
///   only the wrapped future suspends. A slow store can therefore stall a
///   cooperative scheduler's carrier thread.
///
/// # Examples
///
/// ```no_run
/// use recache::{BackendConfig, Cached, CallArgs, call_site};
/// use std::time::Duration;
///
/// fn monthly_totals(region: &str, month: u32) -> Vec<u64> {
///     vec![1, 2, 3]
/// }
///
/// recache::init(BackendConfig::default());
///
/// let totals = Cached::new()
///     .with_expire(Duration::from_secs(300))
///     .call(
///         &call_site!(monthly_totals),
///         &CallArgs::new().arg("north").arg(3u32),
///         || monthly_totals("north", 3),
///     );
/// ```
#[derive(Clone)]
pub struct Cached<'r> {
	registry: &'r CacheRegistry,
	expire: Option<Duration>,
	namespace: Option<String>,
	key_prefix: Option<String>,
	codec: Option<Arc<dyn ValueCodec>>,
	key_builder: Option<Arc<dyn KeyBuilder>>,
}

impl Cached<'static> {
	/// A wrapper bound to the process-wide registry.
	pub fn new() -> Self {
		Self::with_registry(factory::global())
	}
}

impl Default for Cached<'static> {
	fn default() -> Self {
		Self::new()
	}
}

impl<'r> Cached<'r> {
	/// A wrapper bound to an explicit registry.
	pub fn with_registry(registry: &'r CacheRegistry) -> Self {
		Self {
			registry,
			expire: None,
			namespace: None,
			key_prefix: None,
			codec: None,
			key_builder: None,
		}
	}

	pub fn with_expire(mut self, expire: Duration) -> Self {
		self.expire = Some(expire);
		self
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = Some(prefix.into());
		self
	}

	pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
		self.codec = Some(codec);
		self
	}

	pub fn with_key_builder(mut self, key_builder: Arc<dyn KeyBuilder>) -> Self {
		self.key_builder = Some(key_builder);
		self
	}

	/// Invoke `f` with caching; synchronous path.
	pub fn call<T, F>(&self, site: &CallSite, args: &CallArgs, f: F) -> T
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> T,
	{
		let Some(backend) = self.registry.backend() else {
			return f();
		};

		let resolved = self.resolve(backend.as_ref(), site, args);
		if let Some(hit) = resolved.lookup(backend.as_ref()) {
			return hit;
		}
		let result = f();
		resolved.store(backend.as_ref(), &result);
		result
	}

	/// Await `f` with caching; asynchronous path.
	///
	/// Identical to [`call`](Cached::call) apart from suspending on the
	/// wrapped future. Backend I/O stays blocking.
	pub async fn call_async<T, F>(&self, site: &CallSite, args: &CallArgs, f: F) -> T
	where
		T: Serialize + DeserializeOwned,
		F: Future<Output = T>,
	{
		let Some(backend) = self.registry.backend() else {
			return f.await;
		};

		let resolved = self.resolve(backend.as_ref(), site, args);
		if let Some(hit) = resolved.lookup(backend.as_ref()) {
			return hit;
		}
		let result = f.await;
		resolved.store(backend.as_ref(), &result);
		result
	}

	/// Merge per-call overrides with backend defaults into one resolved
	/// call context before any key building or I/O.
	fn resolve(&self, backend: &dyn CacheBackend, site: &CallSite, args: &CallArgs) -> ResolvedCall {
		let config = backend.config();
		let key_builder = self.key_builder.as_ref().unwrap_or(&config.key_builder);
		let namespace = self.namespace.as_deref().unwrap_or(&config.namespace);
		let key_prefix = self.key_prefix.as_deref().unwrap_or(&config.key_prefix);

		let key = key_builder.build(site, &args.positional, &args.keyword, key_prefix, namespace);

		ResolvedCall {
			key,
			expire: self.expire.unwrap_or(config.expire),
			codec: self
				.codec
				.clone()
				.unwrap_or_else(|| Arc::clone(&config.codec)),
		}
	}
}

/// Fully-resolved context for one decorated call.
struct ResolvedCall {
	key: String,
	expire: Duration,
	codec: Arc<dyn ValueCodec>,
}

impl ResolvedCall {
	/// Backend lookup plus decode. Presence of the stored bytes is the hit
	/// signal; a value decoding to something empty or default-like is still
	/// a hit. Decode failures are logged and treated as a miss.
	fn lookup<T>(&self, backend: &dyn CacheBackend) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let bytes = backend.get(&self.key)?;
		let decoded = self.codec.decode(&bytes).and_then(|value| {
			serde_json::from_value(value).map_err(|e| CacheError::Codec(e.to_string()))
		});
		match decoded {
			Ok(value) => Some(value),
			Err(err) => {
				warn!(key = %self.key, error = %err, "cached value failed to decode, treating as miss");
				None
			}
		}
	}

	/// Encode plus backend write. Failures are logged; the caller keeps the
	/// computed result either way.
	fn store<T>(&self, backend: &dyn CacheBackend, result: &T)
	where
		T: Serialize,
	{
		let encoded = serde_json::to_value(result)
			.map_err(|e| CacheError::Codec(e.to_string()))
			.and_then(|value| self.codec.encode(&value));
		match encoded {
			Ok(bytes) => backend.set(&self.key, &bytes, self.expire),
			Err(err) => {
				warn!(key = %self.key, error = %err, "result failed to encode, skipping cache write");
			}
		}
	}
}

/// Memoize a plain function call through the process-wide registry.
///
/// Positional arguments must implement `Into<CallArg>` and `Clone`; the
/// call site is derived from the enclosing module and the function name.
/// For keyword-style arguments, per-call overrides, or an explicit
/// registry, use [`Cached`] directly.
///
/// ```no_run
/// # fn lookup(id: u64) -> String { String::new() }
/// # recache::init(recache::BackendConfig::default());
/// let name = recache::cached!(lookup(42u64));
/// ```
#[macro_export]
macro_rules! cached {
	($f:ident ( $($arg:expr),* $(,)? )) => {{
		let args = $crate::CallArgs::from(
			vec![$($crate::CallArg::from($arg.clone())),*],
		);
		$crate::Cached::new().call(
			&$crate::CallSite::new(module_path!(), stringify!($f)),
			&args,
			|| $f($($arg),*),
		)
	}};
}

/// Memoize an async function call through the process-wide registry.
///
/// The expansion is a future; `.await` it.
///
/// ```no_run
/// # async fn fetch(id: u64) -> String { String::new() }
/// # async fn example() {
/// # recache::init(recache::BackendConfig::default());
/// let body = recache::cached_async!(fetch(42u64)).await;
/// # }
/// ```
#[macro_export]
macro_rules! cached_async {
	($f:ident ( $($arg:expr),* $(,)? )) => {
		async move {
			let args = $crate::CallArgs::from(
				vec![$($crate::CallArg::from($arg.clone())),*],
			);
			$crate::Cached::new()
				.call_async(
					&$crate::CallSite::new(module_path!(), stringify!($f)),
					&args,
					$f($($arg),*),
				)
				.await
		}
	};
}
