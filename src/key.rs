//! Deterministic cache-key derivation.
//!
//! A cache key identifies one invocation of a wrapped function: the call
//! site (module path plus function name), the positional arguments, and the
//! keyword-style named arguments. The key builder renders those parts into
//! a stable string, hashes it, and prepends the `{prefix}:{namespace}:`
//! qualifier so that distinct key spaces never alias each other short of a
//! hash collision.

use md5::{Digest, Md5};
use std::fmt;

/// Identity of a wrapped unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
	pub module: &'static str,
	pub function: &'static str,
}

impl CallSite {
	pub const fn new(module: &'static str, function: &'static str) -> Self {
		Self { module, function }
	}
}

/// Build a [`CallSite`] for a function in the current module.
#[macro_export]
macro_rules! call_site {
	($f:ident) => {
		$crate::CallSite::new(module_path!(), stringify!($f))
	};
}

/// One argument of a wrapped call, reduced to a shape with a stable
/// textual form.
///
/// Callers are responsible for passing values whose rendering is
/// deterministic; an [`CallArg::Object`] built from a type whose `Debug`
/// output varies between runs (for example a map with nondeterministic
/// iteration order) yields unstable keys.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
	Text(String),
	Bytes(Vec<u8>),
	Int(i64),
	Uint(u64),
	Float(f64),
	Bool(bool),
	/// A non-scalar value: its type name plus a textual rendering.
	///
	/// When an `Object` appears as the first positional argument it is
	/// treated as a method receiver and only the type name participates in
	/// the key, so caching a method stays stable across distinct instances
	/// of the same type.
	Object { type_name: String, repr: String },
}

impl CallArg {
	/// Capture a non-scalar argument via its `Debug` rendering.
	pub fn object<T>(value: &T) -> Self
	where
		T: fmt::Debug + ?Sized,
	{
		Self::Object {
			type_name: std::any::type_name::<T>().to_string(),
			repr: format!("{value:?}"),
		}
	}
}

impl fmt::Display for CallArg {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Text(s) => write!(f, "{s}"),
			Self::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
			Self::Int(i) => write!(f, "{i}"),
			Self::Uint(u) => write!(f, "{u}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::Bool(b) => write!(f, "{b}"),
			Self::Object { repr, .. } => write!(f, "{repr}"),
		}
	}
}

impl From<&str> for CallArg {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}

impl From<String> for CallArg {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

impl From<&[u8]> for CallArg {
	fn from(value: &[u8]) -> Self {
		Self::Bytes(value.to_vec())
	}
}

impl From<Vec<u8>> for CallArg {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}

impl From<bool> for CallArg {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f32> for CallArg {
	fn from(value: f32) -> Self {
		Self::Float(f64::from(value))
	}
}

impl From<f64> for CallArg {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

macro_rules! int_call_arg {
	($($t:ty),*) => {
		$(impl From<$t> for CallArg {
			fn from(value: $t) -> Self {
				Self::Int(value as i64)
			}
		})*
	};
}

macro_rules! uint_call_arg {
	($($t:ty),*) => {
		$(impl From<$t> for CallArg {
			fn from(value: $t) -> Self {
				Self::Uint(value as u64)
			}
		})*
	};
}

int_call_arg!(i8, i16, i32, i64, isize);
uint_call_arg!(u8, u16, u32, u64, usize);

/// Positional and keyword-style arguments of one wrapped call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
	pub positional: Vec<CallArg>,
	pub keyword: Vec<(String, CallArg)>,
}

impl CallArgs {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn arg(mut self, value: impl Into<CallArg>) -> Self {
		self.positional.push(value.into());
		self
	}

	pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<CallArg>) -> Self {
		self.keyword.push((name.into(), value.into()));
		self
	}
}

impl From<Vec<CallArg>> for CallArgs {
	fn from(positional: Vec<CallArg>) -> Self {
		Self {
			positional,
			keyword: Vec::new(),
		}
	}
}

/// Derives a cache key from a call identity.
///
/// Implementations must be pure: the same inputs always yield the same key,
/// across calls and across process restarts.
pub trait KeyBuilder: Send + Sync {
	fn build(
		&self,
		site: &CallSite,
		args: &[CallArg],
		kwargs: &[(String, CallArg)],
		prefix: &str,
		namespace: &str,
	) -> String;
}

/// Default key builder: md5 hex digest over
/// `"{module}:{function}:{args}:{kwargs}"`, qualified with
/// `"{prefix}:{namespace}:"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyBuilder;

impl KeyBuilder for DefaultKeyBuilder {
	fn build(
		&self,
		site: &CallSite,
		args: &[CallArg],
		kwargs: &[(String, CallArg)],
		prefix: &str,
		namespace: &str,
	) -> String {
		let rendered_args: Vec<String> = args
			.iter()
			.enumerate()
			.map(|(position, arg)| match (position, arg) {
				// Receiver normalization: a leading non-scalar argument is a
				// method receiver, keyed by type rather than by instance.
				(0, CallArg::Object { type_name, .. }) => type_name.clone(),
				(_, arg) => arg.to_string(),
			})
			.collect();
		let rendered_kwargs: Vec<String> = kwargs
			.iter()
			.map(|(name, value)| format!("{name}={value}"))
			.collect();

		let raw = format!(
			"{}:{}:{}:{}",
			site.module,
			site.function,
			rendered_args.join(","),
			rendered_kwargs.join(",")
		);

		let mut hasher = Md5::new();
		hasher.update(raw.as_bytes());
		let digest = hex::encode(hasher.finalize());

		format!("{prefix}:{namespace}:{digest}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[derive(Debug)]
	struct Repository {
		url: String,
	}

	fn build(args: &[CallArg], kwargs: &[(String, CallArg)]) -> String {
		let site = CallSite::new("app::reports", "monthly_totals");
		DefaultKeyBuilder.build(&site, args, kwargs, "recache", "main")
	}

	#[test]
	fn same_inputs_same_key() {
		let args = vec![CallArg::from(3), CallArg::from("north")];
		let kwargs = vec![("page".to_string(), CallArg::from(1u32))];
		assert_eq!(build(&args, &kwargs), build(&args, &kwargs));
	}

	#[test]
	fn key_has_prefix_namespace_and_hex_digest() {
		let key = build(&[CallArg::from(1)], &[]);
		let parts: Vec<&str> = key.split(':').collect();
		assert_eq!(parts[0], "recache");
		assert_eq!(parts[1], "main");
		assert_eq!(parts[2].len(), 32);
		assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn different_namespaces_never_alias() {
		let site = CallSite::new("app", "f");
		let args = [CallArg::from(1)];
		let a = DefaultKeyBuilder.build(&site, &args, &[], "p", "ns1");
		let b = DefaultKeyBuilder.build(&site, &args, &[], "p", "ns2");
		assert_ne!(a, b);
		assert!(a.starts_with("p:ns1:"));
		assert!(b.starts_with("p:ns2:"));
	}

	#[test]
	fn receiver_normalization_ignores_instance_state() {
		let first = Repository {
			url: "https://a.example".to_string(),
		};
		let second = Repository {
			url: "https://b.example".to_string(),
		};

		let with_first = build(&[CallArg::object(&first), CallArg::from(7)], &[]);
		let with_second = build(&[CallArg::object(&second), CallArg::from(7)], &[]);
		assert_eq!(with_first, with_second);
	}

	#[test]
	fn receiver_normalization_distinguishes_types() {
		#[derive(Debug)]
		struct OtherReceiver;

		let repo = Repository {
			url: "https://a.example".to_string(),
		};
		let with_repo = build(&[CallArg::object(&repo), CallArg::from(7)], &[]);
		let with_other = build(&[CallArg::object(&OtherReceiver), CallArg::from(7)], &[]);
		assert_ne!(with_repo, with_other);
	}

	#[test]
	fn non_leading_objects_keep_their_rendering() {
		let a = Repository {
			url: "https://a.example".to_string(),
		};
		let b = Repository {
			url: "https://b.example".to_string(),
		};

		// Only the first position is receiver-normalized.
		let with_a = build(&[CallArg::from(1), CallArg::object(&a)], &[]);
		let with_b = build(&[CallArg::from(1), CallArg::object(&b)], &[]);
		assert_ne!(with_a, with_b);
	}

	#[test]
	fn kwargs_participate_in_the_key() {
		let args = vec![CallArg::from("q")];
		let without = build(&args, &[]);
		let with = build(&args, &[("limit".to_string(), CallArg::from(10))]);
		assert_ne!(without, with);
	}

	#[rstest]
	#[case(CallArg::from("text"), "text")]
	#[case(CallArg::from(-4i32), "-4")]
	#[case(CallArg::from(4u64), "4")]
	#[case(CallArg::from(1.5f64), "1.5")]
	#[case(CallArg::from(true), "true")]
	#[case(CallArg::from(vec![0xABu8, 0xCD]), "0xabcd")]
	fn scalar_rendering_is_stable(#[case] arg: CallArg, #[case] expected: &str) {
		assert_eq!(arg.to_string(), expected);
	}

	#[test]
	fn call_args_builder_collects_both_kinds() {
		let args = CallArgs::new().arg(1).arg("x").kwarg("page", 2);
		assert_eq!(args.positional.len(), 2);
		assert_eq!(args.keyword.len(), 1);
		assert_eq!(args.keyword[0].0, "page");
	}
}
