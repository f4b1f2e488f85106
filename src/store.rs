//! Shared key-value store contract backing sessions, refresh tokens, and rate-limit counters.

pub mod memory;
#[cfg(feature = "redis")] pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")] pub use redis::RedisStore;

// self
use crate::{_prelude::*, auth::SessionId};

/// Field map stored under a single key.
pub type Fields = BTreeMap<String, String>;

/// Boxed future returned by every [`KvStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract shared by the session, refresh-token, and rate-limit stores.
///
/// Absence of a key is a normal outcome (`None`/`false`); `Err` always means the backend could
/// not be consulted.
pub trait KvStore
where
	Self: Send + Sync,
{
	/// Replaces every field stored under `key` and sets its TTL.
	fn put<'a>(&'a self, key: &'a StoreKey, fields: Fields, ttl: Duration) -> StoreFuture<'a, ()>;

	/// Fetches every field stored under `key`.
	fn get_all<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Fields>>;

	/// Merges `fields` into the existing map and resets the TTL in a single atomic step.
	///
	/// Fields not named in `fields` keep their stored values. Returns `false` without creating
	/// anything when the key has already expired.
	fn set_fields<'a>(
		&'a self,
		key: &'a StoreKey,
		fields: Fields,
		ttl: Duration,
	) -> StoreFuture<'a, bool>;

	/// Single-field form of [`set_fields`](Self::set_fields).
	fn set_field<'a>(
		&'a self,
		key: &'a StoreKey,
		field: &'a str,
		value: String,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		let fields = Fields::from([(field.to_owned(), value)]);

		self.set_fields(key, fields, ttl)
	}

	/// Atomically adds `delta` to an integer field and returns the new value.
	///
	/// The remaining TTL is preserved. Returns `None` when the key has already expired.
	fn increment_field<'a>(
		&'a self,
		key: &'a StoreKey,
		field: &'a str,
		delta: i64,
	) -> StoreFuture<'a, Option<i64>>;

	/// Atomically increments a standalone counter, starting its TTL when the counter is created.
	fn increment_counter<'a>(
		&'a self,
		key: &'a StoreKey,
		window: Duration,
	) -> StoreFuture<'a, u64>;

	/// Removes `key`, returning whether anything was deleted.
	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool>;
}

/// Error type produced by [`KvStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A stored value could not be decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure (unreachable, timed out, or refused the command).
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	/// Builds a serialization error from any displayable failure.
	pub fn serialization(e: impl Display) -> Self {
		Self::Serialization { message: e.to_string() }
	}
}

/// Key prefix separating the logical stores sharing one physical backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
	/// Pre-auth and logged-in sessions.
	Session,
	/// Refresh-token subject snapshots.
	RefreshToken,
	/// Fixed-window counters.
	RateLimit,
}
impl Namespace {
	/// Returns the key prefix.
	pub const fn as_str(self) -> &'static str {
		match self {
			Namespace::Session => "session",
			Namespace::RefreshToken => "refresh_token",
			Namespace::RateLimit => "rate_limit",
		}
	}
}

/// Fully qualified store key, rendered as `<namespace>:<id>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
	namespace: Namespace,
	id: String,
}
impl StoreKey {
	/// Key for a session record.
	pub fn session(id: &SessionId) -> Self {
		Self { namespace: Namespace::Session, id: id.expose().to_owned() }
	}

	/// Key for a refresh-token record, addressed by the handle's fingerprint.
	pub fn refresh_token(fingerprint: impl Into<String>) -> Self {
		Self { namespace: Namespace::RefreshToken, id: fingerprint.into() }
	}

	/// Key for a fixed-window counter.
	pub fn rate_limit(scope: &str, client: &str, bucket: i64) -> Self {
		Self { namespace: Namespace::RateLimit, id: format!("{scope}:{client}:{bucket}") }
	}

	/// Namespace the key belongs to.
	pub fn namespace(&self) -> Namespace {
		self.namespace
	}
}
impl Debug for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self.namespace {
			Namespace::Session => write!(f, "StoreKey({}:<redacted>)", self.namespace.as_str()),
			_ => write!(f, "StoreKey({self})"),
		}
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.namespace.as_str(), self.id)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_gateway_error_with_source() {
		let store_error = StoreError::Backend { message: "connection refused".into() };
		let gateway_error: Error = store_error.clone().into();

		assert!(matches!(gateway_error, Error::Storage(_)));
		assert_eq!(gateway_error.kind(), ErrorKind::Internal);

		let source = StdError::source(&gateway_error)
			.expect("Gateway error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn keys_render_with_namespace_prefixes() {
		let session = SessionId::new("abc").expect("Session fixture should be valid.");

		assert_eq!(StoreKey::session(&session).to_string(), "session:abc");
		assert_eq!(StoreKey::refresh_token("fp").to_string(), "refresh_token:fp");
		assert_eq!(
			StoreKey::rate_limit("gateway", "10.0.0.1", 42).to_string(),
			"rate_limit:gateway:10.0.0.1:42"
		);
		assert_eq!(format!("{:?}", StoreKey::session(&session)), "StoreKey(session:<redacted>)");
	}
}
