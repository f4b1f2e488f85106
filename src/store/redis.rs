//! Redis-backed [`KvStore`] shared by every gateway instance.

// crates.io
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
// self
use crate::{
	_prelude::*,
	store::{Fields, KvStore, StoreError, StoreFuture, StoreKey},
};

const SET_FIELDS_IF_EXISTS: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
	return 0
end
if #ARGV > 1 then
	redis.call('HSET', KEYS[1], unpack(ARGV, 2))
end
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
";
const INCREMENT_FIELD_IF_EXISTS: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
	return false
end
return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
";
const INCREMENT_COUNTER: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
	redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

impl From<RedisError> for StoreError {
	fn from(e: RedisError) -> Self {
		Self::Backend { message: e.to_string() }
	}
}

/// Store backed by a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
	conn: ConnectionManager,
	prefix: String,
}
impl RedisStore {
	/// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`), prefixing every key with `prefix`.
	pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
		let client = Client::open(url)?;
		let conn = ConnectionManager::new(client).await?;

		Ok(Self { conn, prefix: prefix.into() })
	}

	/// Wraps an existing connection manager.
	pub fn from_manager(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
		Self { conn, prefix: prefix.into() }
	}

	fn render(&self, key: &StoreKey) -> String {
		format!("{}{key}", self.prefix)
	}
}
impl Debug for RedisStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedisStore").field("prefix", &self.prefix).finish_non_exhaustive()
	}
}
impl KvStore for RedisStore {
	fn put<'a>(&'a self, key: &'a StoreKey, fields: Fields, ttl: Duration) -> StoreFuture<'a, ()> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let items = fields.into_iter().collect::<Vec<_>>();
			let mut pipe = redis::pipe();

			pipe.atomic().del(&key).ignore();

			if !items.is_empty() {
				pipe.hset_multiple(&key, &items).ignore();
			}

			pipe.pexpire(&key, ttl_millis(ttl)).ignore();

			let _: () = pipe.query_async(&mut conn).await?;

			Ok(())
		})
	}

	fn get_all<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Fields>> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let fields: Fields = conn.hgetall(&key).await?;

			Ok(if fields.is_empty() { None } else { Some(fields) })
		})
	}

	fn set_fields<'a>(
		&'a self,
		key: &'a StoreKey,
		fields: Fields,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let script = Script::new(SET_FIELDS_IF_EXISTS);
			let mut invocation = script.key(&key);

			invocation.arg(ttl_millis(ttl));

			for (field, value) in &fields {
				invocation.arg(field).arg(value);
			}

			let updated: i64 = invocation.invoke_async(&mut conn).await?;

			Ok(updated == 1)
		})
	}

	fn increment_field<'a>(
		&'a self,
		key: &'a StoreKey,
		field: &'a str,
		delta: i64,
	) -> StoreFuture<'a, Option<i64>> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let next: Option<i64> = Script::new(INCREMENT_FIELD_IF_EXISTS)
				.key(&key)
				.arg(field)
				.arg(delta)
				.invoke_async(&mut conn)
				.await?;

			Ok(next)
		})
	}

	fn increment_counter<'a>(
		&'a self,
		key: &'a StoreKey,
		window: Duration,
	) -> StoreFuture<'a, u64> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let count: u64 = Script::new(INCREMENT_COUNTER)
				.key(&key)
				.arg(ttl_millis(window))
				.invoke_async(&mut conn)
				.await?;

			Ok(count)
		})
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		let mut conn = self.conn.clone();
		let key = self.render(key);

		Box::pin(async move {
			let removed: i64 = conn.del(&key).await?;

			Ok(removed > 0)
		})
	}
}

fn ttl_millis(ttl: Duration) -> i64 {
	i64::try_from(ttl.whole_milliseconds()).unwrap_or(i64::MAX).max(1)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ttl_is_clamped_to_a_positive_millisecond_count() {
		assert_eq!(ttl_millis(Duration::minutes(15)), 900_000);
		assert_eq!(ttl_millis(Duration::ZERO), 1);
		assert_eq!(ttl_millis(Duration::MAX), i64::MAX);
	}
}
